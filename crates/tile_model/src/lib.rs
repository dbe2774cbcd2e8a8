//! Quadtree tile addressing.
//!
//! A `TileId` names one node of the paging quadtree. The root is
//! `(0, 0, 0)`; every node has four children one level down and (except
//! the root) one parent one level up. Identity and ordering are purely
//! structural, so the same type serves map keys, set membership, and the
//! coarse-before-fine dispatch order.

use std::cmp::Ordering;
use std::fmt;

use static_assertions::const_assert_eq;

const LEVEL_BITS: u64 = 6;
const X_BITS: u64 = 29;
const Y_BITS: u64 = 29;

const Y_SHIFT: u64 = 0;
const X_SHIFT: u64 = Y_BITS;
const LEVEL_SHIFT: u64 = X_BITS + Y_BITS;

const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;
const X_MASK: u64 = (1 << X_BITS) - 1;
const Y_MASK: u64 = (1 << Y_BITS) - 1;

const_assert_eq!(LEVEL_BITS + X_BITS + Y_BITS, 64);

/// Deepest level a `TileId` can address. The packed key reserves 29 bits
/// per axis, and level 29 is the last level whose coordinates fit.
pub const MAX_LEVEL: u32 = X_BITS as u32;

/// One quadtree node, addressed by zoom level and column/row within it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub const ROOT: TileId = TileId {
        level: 0,
        x: 0,
        y: 0,
    };

    pub fn new(level: u32, x: u32, y: u32) -> Self {
        let id = TileId { level, x, y };
        if !id.is_valid() {
            panic!("tile coordinates out of range for level {level}: ({x}, {y})");
        }
        id
    }

    /// Number of tiles along one axis at `level`.
    pub const fn tiles_across(level: u32) -> u32 {
        1 << level
    }

    pub const fn is_valid(self) -> bool {
        self.level <= MAX_LEVEL
            && self.x < Self::tiles_across(self.level)
            && self.y < Self::tiles_across(self.level)
    }

    /// Parent one level up, or `None` for the root.
    pub fn parent(self) -> Option<TileId> {
        if self.level == 0 {
            return None;
        }
        Some(TileId {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four children one level down, in `Quadrant` order.
    pub fn children(self) -> [TileId; 4] {
        [
            self.child(Quadrant::LowerLeft),
            self.child(Quadrant::LowerRight),
            self.child(Quadrant::UpperLeft),
            self.child(Quadrant::UpperRight),
        ]
    }

    pub fn child(self, quadrant: Quadrant) -> TileId {
        TileId {
            level: self.level + 1,
            x: 2 * self.x + quadrant.dx(),
            y: 2 * self.y + quadrant.dy(),
        }
    }

    /// Which quadrant of its parent this tile occupies. Root has none.
    pub fn quadrant(self) -> Option<Quadrant> {
        if self.level == 0 {
            return None;
        }
        Some(match (self.x & 1, self.y & 1) {
            (0, 0) => Quadrant::LowerLeft,
            (1, 0) => Quadrant::LowerRight,
            (0, 1) => Quadrant::UpperLeft,
            _ => Quadrant::UpperRight,
        })
    }

    /// True if `other` lies in this tile's subtree (a tile contains itself).
    pub fn contains(self, other: TileId) -> bool {
        if other.level < self.level {
            return false;
        }
        let shift = other.level - self.level;
        other.x >> shift == self.x && other.y >> shift == self.y
    }

    /// Same cell under the opposite row-numbering convention. Involution:
    /// flipping twice yields the original id.
    pub fn flipped_y(self) -> TileId {
        TileId {
            level: self.level,
            x: self.x,
            y: Self::tiles_across(self.level) - 1 - self.y,
        }
    }

    pub fn pack(self) -> PackedTileKey {
        PackedTileKey::from_id(self)
    }
}

impl Ord for TileId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.x.cmp(&other.x))
            .then_with(|| self.y.cmp(&other.y))
    }
}

impl PartialOrd for TileId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:({},{})", self.level, self.x, self.y)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Child position within a parent tile, in tile-grid axes (x right,
/// y toward higher row numbers). Compass naming is left to callers since
/// the row direction is a per-source convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    LowerLeft,
    LowerRight,
    UpperLeft,
    UpperRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::LowerLeft,
        Quadrant::LowerRight,
        Quadrant::UpperLeft,
        Quadrant::UpperRight,
    ];

    const fn dx(self) -> u32 {
        match self {
            Quadrant::LowerLeft | Quadrant::UpperLeft => 0,
            Quadrant::LowerRight | Quadrant::UpperRight => 1,
        }
    }

    const fn dy(self) -> u32 {
        match self {
            Quadrant::LowerLeft | Quadrant::LowerRight => 0,
            Quadrant::UpperLeft | Quadrant::UpperRight => 1,
        }
    }
}

/// `TileId` packed into one `u64`:
///
/// | level (6) | x (29) | y (29) |
/// 63        58 57    29 28     0
///
/// Packed comparison order equals `TileId` order (level, then x, then y),
/// so the packed form can stand in wherever a cheap integer key is wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedTileKey(u64);

impl PackedTileKey {
    pub fn from_id(id: TileId) -> Self {
        if !id.is_valid() {
            panic!(
                "cannot pack invalid tile id {}:({},{})",
                id.level, id.x, id.y
            );
        }
        PackedTileKey(
            ((id.level as u64) & LEVEL_MASK) << LEVEL_SHIFT
                | ((id.x as u64) & X_MASK) << X_SHIFT
                | ((id.y as u64) & Y_MASK) << Y_SHIFT,
        )
    }

    pub fn unpack(self) -> TileId {
        TileId {
            level: ((self.0 >> LEVEL_SHIFT) & LEVEL_MASK) as u32,
            x: ((self.0 >> X_SHIFT) & X_MASK) as u32,
            y: ((self.0 >> Y_SHIFT) & Y_MASK) as u32,
        }
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}
