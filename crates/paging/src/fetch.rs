//! Prioritized fetch dispatch bookkeeping.
//!
//! Requests wait in a max-heap ordered by screen importance; the layer
//! pops from it only while it has an in-flight budget to spend. A
//! request whose tile was unloaded while waiting is skipped at pop time
//! rather than hunted down in the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tile_model::TileId;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FetchRequest {
    pub id: TileId,
    pub frame: i32,
    pub importance: f64,
    sequence: u64,
}

impl PartialEq for FetchRequest {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for FetchRequest {}

impl PartialOrd for FetchRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FetchRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher importance wins; earlier submission breaks ties. The
        // importance values are computed from finite view state, never NaN.
        self.importance
            .partial_cmp(&other.importance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
pub(crate) struct FetchQueue {
    heap: BinaryHeap<FetchRequest>,
    next_sequence: u64,
}

impl FetchQueue {
    pub fn new() -> Self {
        FetchQueue::default()
    }

    pub fn push(&mut self, id: TileId, frame: i32, importance: f64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(FetchRequest {
            id,
            frame,
            importance,
            sequence,
        });
    }

    pub fn pop(&mut self) -> Option<FetchRequest> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::FetchQueue;
    use tile_model::TileId;

    #[test]
    fn pops_highest_importance_first() {
        let mut queue = FetchQueue::new();
        queue.push(TileId::new(2, 0, 0), -1, 0.5);
        queue.push(TileId::new(0, 0, 0), -1, 4.0);
        queue.push(TileId::new(1, 1, 1), -1, 2.0);

        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(0, 0, 0)));
        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(1, 1, 1)));
        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(2, 0, 0)));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn equal_importance_preserves_submission_order() {
        let mut queue = FetchQueue::new();
        queue.push(TileId::new(3, 0, 0), -1, 1.0);
        queue.push(TileId::new(3, 1, 0), -1, 1.0);
        queue.push(TileId::new(3, 2, 0), -1, 1.0);

        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(3, 0, 0)));
        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(3, 1, 0)));
        assert_eq!(queue.pop().map(|r| r.id), Some(TileId::new(3, 2, 0)));
    }
}
