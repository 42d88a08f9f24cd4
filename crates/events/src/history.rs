//! Undo/redo history: bounded stacks of inverse-record batches.

use std::collections::VecDeque;

use nodebus_core::{BusError, BusResult};

use crate::record::EventRecord;

/// Inverse records of one logical action, in the order they were recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    records: Vec<EventRecord>,
}

impl UndoEntry {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    /// Records in recording order.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records in the order they have to be replayed (reverse of recording).
    pub fn replay_order(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct History {
    undo: VecDeque<UndoEntry>,
    redo: Vec<UndoEntry>,
    /// `None` = unbounded.
    max_undo: Option<usize>,
}

impl History {
    /// History bounded to `max_undo` undo entries; negative means unbounded.
    pub fn new(max_undo: i64) -> Self {
        let mut history = Self::default();
        history.set_bound(max_undo);
        history
    }

    pub fn set_bound(&mut self, max_undo: i64) {
        self.max_undo = usize::try_from(max_undo).ok();
        self.evict();
    }

    pub fn bound(&self) -> Option<usize> {
        self.max_undo
    }

    /// Push the entry of a fresh action; invalidates the redo stack.
    pub fn record(&mut self, entry: UndoEntry) {
        self.redo.clear();
        self.push_undo(entry);
    }

    /// Push onto the undo stack without touching the redo stack (used by redo replays).
    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.undo.push_back(entry);
        self.evict();
    }

    pub fn push_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn pop_undo(&mut self) -> BusResult<UndoEntry> {
        self.undo.pop_back().ok_or(BusError::EmptyUndoStack)
    }

    pub fn pop_redo(&mut self) -> BusResult<UndoEntry> {
        self.redo.pop().ok_or(BusError::EmptyRedoStack)
    }

    /// Put back an entry popped by [`History::pop_undo`] whose replay could not start.
    pub fn restore_undo(&mut self, entry: UndoEntry) {
        self.undo.push_back(entry);
    }

    pub fn restore_redo(&mut self, entry: UndoEntry) {
        self.redo.push(entry);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    // Oldest entries go first.
    fn evict(&mut self) {
        if let Some(max) = self.max_undo {
            while self.undo.len() > max {
                self.undo.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Argument, Target};
    use nodebus_core::{EventId, NodeId};
    use proptest::prelude::*;
    use serde_json::json;

    fn entry(value: i64) -> UndoEntry {
        UndoEntry::new(vec![EventRecord::new(
            EventId::from("SET_VALUE"),
            NodeId::from("COUNTER"),
            Target::Node(NodeId::from("COUNTER")),
            vec![Argument {
                name: "value".to_string(),
                value: json!(value),
            }],
        )])
    }

    fn top_value(entry: &UndoEntry) -> i64 {
        entry.records()[0].arg_as("value").unwrap()
    }

    #[test]
    fn record_clears_redo() {
        let mut history = History::new(10);
        history.record(entry(1));
        history.push_redo(entry(2));
        history.push_redo(entry(3));
        assert_eq!(history.redo_depth(), 2);

        history.record(entry(4));
        assert_eq!(history.redo_depth(), 0);
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn push_undo_keeps_redo() {
        let mut history = History::new(10);
        history.push_redo(entry(1));
        history.push_undo(entry(2));
        assert_eq!(history.redo_depth(), 1);
    }

    #[test]
    fn oldest_entry_is_dropped_on_overflow() {
        let mut history = History::new(2);
        history.record(entry(1));
        history.record(entry(2));
        history.record(entry(3));

        assert_eq!(history.undo_depth(), 2);
        assert_eq!(top_value(&history.pop_undo().unwrap()), 3);
        assert_eq!(top_value(&history.pop_undo().unwrap()), 2);
        assert!(matches!(history.pop_undo(), Err(BusError::EmptyUndoStack)));
    }

    #[test]
    fn negative_bound_is_unbounded() {
        let mut history = History::new(-1);
        assert_eq!(history.bound(), None);
        for i in 0..5_000 {
            history.record(entry(i));
        }
        assert_eq!(history.undo_depth(), 5_000);
    }

    #[test]
    fn tightening_the_bound_evicts() {
        let mut history = History::new(-1);
        for i in 0..5 {
            history.record(entry(i));
        }
        history.set_bound(3);
        assert_eq!(history.undo_depth(), 3);
    }

    #[test]
    fn empty_stacks() {
        let mut history = History::new(10);
        assert!(matches!(history.pop_undo(), Err(BusError::EmptyUndoStack)));
        assert!(matches!(history.pop_redo(), Err(BusError::EmptyRedoStack)));
    }

    #[test]
    fn replay_order_is_reverse_of_recording() {
        let mut records = entry(1).records().to_vec();
        records.extend(entry(2).records().iter().cloned());
        let combined = UndoEntry::new(records);
        let order: Vec<i64> = combined
            .replay_order()
            .map(|r| r.arg_as::<i64>("value").unwrap())
            .collect();
        assert_eq!(order, vec![2, 1]);
    }

    proptest! {
        #[test]
        fn undo_depth_never_exceeds_bound(bound in 0i64..20, pushes in 0usize..100) {
            let mut history = History::new(bound);
            for i in 0..pushes {
                history.record(entry(i as i64));
                prop_assert!(history.undo_depth() <= bound as usize);
            }
        }
    }
}
