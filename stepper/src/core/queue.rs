//! Ordered step queue with a cursor.

use crate::core::types::StepDescriptor;

/// Pending steps of the current unit plus the position of the next one.
///
/// Invariant: `cursor <= len`. Insertions never land before the cursor, so
/// steps that already ran keep their positions.
#[derive(Debug, Default)]
pub struct StepQueue {
    steps: Vec<StepDescriptor>,
    cursor: usize,
}

impl StepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of steps at or after the cursor.
    pub fn remaining(&self) -> usize {
        self.steps.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// Insert `steps` starting at `index`, clamped to `cursor..=len`.
    ///
    /// Returns the number of inserted steps.
    pub fn insert_at<I>(&mut self, index: usize, steps: I) -> usize
    where
        I: IntoIterator<Item = StepDescriptor>,
    {
        let at = index.clamp(self.cursor, self.steps.len());
        let before = self.steps.len();
        self.steps.splice(at..at, steps);
        self.steps.len() - before
    }

    pub fn current(&self) -> Option<&StepDescriptor> {
        self.steps.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut StepDescriptor> {
        self.steps.get_mut(self.cursor)
    }

    /// Move past the current step.
    pub fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    /// Drop every step and rewind.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(names: &[&str]) -> Vec<StepDescriptor> {
        names
            .iter()
            .map(|name| StepDescriptor::Symbolic((*name).to_string()))
            .collect()
    }

    fn labels(queue: &StepQueue) -> Vec<String> {
        queue.steps.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn insert_after_cursor_keeps_later_steps_behind() {
        let mut queue = StepQueue::new();
        queue.insert_at(0, symbols(&["a", "b", "c"]));
        queue.advance();
        // "b" is running; new steps go right after it.
        queue.insert_at(queue.cursor() + 1, symbols(&["x", "y"]));
        assert_eq!(labels(&queue), vec!["a", "b", "x", "y", "c"]);
        assert_eq!(queue.cursor(), 1);
    }

    #[test]
    fn insert_never_lands_before_cursor() {
        let mut queue = StepQueue::new();
        queue.insert_at(0, symbols(&["a", "b"]));
        queue.advance();
        queue.insert_at(0, symbols(&["x"]));
        assert_eq!(labels(&queue), vec!["a", "x", "b"]);
    }

    #[test]
    fn insert_past_end_appends() {
        let mut queue = StepQueue::new();
        queue.insert_at(0, symbols(&["a"]));
        let inserted = queue.insert_at(10, symbols(&["b"]));
        assert_eq!(inserted, 1);
        assert_eq!(labels(&queue), vec!["a", "b"]);
    }

    #[test]
    fn advance_stops_at_len() {
        let mut queue = StepQueue::new();
        queue.insert_at(0, symbols(&["a"]));
        queue.advance();
        queue.advance();
        assert_eq!(queue.cursor(), 1);
        assert!(queue.is_exhausted());
        assert_eq!(queue.remaining(), 0);
        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.cursor(), 0);
    }
}
