use crate::{RuntimeError, Value};

/// Fixed capacity operand stack.
///
/// The backing array is allocated up front; `depth` tracks how many slots are
/// live. Slots at or above `depth` are always empty, so a value is only kept
/// alive by the live region.
#[derive(Debug, Clone)]
pub struct OperandStack {
    slots: Vec<Option<Value>>,
    depth: usize,
}

impl OperandStack {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            depth: 0,
        }
    }

    #[must_use]
    pub fn from_values(capacity: usize, values: impl IntoIterator<Item = Value>) -> Self {
        let mut stack = Self::new(capacity);
        for value in values {
            if stack.push(value).is_err() {
                break;
            }
        }
        stack
    }

    /// Returns the live portion of the stack, bottom first
    #[must_use]
    pub fn stack(&self) -> &[Option<Value>] {
        &self.slots[..self.depth]
    }

    /// Physical backing array including the dead region
    #[must_use]
    pub fn slots(&self) -> &[Option<Value>] {
        &self.slots
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Option<Value>> {
        self.slots.get_mut(index)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        let capacity = self.slots.len();
        let slot = self
            .slots
            .get_mut(self.depth)
            .ok_or(RuntimeError::StackOverflow { capacity })?;
        *slot = Some(value);
        self.depth += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.depth == 0 {
            return None;
        }
        self.depth -= 1;
        self.slots[self.depth].take()
    }

    /// Gets the nth value from the top of the stack (0-indexed)
    #[must_use]
    pub fn get_nth(&self, n: usize) -> Option<&Value> {
        if n >= self.depth {
            return None;
        }
        self.slots[self.depth - 1 - n].as_ref()
    }

    /// Removes the top n values, bottom first.
    pub fn pop_slice(&mut self, n: usize) -> Option<Vec<Value>> {
        if self.depth < n {
            return None;
        }
        let start = self.depth - n;
        let values = self.slots[start..self.depth]
            .iter_mut()
            .map(Option::take)
            .collect::<Option<Vec<_>>>();
        self.depth = start;
        values
    }

    /// Drops every value above `depth`.
    pub fn truncate(&mut self, depth: usize) {
        while self.depth > depth {
            self.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_track_depth() {
        let mut stack = OperandStack::new(4);
        stack.push(Value::fixnum(1)).unwrap();
        stack.push(Value::fixnum(2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.get_nth(0), Some(&Value::fixnum(2)));
        assert_eq!(stack.get_nth(1), Some(&Value::fixnum(1)));
        assert_eq!(stack.get_nth(2), None);

        assert_eq!(stack.pop(), Some(Value::fixnum(2)));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn push_past_capacity_overflows() {
        let mut stack = OperandStack::new(1);
        stack.push(Value::nil()).unwrap();
        assert!(matches!(
            stack.push(Value::nil()),
            Err(RuntimeError::StackOverflow { capacity: 1 })
        ));
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn popped_slots_release_their_reference() {
        let value = Value::string("x");
        let mut stack = OperandStack::new(2);
        stack.push(value.clone()).unwrap();
        assert_eq!(value.ref_count(), 2);

        drop(stack.pop());
        assert_eq!(value.ref_count(), 1);
        assert!(stack.slots()[0].is_none());
    }

    #[test]
    fn pop_slice_returns_bottom_first() {
        let mut stack =
            OperandStack::from_values(8, (1..=4).map(Value::fixnum));
        let values = stack.pop_slice(3).unwrap();
        assert_eq!(
            values,
            vec![Value::fixnum(2), Value::fixnum(3), Value::fixnum(4)]
        );
        assert_eq!(stack.depth(), 1);
        assert!(stack.pop_slice(2).is_none());
    }

    #[test]
    fn truncate_drops_the_upper_region() {
        let mut stack = OperandStack::from_values(8, (1..=5).map(Value::fixnum));
        stack.truncate(2);
        assert_eq!(stack.depth(), 2);
        assert!(stack.slots()[2..].iter().all(Option::is_none));
    }
}
