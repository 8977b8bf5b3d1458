//! Reading and replacing values on a frame's operand stack.
//!
//! Depths are 1-based and counted from the top: depth 1 is the topmost live
//! value of the frame. A depth is valid when `1 <= n <= depth`, where `depth`
//! is the frame's logical depth. Slots outside the frame's live region are
//! never addressable, whatever the physical capacity of the backing array.

use log::debug;
use thiserror::Error;

use crate::{StackLayout, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("depth must be at least 1")]
    InvalidDepth,
    #[error("frame has no active operand stack")]
    NoActiveStack,
    #[error("depth {n} is out of range for a stack of depth {depth}")]
    DepthOutOfRange { n: usize, depth: usize },
    #[error("slot at depth {n} is empty")]
    EmptySlot { n: usize },
}

/// Translates a 1-based depth into a physical slot index.
///
/// `top` is the physical index one past the topmost live slot and `depth`
/// the logical depth of the frame owning that region.
pub fn slot_index(top: usize, depth: usize, n: usize) -> Result<usize, AccessError> {
    if n == 0 {
        return Err(AccessError::InvalidDepth);
    }
    if n > depth || depth > top {
        return Err(AccessError::DepthOutOfRange { n, depth });
    }
    Ok(top - n)
}

fn locate<L: StackLayout + ?Sized>(layout: &L, n: usize) -> Result<usize, AccessError> {
    let top = layout.top().ok_or(AccessError::NoActiveStack)?;
    slot_index(top, layout.depth(), n)
}

/// Returns a new handle to the value `n` slots from the top.
pub fn peek<L: StackLayout + ?Sized>(layout: &L, n: usize) -> Result<Value, AccessError> {
    let result = locate(layout, n).and_then(|index| {
        layout
            .stack()
            .and_then(|stack| stack.slots().get(index))
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(AccessError::EmptySlot { n })
    });
    if let Err(err) = &result {
        debug!("peek at depth {n} failed: {err}");
    }
    result
}

/// Replaces the value `n` slots from the top with a new handle to `value`.
///
/// The slot's previous handle is released in the same step. An empty slot in
/// range is filled.
pub fn overwrite<L: StackLayout + ?Sized>(
    layout: &mut L,
    n: usize,
    value: &Value,
) -> Result<(), AccessError> {
    let result = locate(layout, n).and_then(|index| {
        let slot = layout
            .stack_mut()
            .and_then(|stack| stack.slot_mut(index))
            .ok_or(AccessError::NoActiveStack)?;
        let previous = std::mem::replace(slot, Some(value.clone()));
        drop(previous);
        Ok(())
    });
    if let Err(err) = &result {
        debug!("overwrite at depth {n} failed: {err}");
    }
    result
}

/// [`peek`] that answers `None` instead of an error.
pub fn peek_lenient<L: StackLayout + ?Sized>(layout: &L, n: usize) -> Option<Value> {
    peek(layout, n).ok()
}

/// [`overwrite`] that ignores requests it cannot satisfy.
pub fn overwrite_lenient<L: StackLayout + ?Sized>(layout: &mut L, n: usize, value: &Value) {
    let _ = overwrite(layout, n, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BasePointerLayout, OperandStack, StackTopLayout};

    fn abc() -> (Value, Value, Value) {
        (Value::string("A"), Value::string("B"), Value::string("C"))
    }

    #[test]
    fn slot_index_bounds() {
        assert_eq!(slot_index(3, 3, 1), Ok(2));
        assert_eq!(slot_index(3, 3, 3), Ok(0));
        assert_eq!(slot_index(3, 3, 0), Err(AccessError::InvalidDepth));
        assert_eq!(
            slot_index(3, 3, 4),
            Err(AccessError::DepthOutOfRange { n: 4, depth: 3 })
        );
        assert_eq!(slot_index(7, 2, 2), Ok(5));
        assert_eq!(
            slot_index(7, 2, 3),
            Err(AccessError::DepthOutOfRange { n: 3, depth: 2 })
        );
    }

    #[test]
    fn peek_overwrite_scenario() {
        let (a, b, c) = abc();
        let mut stack = OperandStack::from_values(8, [a.clone(), b.clone(), c.clone()]);
        let mut layout = StackTopLayout::new(Some(&mut stack));

        let top = peek(&layout, 1).unwrap();
        assert!(top.same(&c));
        assert_eq!(c.ref_count(), 3);
        drop(top);

        let d = Value::string("D");
        assert_eq!(b.ref_count(), 2);
        overwrite(&mut layout, 2, &d).unwrap();
        assert_eq!(b.ref_count(), 1);
        assert_eq!(d.ref_count(), 2);

        let second = peek(&layout, 2).unwrap();
        assert!(second.same(&d));
        drop(second);

        let counts = (a.ref_count(), b.ref_count(), c.ref_count(), d.ref_count());
        assert_eq!(
            peek(&layout, 4),
            Err(AccessError::DepthOutOfRange { n: 4, depth: 3 })
        );
        assert_eq!(
            counts,
            (a.ref_count(), b.ref_count(), c.ref_count(), d.ref_count())
        );
    }

    #[test]
    fn out_of_range_overwrite_mutates_nothing() {
        let (a, b, c) = abc();
        let mut stack = OperandStack::from_values(8, [a.clone(), b.clone(), c.clone()]);
        let mut layout = StackTopLayout::new(Some(&mut stack));
        let d = Value::string("D");

        assert_eq!(
            overwrite(&mut layout, 4, &d),
            Err(AccessError::DepthOutOfRange { n: 4, depth: 3 })
        );
        assert_eq!(overwrite(&mut layout, 0, &d), Err(AccessError::InvalidDepth));
        assert_eq!(d.ref_count(), 1);
        assert!(stack.stack().iter().flatten().zip([&a, &b, &c]).all(|(x, y)| x.same(y)));
        assert!(stack.slots()[3..].iter().all(Option::is_none));
    }

    #[test]
    fn unmaterialized_stack_reports_no_active_stack() {
        let mut layout = StackTopLayout::new(None);
        let value = Value::fixnum(1);
        assert_eq!(peek(&layout, 1), Err(AccessError::NoActiveStack));
        assert_eq!(
            overwrite(&mut layout, 1, &value),
            Err(AccessError::NoActiveStack)
        );
        assert_eq!(value.ref_count(), 1);
        assert!(peek_lenient(&layout, 1).is_none());
    }

    #[test]
    fn base_pointer_frame_cannot_reach_caller_slots() {
        let (a, b, c) = abc();
        let mut stack = OperandStack::from_values(8, [a.clone(), b.clone(), c.clone()]);
        let mut layout = BasePointerLayout::new(&mut stack, 1);

        assert!(peek(&layout, 2).unwrap().same(&b));
        assert_eq!(
            peek(&layout, 3),
            Err(AccessError::DepthOutOfRange { n: 3, depth: 2 })
        );

        let d = Value::string("D");
        overwrite(&mut layout, 1, &d).unwrap();
        assert!(peek(&layout, 1).unwrap().same(&d));
        assert_eq!(c.ref_count(), 1);
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn lenient_overwrite_ignores_bad_depths() {
        let mut stack = OperandStack::from_values(4, [Value::fixnum(1)]);
        let mut layout = StackTopLayout::new(Some(&mut stack));
        overwrite_lenient(&mut layout, 5, &Value::fixnum(2));
        assert_eq!(peek(&layout, 1), Ok(Value::fixnum(1)));
    }
}
