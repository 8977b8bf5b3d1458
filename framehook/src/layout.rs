use crate::OperandStack;

/// Which frame layout an interpreter uses for its operand stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LayoutKind {
    /// Every frame owns its operand stack; the stack only exists while the
    /// frame is executing.
    #[default]
    StackTop,
    /// All frames of an interpreter share one operand stack, each frame
    /// starting at its base pointer.
    BasePointer,
}

/// Adapter between a frame and the slots of its operand stack.
///
/// Physical positions are indices into [`StackLayout::stack`]'s backing array.
/// The logical depth is the number of live slots that belong to the frame.
pub trait StackLayout {
    /// Operand stack backing the frame, `None` if it is not materialized.
    fn stack(&self) -> Option<&OperandStack>;

    fn stack_mut(&mut self) -> Option<&mut OperandStack>;

    /// First physical slot belonging to the frame.
    fn base(&self) -> usize;

    /// Physical index one past the topmost live slot.
    fn top(&self) -> Option<usize> {
        self.stack().map(OperandStack::depth)
    }

    /// Logical depth of the frame's operand stack.
    fn depth(&self) -> usize {
        self.stack()
            .map_or(0, |stack| stack.depth().saturating_sub(self.base()))
    }
}

#[derive(Debug)]
pub struct StackTopLayout<'a> {
    stack: Option<&'a mut OperandStack>,
}

impl<'a> StackTopLayout<'a> {
    pub fn new(stack: Option<&'a mut OperandStack>) -> Self {
        Self { stack }
    }
}

impl StackLayout for StackTopLayout<'_> {
    fn stack(&self) -> Option<&OperandStack> {
        self.stack.as_deref()
    }

    fn stack_mut(&mut self) -> Option<&mut OperandStack> {
        self.stack.as_deref_mut()
    }

    fn base(&self) -> usize {
        0
    }
}

#[derive(Debug)]
pub struct BasePointerLayout<'a> {
    stack: &'a mut OperandStack,
    base: usize,
}

impl<'a> BasePointerLayout<'a> {
    pub fn new(stack: &'a mut OperandStack, base: usize) -> Self {
        Self { stack, base }
    }
}

impl StackLayout for BasePointerLayout<'_> {
    fn stack(&self) -> Option<&OperandStack> {
        Some(&*self.stack)
    }

    fn stack_mut(&mut self) -> Option<&mut OperandStack> {
        Some(&mut *self.stack)
    }

    fn base(&self) -> usize {
        self.base
    }
}

/// Either adapter, picked at runtime from a [`LayoutKind`].
#[derive(Debug)]
pub enum FrameLayout<'a> {
    StackTop(StackTopLayout<'a>),
    BasePointer(BasePointerLayout<'a>),
}

impl FrameLayout<'_> {
    #[must_use]
    pub fn kind(&self) -> LayoutKind {
        match self {
            FrameLayout::StackTop(_) => LayoutKind::StackTop,
            FrameLayout::BasePointer(_) => LayoutKind::BasePointer,
        }
    }
}

impl StackLayout for FrameLayout<'_> {
    fn stack(&self) -> Option<&OperandStack> {
        match self {
            FrameLayout::StackTop(layout) => layout.stack(),
            FrameLayout::BasePointer(layout) => layout.stack(),
        }
    }

    fn stack_mut(&mut self) -> Option<&mut OperandStack> {
        match self {
            FrameLayout::StackTop(layout) => layout.stack_mut(),
            FrameLayout::BasePointer(layout) => layout.stack_mut(),
        }
    }

    fn base(&self) -> usize {
        match self {
            FrameLayout::StackTop(layout) => layout.base(),
            FrameLayout::BasePointer(layout) => layout.base(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn stack_top_without_stack_has_no_top() {
        let layout = StackTopLayout::new(None);
        assert_eq!(layout.top(), None);
        assert_eq!(layout.depth(), 0);
    }

    #[test]
    fn base_pointer_depth_excludes_caller_slots() {
        let mut stack = OperandStack::from_values(8, (1..=5).map(Value::fixnum));
        let layout = BasePointerLayout::new(&mut stack, 3);
        assert_eq!(layout.top(), Some(5));
        assert_eq!(layout.depth(), 2);
    }

    #[test]
    fn base_above_top_reports_empty_frame() {
        let mut stack = OperandStack::from_values(8, (1..=2).map(Value::fixnum));
        let layout = BasePointerLayout::new(&mut stack, 4);
        assert_eq!(layout.depth(), 0);
    }
}
