use std::sync::Arc;

use crate::{
    AccessError, BasePointerLayout, FrameLayout, Function, Instruction, OperandStack,
    StackLayout, StackTopLayout, Value, access,
};

/// Bookkeeping of one active invocation.
#[derive(Debug)]
pub struct FrameInfo {
    pub function: Arc<Function>,
    pub args: Vec<Value>,
    /// Index of the next instruction to execute.
    pub ip: usize,
    pub line: Option<u32>,
    /// Position of the frame in the call stack, the entry frame is 0.
    pub level: usize,
    /// First slot of the shared operand stack owned by this frame.
    pub base: usize,
    pub trace_instructions: bool,
    pub trace_disabled: bool,
}

#[derive(Debug)]
pub struct Frame {
    pub info: FrameInfo,
    /// Own operand stack for the stack-top layout, `None` while unmaterialized.
    pub stack: Option<OperandStack>,
}

impl Frame {
    pub fn new(function: Arc<Function>, args: Vec<Value>, level: usize, base: usize) -> Self {
        Self {
            info: FrameInfo {
                function,
                args,
                ip: 0,
                line: None,
                level,
                base,
                trace_instructions: false,
                trace_disabled: false,
            },
            stack: None,
        }
    }

    /// Borrows the frame together with its operand stack. `shared` is the
    /// interpreter wide stack of the base-pointer layout.
    pub fn view<'a>(&'a mut self, shared: Option<&'a mut OperandStack>) -> FrameRef<'a> {
        let Frame { info, stack } = self;
        let layout = match shared {
            Some(shared) => FrameLayout::BasePointer(BasePointerLayout::new(shared, info.base)),
            None => FrameLayout::StackTop(StackTopLayout::new(stack.as_mut())),
        };
        FrameRef { info, layout }
    }
}

/// Transient, non-owning access to an active frame.
///
/// Handed to tracers for the duration of one event.
#[derive(Debug)]
pub struct FrameRef<'a> {
    info: &'a mut FrameInfo,
    layout: FrameLayout<'a>,
}

impl FrameRef<'_> {
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.info.function.name
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.info.args
    }

    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.info.line
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.info.level
    }

    #[must_use]
    pub fn ip(&self) -> usize {
        self.info.ip
    }

    /// Instruction about to execute.
    #[must_use]
    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.info.function.instruction(self.info.ip)
    }

    #[must_use]
    pub fn trace_instructions(&self) -> bool {
        self.info.trace_instructions
    }

    /// Enables or disables instruction events for this frame.
    pub fn set_trace_instructions(&mut self, enabled: bool) {
        self.info.trace_instructions = enabled;
    }

    #[must_use]
    pub fn layout(&self) -> &FrameLayout<'_> {
        &self.layout
    }

    pub fn peek(&self, n: usize) -> Result<Value, AccessError> {
        access::peek(self, n)
    }

    pub fn overwrite(&mut self, n: usize, value: &Value) -> Result<(), AccessError> {
        access::overwrite(self, n, value)
    }
}

impl StackLayout for FrameRef<'_> {
    fn stack(&self) -> Option<&OperandStack> {
        self.layout.stack()
    }

    fn stack_mut(&mut self) -> Option<&mut OperandStack> {
        self.layout.stack_mut()
    }

    fn base(&self) -> usize {
        self.layout.base()
    }
}
