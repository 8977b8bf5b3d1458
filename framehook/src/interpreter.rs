use std::sync::Arc;

use log::{debug, trace};
use thiserror::Error;

use crate::{
    ExecutionToken, Frame, Function, Hook, Instruction, LayoutKind, Object, OperandStack, Patch,
    Program, Runtime, TraceControl, TraceEvent, Value, natives::type_error,
};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("execution token belongs to another runtime")]
    ForeignToken,
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("operand stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    #[error("operand stack underflow in `{function}`")]
    StackUnderflow { function: String },
    #[error("call depth limit of {limit} frames exceeded")]
    FrameLimit { limit: usize },
    #[error("`{function}` has no argument {index}")]
    MissingArgument { function: String, index: usize },
    #[error("uncaught exception: {0}")]
    Uncaught(Value),
}

enum Flow {
    Next,
    Return(Value),
    Raise(Value),
}

enum Step {
    Continue,
    Finished(Value),
}

/// Executes the functions of a [`Program`] and raises trace events.
pub struct Interpreter {
    runtime: Runtime,
    program: Arc<Program>,
    frames: Vec<Frame>,
    /// Operand stack shared by all frames in the base-pointer layout.
    shared_stack: Option<OperandStack>,
    hook: Option<Hook>,
}

impl Interpreter {
    pub fn new(runtime: Runtime, program: Arc<Program>) -> Self {
        let shared_stack = match runtime.config().layout {
            LayoutKind::StackTop => None,
            LayoutKind::BasePointer => Some(OperandStack::new(runtime.config().stack_size)),
        };
        Self {
            runtime,
            program,
            frames: Vec::new(),
            shared_stack,
            hook: None,
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    #[must_use]
    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    #[must_use]
    pub fn hook(&self) -> Option<&Hook> {
        self.hook.as_ref()
    }

    pub(crate) fn set_hook(&mut self, hook: Option<Hook>) {
        self.hook = hook;
    }

    /// Runs `entry` with no arguments until its frame returns.
    pub fn run(&mut self, token: &ExecutionToken<'_>, entry: &str) -> Result<Value, RuntimeError> {
        if !token.belongs_to(&self.runtime) {
            return Err(RuntimeError::ForeignToken);
        }
        let function = self
            .program
            .function(entry)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(entry.to_string()))?;

        let result = self.push_frame(function, Vec::new()).and_then(|()| self.execute());
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.frames.clear();
        if let Some(stack) = self.shared_stack.as_mut() {
            stack.truncate(0);
        }
    }

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        loop {
            if let Step::Finished(value) = self.step()? {
                return Ok(value);
            }
        }
    }

    fn step(&mut self) -> Result<Step, RuntimeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(Step::Finished(Value::nil()));
        };
        let function = frame.info.function.clone();
        let ip = frame.info.ip;

        let Some(instruction) = function.instruction(ip).cloned() else {
            return self.finish_frame(Value::nil());
        };

        let line = function.line(ip);
        if line.is_some() && line != frame.info.line {
            frame.info.line = line;
            if !frame.info.trace_disabled {
                self.fire(TraceEvent::Line, None);
            }
        }

        let trace_instructions = self
            .frames
            .last()
            .is_some_and(|frame| frame.info.trace_instructions && !frame.info.trace_disabled);
        if trace_instructions {
            trace!("{}:{ip} {instruction}", function.name);
            self.fire(TraceEvent::Instruction, None);
        }

        if let Some(frame) = self.frames.last_mut() {
            frame.info.ip += 1;
        }

        match self.execute_instruction(instruction)? {
            Flow::Next => Ok(Step::Continue),
            Flow::Return(value) => self.finish_frame(value),
            Flow::Raise(exception) => self.unwind(exception),
        }
    }

    fn execute_instruction(&mut self, instruction: Instruction) -> Result<Flow, RuntimeError> {
        match instruction {
            Instruction::PushConst { value } => self.push(value)?,
            Instruction::LoadFunction { index } => {
                let function = self.program.function_at(index).cloned().ok_or_else(|| {
                    RuntimeError::UnknownFunction(format!("#{index}"))
                })?;
                self.push(Value::function(function))?;
            }
            Instruction::LoadNative { native } => self.push(Value::native(native))?,
            Instruction::LoadArg { index } => {
                let value = self.current()?.info.args.get(index).cloned();
                let value = value.ok_or_else(|| RuntimeError::MissingArgument {
                    function: self.function_name(),
                    index,
                })?;
                self.push(value)?;
            }
            Instruction::Call { argc } => return self.call(argc),
            Instruction::Add | Instruction::Sub | Instruction::Mul => {
                let b = self.pop()?;
                let a = self.pop()?;
                return match arithmetic(&instruction, &a, &b) {
                    Ok(value) => self.push(value).map(|()| Flow::Next),
                    Err(exception) => Ok(Flow::Raise(exception)),
                };
            }
            Instruction::Eq => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::bool(a == b))?;
            }
            Instruction::Dup => {
                let value = self.pop()?;
                self.push(value.clone())?;
                self.push(value)?;
            }
            Instruction::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b)?;
                self.push(a)?;
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::Return => return Ok(Flow::Return(self.pop()?)),
            Instruction::Raise => return Ok(Flow::Raise(self.pop()?)),
        }
        Ok(Flow::Next)
    }

    fn call(&mut self, argc: usize) -> Result<Flow, RuntimeError> {
        let args = self.pop_n(argc)?;
        let callee = self.pop()?;

        match callee.object() {
            Object::Function(function) => {
                if function.arity != argc {
                    return Ok(Flow::Raise(type_error(format!(
                        "{} takes {} arguments, got {argc}",
                        function.name, function.arity
                    ))));
                }
                self.push_frame(function.clone(), args)?;
                Ok(Flow::Next)
            }
            Object::Native(native) => {
                self.fire(TraceEvent::NativeCall, Some(&callee));
                let result = if native.arity == argc {
                    (native.ptr)(&args)
                } else {
                    Err(type_error(format!(
                        "{} takes {} arguments, got {argc}",
                        native.name, native.arity
                    )))
                };
                self.native_outcome(result)
            }
            Object::Patch(patch) => {
                self.fire(TraceEvent::NativeCall, Some(&callee));
                let result = match patch {
                    Patch::Return(value) => Ok(value.clone()),
                    Patch::Raise(exception) => Err(exception.clone()),
                };
                self.native_outcome(result)
            }
            _ => Ok(Flow::Raise(type_error(format!(
                "{} is not callable",
                callee.type_name()
            )))),
        }
    }

    fn native_outcome(&mut self, result: Result<Value, Value>) -> Result<Flow, RuntimeError> {
        match result {
            Ok(value) => {
                self.fire(TraceEvent::NativeReturn, Some(&value));
                self.push(value)?;
                Ok(Flow::Next)
            }
            Err(exception) => {
                self.fire(TraceEvent::NativeException, Some(&exception));
                Ok(Flow::Raise(exception))
            }
        }
    }

    fn push_frame(&mut self, function: Arc<Function>, args: Vec<Value>) -> Result<(), RuntimeError> {
        let limit = self.runtime.config().max_frames;
        if self.frames.len() >= limit {
            return Err(RuntimeError::FrameLimit { limit });
        }

        let level = self.frames.len();
        let base = self.shared_stack.as_ref().map_or(0, OperandStack::depth);
        let mut frame = Frame::new(function, args, level, base);
        if self.shared_stack.is_none() {
            frame.stack = Some(OperandStack::new(self.runtime.config().stack_size));
        }
        debug!("enter {} at level {level}", frame.info.function.name);
        self.frames.push(frame);
        self.fire(TraceEvent::Call, None);
        Ok(())
    }

    /// Releases the current frame's operand values, reports the return and
    /// hands `value` to the caller.
    fn finish_frame(&mut self, value: Value) -> Result<Step, RuntimeError> {
        self.release_stack();
        self.fire(TraceEvent::Return, Some(&value));

        let Some(frame) = self.frames.pop() else {
            return Ok(Step::Finished(value));
        };
        debug!("leave {} at level {}", frame.info.function.name, frame.info.level);

        if self.frames.is_empty() {
            return Ok(Step::Finished(value));
        }
        self.push(value)?;
        Ok(Step::Continue)
    }

    /// Propagates `exception` through the call stack, reporting it in every
    /// frame it leaves.
    fn unwind(&mut self, exception: Value) -> Result<Step, RuntimeError> {
        while !self.frames.is_empty() {
            self.fire(TraceEvent::Exception, Some(&exception));
            self.release_stack();
            self.fire(TraceEvent::Return, None);
            if let Some(frame) = self.frames.pop() {
                debug!(
                    "unwind {} at level {}: {exception:?}",
                    frame.info.function.name, frame.info.level
                );
            }
        }
        Err(RuntimeError::Uncaught(exception))
    }

    fn release_stack(&mut self) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match self.shared_stack.as_mut() {
            Some(stack) => stack.truncate(frame.info.base),
            None => frame.stack = None,
        }
    }

    fn fire(&mut self, event: TraceEvent, arg: Option<&Value>) {
        let Some(hook) = self.hook.as_ref() else {
            return;
        };
        if !hook.mask.accepts(event) {
            return;
        }
        let Some(frame) = self.frames.last_mut() else {
            return;
        };

        let control = {
            let mut view = frame.view(self.shared_stack.as_mut());
            hook.tracer.lock().on_event(&mut view, event, arg)
        };
        if control == TraceControl::Disable {
            frame.info.trace_disabled = true;
        }
    }

    fn current(&self) -> Result<&Frame, RuntimeError> {
        self.frames.last().ok_or_else(|| RuntimeError::StackUnderflow {
            function: String::new(),
        })
    }

    fn function_name(&self) -> String {
        self.frames
            .last()
            .map(|frame| frame.info.function.name.clone())
            .unwrap_or_default()
    }

    fn underflow(&self) -> RuntimeError {
        RuntimeError::StackUnderflow {
            function: self.function_name(),
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(self.underflow());
        };
        match self.shared_stack.as_mut() {
            Some(stack) => stack.push(value),
            None => match frame.stack.as_mut() {
                Some(stack) => stack.push(value),
                None => Err(self.underflow()),
            },
        }
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        let popped = self.frames.last_mut().and_then(|frame| match self.shared_stack.as_mut() {
            Some(stack) if stack.depth() > frame.info.base => stack.pop(),
            Some(_) => None,
            None => frame.stack.as_mut().and_then(OperandStack::pop),
        });
        popped.ok_or_else(|| self.underflow())
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop()?);
        }
        values.reverse();
        Ok(values)
    }
}

fn arithmetic(instruction: &Instruction, a: &Value, b: &Value) -> Result<Value, Value> {
    let (Some(x), Some(y)) = (a.as_fixnum(), b.as_fixnum()) else {
        return Err(type_error(format!(
            "{instruction} of {} and {}",
            a.type_name(),
            b.type_name()
        )));
    };
    let result = match instruction {
        Instruction::Add => x.checked_add(y),
        Instruction::Sub => x.checked_sub(y),
        _ => x.checked_mul(y),
    };
    result
        .map(Value::fixnum)
        .ok_or_else(|| Value::string(format!("OverflowError: {instruction} of {x} and {y}")))
}
