use std::{fmt, sync::Arc};

use log::{debug, error};
use parking_lot::{Mutex, MutexGuard};

use crate::{ExecutionToken, FrameRef, Interpreter, StackLayout, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    Call,
    Line,
    Return,
    Exception,
    NativeCall,
    NativeReturn,
    NativeException,
    Instruction,
}

impl TraceEvent {
    pub const ALL: [TraceEvent; 8] = [
        TraceEvent::Call,
        TraceEvent::Line,
        TraceEvent::Return,
        TraceEvent::Exception,
        TraceEvent::NativeCall,
        TraceEvent::NativeReturn,
        TraceEvent::NativeException,
        TraceEvent::Instruction,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TraceEvent::Call => "call",
            TraceEvent::Line => "line",
            TraceEvent::Return => "return",
            TraceEvent::Exception => "exception",
            TraceEvent::NativeCall => "native_call",
            TraceEvent::NativeReturn => "native_return",
            TraceEvent::NativeException => "native_exception",
            TraceEvent::Instruction => "instruction",
        }
    }

    /// Delivered to the line level trace hook.
    #[must_use]
    pub fn is_trace(self) -> bool {
        matches!(
            self,
            TraceEvent::Call
                | TraceEvent::Line
                | TraceEvent::Return
                | TraceEvent::Exception
                | TraceEvent::Instruction
        )
    }

    /// Delivered to the call level profile hook.
    #[must_use]
    pub fn is_profile(self) -> bool {
        matches!(
            self,
            TraceEvent::Call
                | TraceEvent::Return
                | TraceEvent::NativeCall
                | TraceEvent::NativeReturn
                | TraceEvent::NativeException
        )
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceControl {
    Continue,
    /// Stop line and instruction events for the current frame.
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookMask {
    pub trace: bool,
    pub profile: bool,
}

impl HookMask {
    pub const TRACE: Self = Self {
        trace: true,
        profile: false,
    };
    pub const PROFILE: Self = Self {
        trace: false,
        profile: true,
    };
    pub const BOTH: Self = Self {
        trace: true,
        profile: true,
    };

    #[must_use]
    pub fn accepts(self, event: TraceEvent) -> bool {
        (self.trace && event.is_trace()) || (self.profile && event.is_profile())
    }
}

/// Callback invoked by the interpreter for execution events.
///
/// `arg` is the callee for `NativeCall`, the returned value for `Return` and
/// `NativeReturn`, and the raised value for `Exception` and `NativeException`.
pub trait Tracer {
    fn on_event(
        &mut self,
        frame: &mut FrameRef<'_>,
        event: TraceEvent,
        arg: Option<&Value>,
    ) -> TraceControl;
}

pub type SharedTracer = Arc<Mutex<dyn Tracer + Send>>;

#[derive(Clone)]
pub struct Hook {
    pub tracer: SharedTracer,
    pub mask: HookMask,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("mask", &self.mask).finish_non_exhaustive()
    }
}

/// Logs every event and turns on instruction events for each frame it sees.
#[derive(Debug, Default)]
pub struct DiagnosticTracer {
    events: usize,
}

impl DiagnosticTracer {
    #[must_use]
    pub fn events(&self) -> usize {
        self.events
    }
}

impl Tracer for DiagnosticTracer {
    fn on_event(
        &mut self,
        frame: &mut FrameRef<'_>,
        event: TraceEvent,
        arg: Option<&Value>,
    ) -> TraceControl {
        self.events += 1;
        frame.set_trace_instructions(true);

        match arg {
            Some(arg) => debug!(
                "{event} in {} line {:?}: {arg:?}",
                frame.function_name(),
                frame.line()
            ),
            None => debug!("{event} in {} line {:?}", frame.function_name(), frame.line()),
        }

        if event == TraceEvent::NativeReturn {
            debug!(
                "native return in {}, stack top at {:?}",
                frame.function_name(),
                frame.top()
            );
        }

        TraceControl::Continue
    }
}

/// An installed tracer.
///
/// The session keeps a handle to the tracer so its state can be inspected
/// while and after it runs. Dropping the session leaves the tracer installed;
/// call [`TracerSession::uninstall`] to remove it.
pub struct TracerSession<T> {
    tracer: Arc<Mutex<T>>,
    installed: bool,
}

impl<T: Tracer + Send + 'static> TracerSession<T> {
    /// Installs `tracer` as both the trace and the profile hook.
    pub fn install(interpreter: &mut Interpreter, token: &ExecutionToken<'_>, tracer: T) -> Self {
        Self::install_with(interpreter, token, tracer, HookMask::BOTH)
    }

    /// Installs `tracer` for the event classes selected by `mask`.
    ///
    /// Aborts the process if `token` was issued by another runtime.
    pub fn install_with(
        interpreter: &mut Interpreter,
        token: &ExecutionToken<'_>,
        tracer: T,
        mask: HookMask,
    ) -> Self {
        if !token.belongs_to(interpreter.runtime()) {
            error!(
                "tracer installed with execution token of runtime {} on runtime {}",
                token.runtime_id(),
                interpreter.runtime().id()
            );
            std::process::abort();
        }

        let tracer = Arc::new(Mutex::new(tracer));
        let shared: SharedTracer = tracer.clone();
        interpreter.set_hook(Some(Hook {
            tracer: shared,
            mask,
        }));
        debug!("tracer installed on runtime {}", token.runtime_id());

        Self {
            tracer,
            installed: true,
        }
    }
}

impl<T: Tracer + Send + 'static> TracerSession<T> {
    /// Removes the tracer if it is still the interpreter's hook. Returns
    /// whether it was.
    pub fn uninstall(&mut self, interpreter: &mut Interpreter, _token: &ExecutionToken<'_>) -> bool {
        if !self.installed {
            return false;
        }
        self.installed = false;

        let ours = interpreter.hook().is_some_and(|hook| {
            std::ptr::addr_eq(Arc::as_ptr(&hook.tracer), Arc::as_ptr(&self.tracer))
        });
        if ours {
            interpreter.set_hook(None);
            debug!("tracer uninstalled");
        }
        ours
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn tracer(&self) -> MutexGuard<'_, T> {
        self.tracer.lock()
    }
}
