//! Line and instruction stepping over a replayed run.
//!
//! The program runs on its own thread under a [`Stepper`], which answers
//! outside calls from records like the [`Replayer`] and pauses at line or
//! instruction boundaries. Every pause hands a [`FrameSnapshot`] to the
//! controlling [`Debugger`] and blocks until it asks for the next step.

use std::{
    fmt,
    io::{self, BufRead},
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    FrameRef, Program, RecordsError, Replayer, Runtime, RuntimeConfig, RuntimeError,
    StackLayout, TraceControl, TraceEvent, Tracer, TracerSession, Value,
};

/// Rows shown around the current line by the `source` command.
pub const SOURCE_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Run until execution reaches another source line.
    Line,
    /// Run until the next instruction.
    Instruction,
}

/// State of the frame a paused program stopped in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub function: String,
    pub level: usize,
    pub line: Option<u32>,
    pub ip: usize,
    /// Instruction about to execute.
    pub instruction: Option<String>,
    pub args: Vec<String>,
    /// Live operand values of the frame, bottom first.
    pub stack: Vec<String>,
}

impl FrameSnapshot {
    #[must_use]
    pub fn capture(frame: &FrameRef<'_>) -> Self {
        let stack = frame
            .stack()
            .map(|stack| {
                let live = stack.stack();
                live[frame.base().min(live.len())..]
                    .iter()
                    .map(|slot| match slot {
                        Some(value) => format!("{value:?}"),
                        None => "<empty>".to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            function: frame.function_name().to_string(),
            level: frame.level(),
            line: frame.line(),
            ip: frame.ip(),
            instruction: frame
                .current_instruction()
                .map(|instruction| instruction.to_string()),
            args: frame.args().iter().map(|arg| format!("{arg:?}")).collect(),
            stack,
        }
    }
}

impl fmt::Display for FrameSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at level {}", self.function, self.level)?;
        if let Some(line) = self.line {
            write!(f, ", line {line}")?;
        }
        write!(f, ", ip {}", self.ip)
    }
}

/// Tracer that pauses the program and delegates every event to `inner`.
#[derive(Debug)]
pub struct Stepper<T> {
    inner: T,
    /// `None` once the controller is gone; the program then runs freely.
    mode: Option<StepMode>,
    /// Level and ip of the last pause.
    last: Option<(usize, usize)>,
    pauses: Sender<FrameSnapshot>,
    resume: Receiver<StepMode>,
}

impl<T: Tracer> Stepper<T> {
    /// Creates a stepper that stops at the first line event.
    pub fn new(inner: T, pauses: Sender<FrameSnapshot>, resume: Receiver<StepMode>) -> Self {
        Self {
            inner,
            mode: Some(StepMode::Line),
            last: None,
            pauses,
            resume,
        }
    }

    pub fn inner(&mut self) -> &mut T {
        &mut self.inner
    }

    fn pause(&mut self, frame: &FrameRef<'_>, here: (usize, usize)) {
        self.last = Some(here);
        let snapshot = FrameSnapshot::capture(frame);
        debug!("paused in {snapshot}");
        if self.pauses.send(snapshot).is_err() {
            self.mode = None;
            return;
        }
        self.mode = self.resume.recv().ok();
    }
}

impl<T: Tracer> Tracer for Stepper<T> {
    fn on_event(
        &mut self,
        frame: &mut FrameRef<'_>,
        event: TraceEvent,
        arg: Option<&Value>,
    ) -> TraceControl {
        frame.set_trace_instructions(true);
        let here = (frame.level(), frame.ip());

        match event {
            TraceEvent::Line if self.mode == Some(StepMode::Line) => self.pause(frame, here),
            TraceEvent::Instruction => {
                // A line pause already stopped before this instruction.
                let repeated = self.last.take() == Some(here);
                if self.mode == Some(StepMode::Instruction) && !repeated {
                    self.pause(frame, here);
                }
            }
            _ => {}
        }

        self.inner.on_event(frame, event, arg)
    }
}

/// How a debugged program ended.
#[derive(Debug)]
pub struct DebugOutcome {
    pub result: Result<Value, RuntimeError>,
    /// Outside calls answered from records.
    pub replayed: Result<usize, RecordsError>,
}

/// Controller of a program running under a [`Stepper`].
#[derive(Debug)]
pub struct Debugger {
    pauses: Receiver<FrameSnapshot>,
    resume: Sender<StepMode>,
    worker: JoinHandle<DebugOutcome>,
}

impl Debugger {
    /// Starts `program` on a new thread, replaying outside calls from
    /// `records`. The program stops at its first line event.
    pub fn spawn<R>(config: RuntimeConfig, program: Arc<Program>, records: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (pause_tx, pauses) = mpsc::channel();
        let (resume, resume_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("framehook-debuggee".to_string())
            .spawn(move || {
                let runtime = Runtime::new(config);
                let mut interpreter = runtime.interpreter(program);
                let token = runtime.acquire();
                let stepper = Stepper::new(Replayer::new(records), pause_tx, resume_rx);
                let mut session = TracerSession::install(&mut interpreter, &token, stepper);

                let result = interpreter.run(&token, Program::ENTRY);
                session.uninstall(&mut interpreter, &token);
                let replayed = session.tracer().inner().finish();
                DebugOutcome { result, replayed }
            })?;

        Ok(Self {
            pauses,
            resume,
            worker,
        })
    }

    /// Waits for the next pause. `None` once the program has finished.
    pub fn wait(&self) -> Option<FrameSnapshot> {
        self.pauses.recv().ok()
    }

    /// Resumes the paused program and waits for it to pause again.
    pub fn resume(&self, mode: StepMode) -> Option<FrameSnapshot> {
        self.resume.send(mode).ok()?;
        self.wait()
    }

    /// Lets the program run to completion without further pauses.
    pub fn finish(self) -> DebugOutcome {
        let Debugger {
            pauses,
            resume,
            worker,
        } = self;
        drop(resume);
        drop(pauses);
        worker
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    Help,
    Source,
    Opcode,
    Next,
    Step,
    Vars,
    Stack,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("ambiguous command `{input}`: {}", .candidates.join(", "))]
    Ambiguous {
        input: String,
        candidates: Vec<&'static str>,
    },
}

impl DebugCommand {
    pub const ALL: [DebugCommand; 8] = [
        DebugCommand::Help,
        DebugCommand::Source,
        DebugCommand::Opcode,
        DebugCommand::Next,
        DebugCommand::Step,
        DebugCommand::Vars,
        DebugCommand::Stack,
        DebugCommand::Quit,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DebugCommand::Help => "help",
            DebugCommand::Source => "source",
            DebugCommand::Opcode => "opcode",
            DebugCommand::Next => "next",
            DebugCommand::Step => "step",
            DebugCommand::Vars => "vars",
            DebugCommand::Stack => "stack",
            DebugCommand::Quit => "quit",
        }
    }

    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            DebugCommand::Help => "print help",
            DebugCommand::Source => "show source code",
            DebugCommand::Opcode => "show the next instruction",
            DebugCommand::Next => "next line",
            DebugCommand::Step => "next instruction",
            DebugCommand::Vars => "show arguments",
            DebugCommand::Stack => "show operand stack",
            DebugCommand::Quit => "exit debugger",
        }
    }

    /// Parses a command or any unambiguous prefix of one.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        if let Some(command) = Self::ALL.into_iter().find(|command| command.name() == input) {
            return Ok(command);
        }
        let matches: Vec<_> = Self::ALL
            .into_iter()
            .filter(|command| !input.is_empty() && command.name().starts_with(input))
            .collect();
        match matches.as_slice() {
            [command] => Ok(*command),
            [] => Err(CommandError::Unknown(input.to_string())),
            _ => Err(CommandError::Ambiguous {
                input: input.to_string(),
                candidates: matches.iter().map(|command| command.name()).collect(),
            }),
        }
    }
}

/// Numbered source lines around `line`, the current one marked with `-->`.
#[must_use]
pub fn source_window(source: &str, line: u32, rows: usize) -> String {
    let line = line as usize;
    let start = line.saturating_sub(rows / 2).max(1);
    let end = start + rows;

    let mut window = String::new();
    for (number, text) in source.lines().enumerate().map(|(index, text)| (index + 1, text)) {
        if number < start {
            continue;
        }
        if number > end {
            break;
        }
        if number == line {
            window.push_str(&format!("--> {text}\n"));
        } else {
            window.push_str(&format!("{number:>3} {text}\n"));
        }
    }
    window
}
