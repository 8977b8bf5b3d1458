//! Record and replay of outside calls.
//!
//! An outside call is a call whose callee is a native, or a patch standing in
//! for one. The [`Recorder`] stores the outcome of every outside call when the
//! native returns or raises. The [`Replayer`] replaces the callee of every
//! outside call with a patch producing the recorded outcome, right before the
//! call executes, so a replayed run sees the same values as the recorded one.

use std::io::{BufRead, Write};

use log::debug;

use crate::{
    FrameRef, Instruction, Object, Patch, Record, RecordReader, RecordWriter, RecordedValue,
    RecordsError, TraceControl, TraceEvent, Tracer, Value,
};

#[must_use]
pub fn outside_call(callee: &Value) -> bool {
    matches!(callee.object(), Object::Native(_) | Object::Patch(_))
}

/// Callee of the call about to execute, with its depth on the operand stack.
fn pending_outside_call(frame: &FrameRef<'_>) -> Option<(usize, Value)> {
    let Some(Instruction::Call { argc }) = frame.current_instruction() else {
        return None;
    };
    let depth = argc + 1;
    let callee = frame.peek(depth).ok()?;
    outside_call(&callee).then_some((depth, callee))
}

/// Writes the outcome of every outside call as it completes.
#[derive(Debug)]
pub struct Recorder<W: Write> {
    writer: RecordWriter<W>,
    error: Option<RecordsError>,
}

impl<W: Write> Recorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: RecordWriter::new(writer),
            error: None,
        }
    }

    #[must_use]
    pub fn recorded(&self) -> usize {
        self.writer.written()
    }

    /// Flushes the records and reports the first failure seen while tracing.
    pub fn finish(&mut self) -> Result<usize, RecordsError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()?;
        Ok(self.writer.written())
    }
}

impl<W: Write> Tracer for Recorder<W> {
    fn on_event(
        &mut self,
        frame: &mut FrameRef<'_>,
        event: TraceEvent,
        arg: Option<&Value>,
    ) -> TraceControl {
        let outcome: fn(RecordedValue) -> Record = match event {
            TraceEvent::NativeReturn => Record::Returned,
            TraceEvent::NativeException => Record::Raised,
            _ => return TraceControl::Continue,
        };
        if self.error.is_some() {
            return TraceControl::Continue;
        }

        let result = arg
            .ok_or(RecordsError::Unrecordable("missing"))
            .and_then(RecordedValue::try_from)
            .map(outcome)
            .and_then(|record| {
                debug!("recording {record:?} at level {}", frame.level());
                self.writer.write(&record)
            });
        if let Err(err) = result {
            self.error = Some(err);
        }
        TraceControl::Continue
    }
}

#[derive(Debug)]
pub struct Replayer<R: BufRead> {
    reader: RecordReader<R>,
    patched: usize,
    error: Option<RecordsError>,
}

impl<R: BufRead> Replayer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: RecordReader::new(reader),
            patched: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn patched(&self) -> usize {
        self.patched
    }

    /// First failure seen while replaying, if any.
    pub fn finish(&mut self) -> Result<usize, RecordsError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self.patched),
        }
    }
}

impl<R: BufRead> Tracer for Replayer<R> {
    fn on_event(
        &mut self,
        frame: &mut FrameRef<'_>,
        event: TraceEvent,
        _arg: Option<&Value>,
    ) -> TraceControl {
        frame.set_trace_instructions(true);

        if event != TraceEvent::Instruction || self.error.is_some() {
            return TraceControl::Continue;
        }
        let Some((depth, callee)) = pending_outside_call(frame) else {
            return TraceControl::Continue;
        };

        match self.reader.next_record() {
            Ok(record) => {
                let patch = Value::patch(Patch::from(record));
                debug!("patching {callee} with {patch}");
                match frame.overwrite(depth, &patch) {
                    Ok(()) => self.patched += 1,
                    Err(err) => debug!("could not patch {callee}: {err}"),
                }
            }
            Err(err) => self.error = Some(err),
        }
        TraceControl::Continue
    }
}
