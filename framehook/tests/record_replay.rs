use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::Path,
    sync::Arc,
};

use framehook::{
    LayoutKind, Program, Record, RecordReader, RecordedValue, Recorder, RecordsError, Replayer,
    Runtime, RuntimeConfig, RuntimeError, TracerSession, Value, assemble, record_file,
};

const RANDOM: &str = r#"
fn pick
    .line 2
    native random
    call 0
    ret

fn main
    .line 6
    load pick
    call 0
    .line 7
    native random
    call 0
    const 1000000
    mul
    add
    ret
"#;

fn runtime(layout: LayoutKind) -> Runtime {
    Runtime::new(RuntimeConfig {
        layout,
        ..Default::default()
    })
}

fn record(layout: LayoutKind, source: &str, program: &Path) -> (Result<Value, RuntimeError>, usize) {
    let runtime = runtime(layout);
    let mut interpreter = runtime.interpreter(Arc::new(assemble(source).unwrap()));
    let token = runtime.acquire();
    let file = BufWriter::new(File::create(record_file(program)).unwrap());
    let mut session = TracerSession::install(&mut interpreter, &token, Recorder::new(file));

    let result = interpreter.run(&token, Program::ENTRY);
    session.uninstall(&mut interpreter, &token);
    let recorded = session.tracer().finish().unwrap();
    assert_eq!(session.tracer().recorded(), recorded);
    (result, recorded)
}

fn replay(
    layout: LayoutKind,
    source: &str,
    program: &Path,
) -> (Result<Value, RuntimeError>, Result<usize, RecordsError>) {
    let runtime = runtime(layout);
    let mut interpreter = runtime.interpreter(Arc::new(assemble(source).unwrap()));
    let token = runtime.acquire();
    let file = BufReader::new(File::open(record_file(program)).unwrap());
    let mut session = TracerSession::install(&mut interpreter, &token, Replayer::new(file));

    let result = interpreter.run(&token, Program::ENTRY);
    session.uninstall(&mut interpreter, &token);
    let patched = session.tracer().finish();
    if let Ok(count) = &patched {
        assert_eq!(session.tracer().patched(), *count);
    }
    (result, patched)
}

#[test]
fn replay_reproduces_recorded_outside_calls() {
    for layout in [LayoutKind::StackTop, LayoutKind::BasePointer] {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("random.fh");

        let (recorded, count) = record(layout, RANDOM, &program);
        let recorded = recorded.unwrap();
        assert_eq!(count, 2);

        let records = fs::read_to_string(record_file(&program)).unwrap();
        let mut reader = RecordReader::new(records.as_bytes());
        let first = reader.next_record().unwrap();
        let second = reader.next_record().unwrap();
        let (Record::Returned(RecordedValue::Fixnum(a)), Record::Returned(RecordedValue::Fixnum(b))) =
            (first, second)
        else {
            panic!("unexpected records {records}");
        };
        assert_eq!(recorded, Value::fixnum(a + b * 1_000_000));

        for _ in 0..2 {
            let (replayed, patched) = replay(layout, RANDOM, &program);
            assert_eq!(replayed.unwrap(), recorded);
            assert_eq!(patched.unwrap(), 2);
        }
    }
}

#[test]
fn raised_outside_calls_are_replayed_as_raises() {
    let source = r#"
fn main
    native fail
    const "boom"
    call 1
    ret
"#;
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("fail.fh");

    let (recorded, count) = record(LayoutKind::StackTop, source, &program);
    assert!(matches!(recorded, Err(RuntimeError::Uncaught(_))));
    assert_eq!(count, 1);
    assert_eq!(
        fs::read_to_string(record_file(&program)).unwrap(),
        "{\"raised\":{\"type\":\"str\",\"value\":\"boom\"}}\n"
    );

    let replaying = "fn main\n native clock\n call 0\n ret\n";
    let (replayed, patched) = replay(LayoutKind::StackTop, replaying, &program);
    match replayed {
        Err(RuntimeError::Uncaught(value)) => assert_eq!(value.as_str(), Some("boom")),
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(patched.unwrap(), 1);
}

#[test]
fn replay_without_records_runs_the_real_call() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("empty.fh");
    fs::write(record_file(&program), "").unwrap();

    let source = "fn main\n native len\n const \"abcd\"\n call 1\n ret\n";
    let (replayed, patched) = replay(LayoutKind::BasePointer, source, &program);
    assert_eq!(replayed.unwrap(), Value::fixnum(4));
    assert!(matches!(patched, Err(RecordsError::Exhausted(0))));
}

#[test]
fn replayed_values_need_not_match_the_live_result() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("len.fh");
    fs::write(
        record_file(&program),
        "{\"returned\":{\"type\":\"fixnum\",\"value\":99}}\n",
    )
    .unwrap();

    let source = "fn main\n native len\n const \"abcd\"\n call 1\n const 1\n add\n ret\n";
    let (replayed, patched) = replay(LayoutKind::StackTop, source, &program);
    assert_eq!(replayed.unwrap(), Value::fixnum(100));
    assert_eq!(patched.unwrap(), 1);
}

#[test]
fn outside_calls_ending_a_frame_are_recorded() {
    let source = r#"
fn roll
    native random
    call 0

fn one
    const 1
    ret

fn main
    load roll
    call 0
    pop
    load one
    call 0
    pop
    native len
    const "abcd"
    call 1
    ret
"#;
    for layout in [LayoutKind::StackTop, LayoutKind::BasePointer] {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("tail.fh");

        let (recorded, count) = record(layout, source, &program);
        assert_eq!(recorded.unwrap(), Value::fixnum(4));
        assert_eq!(count, 2);

        let records = fs::read_to_string(record_file(&program)).unwrap();
        let mut reader = RecordReader::new(records.as_bytes());
        assert!(matches!(
            reader.next_record().unwrap(),
            Record::Returned(RecordedValue::Fixnum(_))
        ));
        assert_eq!(
            reader.next_record().unwrap(),
            Record::Returned(RecordedValue::Fixnum(4))
        );

        let (replayed, patched) = replay(layout, source, &program);
        assert_eq!(replayed.unwrap(), Value::fixnum(4));
        assert_eq!(patched.unwrap(), 2);
    }
}

#[test]
fn arity_errors_of_natives_are_recorded_as_raises() {
    let source = "fn main\n native len\n call 0\n ret\n";
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("arity.fh");

    let (recorded, count) = record(LayoutKind::StackTop, source, &program);
    assert!(matches!(recorded, Err(RuntimeError::Uncaught(_))));
    assert_eq!(count, 1);

    let (replayed, patched) = replay(LayoutKind::StackTop, source, &program);
    match replayed {
        Err(RuntimeError::Uncaught(value)) => {
            assert_eq!(value.as_str(), Some("TypeError: len takes 1 arguments, got 0"));
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert_eq!(patched.unwrap(), 1);
}

#[test]
fn calls_into_the_program_are_not_recorded() {
    let source = "fn one\n const 1\n ret\nfn main\n load one\n call 0\n ret\n";
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().join("inside.fh");

    let (recorded, count) = record(LayoutKind::BasePointer, source, &program);
    assert_eq!(recorded.unwrap(), Value::fixnum(1));
    assert_eq!(count, 0);
    assert!(fs::read_to_string(record_file(&program)).unwrap().is_empty());
}
