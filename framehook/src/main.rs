use clap::{Parser as ClapParser, Subcommand};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use framehook::{
    CommandError, DebugCommand, DebugOutcome, Debugger, DiagnosticTracer, ExecutionToken,
    FrameSnapshot, Interpreter, LayoutKind, Program, Recorder, Replayer, Runtime, RuntimeConfig,
    SOURCE_ROWS, StepMode, TracerSession, assemble, record_file, source_window,
};
use log::info;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Operand stack layout of the interpreter
    #[arg(long, value_enum, default_value_t = LayoutKind::StackTop, global = true)]
    layout: LayoutKind,

    /// Operand stack slots per frame (stack-top) or per interpreter (base-pointer)
    #[arg(long, default_value_t = 256, global = true)]
    stack_size: usize,

    /// Maximum call depth
    #[arg(long, default_value_t = 64, global = true)]
    max_frames: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a program
    Run { program: PathBuf },
    /// Run a program and log every trace event
    Trace { program: PathBuf },
    /// Run a program and record the results of its outside calls
    Record { program: PathBuf },
    /// Run a program, answering outside calls from its records
    Replay { program: PathBuf },
    /// Step through a replayed run of a program
    Debug {
        program: PathBuf,
        /// Print every stop as a JSON frame snapshot
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn program(&self) -> &Path {
        match self {
            Command::Run { program }
            | Command::Trace { program }
            | Command::Record { program }
            | Command::Replay { program }
            | Command::Debug { program, .. } => program,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Command::Run { .. } | Command::Debug { .. } => "warn",
        _ => "framehook=debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let path = cli.command.program();
    let source = fs::read_to_string(path)
        .map_err(|err| format!("reading file '{}': {err}", path.display()))?;
    let program = assemble(&source).map_err(|err| format!("{}: {err}", path.display()))?;

    let runtime = Runtime::new(RuntimeConfig {
        layout: cli.layout,
        stack_size: cli.stack_size,
        max_frames: cli.max_frames,
    });
    let mut interpreter = runtime.interpreter(Arc::new(program));
    let token = runtime.acquire();

    match &cli.command {
        Command::Run { .. } => execute(&mut interpreter, &token),
        Command::Trace { .. } => {
            let mut session = TracerSession::install(&mut interpreter, &token, DiagnosticTracer::default());
            let result = execute(&mut interpreter, &token);
            session.uninstall(&mut interpreter, &token);
            info!("{} trace events", session.tracer().events());
            result
        }
        Command::Record { program } => {
            let records = record_file(program);
            let file = File::create(&records)
                .map_err(|err| format!("creating '{}': {err}", records.display()))?;
            let mut session =
                TracerSession::install(&mut interpreter, &token, Recorder::new(BufWriter::new(file)));
            let result = execute(&mut interpreter, &token);
            session.uninstall(&mut interpreter, &token);
            let recorded = session.tracer().finish().map_err(|err| err.to_string())?;
            info!("recorded {recorded} outside calls to '{}'", records.display());
            result
        }
        Command::Replay { program } => {
            let records = record_file(program);
            let file = File::open(&records)
                .map_err(|err| format!("opening '{}': {err}", records.display()))?;
            let mut session =
                TracerSession::install(&mut interpreter, &token, Replayer::new(BufReader::new(file)));
            let result = execute(&mut interpreter, &token);
            session.uninstall(&mut interpreter, &token);
            let patched = session.tracer().finish().map_err(|err| err.to_string())?;
            info!("replayed {patched} outside calls from '{}'", records.display());
            result
        }
        Command::Debug { program, json } => debug(
            &source,
            interpreter.program().clone(),
            runtime.config().clone(),
            program,
            *json,
        ),
    }
}

fn execute(interpreter: &mut Interpreter, token: &ExecutionToken<'_>) -> Result<(), String> {
    let value = interpreter
        .run(token, Program::ENTRY)
        .map_err(|err| err.to_string())?;
    println!("=> {value:?}");
    Ok(())
}

fn debug(
    source: &str,
    program: Arc<Program>,
    config: RuntimeConfig,
    path: &Path,
    json: bool,
) -> Result<(), String> {
    let records = record_file(path);
    let file =
        File::open(&records).map_err(|err| format!("opening '{}': {err}", records.display()))?;
    let debugger = Debugger::spawn(config, program, BufReader::new(file))
        .map_err(|err| format!("starting program thread: {err}"))?;

    let Some(mut frame) = debugger.wait() else {
        return report(debugger.finish());
    };
    show_stop(source, &frame, json)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();

    loop {
        print!("(dbg) ");
        stdout
            .flush()
            .map_err(|err| format!("flushing stdout: {err}"))?;

        input.clear();
        let read = stdin
            .lock()
            .read_line(&mut input)
            .map_err(|err| format!("reading input: {err}"))?;
        if read == 0 {
            break;
        }

        let command = match DebugCommand::parse(&input) {
            Ok(command) => command,
            Err(CommandError::Unknown(text)) if text.is_empty() => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        let mode = match command {
            DebugCommand::Help => {
                for command in DebugCommand::ALL {
                    println!("{:6} - {}", command.name(), command.help());
                }
                continue;
            }
            DebugCommand::Source => {
                match frame.line {
                    Some(line) => print!("{}", source_window(source, line, SOURCE_ROWS)),
                    None => println!("no line information in {}", frame.function),
                }
                continue;
            }
            DebugCommand::Opcode => {
                let instruction = frame.instruction.as_deref().unwrap_or("<end of function>");
                println!("{:>4} {instruction}", frame.ip);
                continue;
            }
            DebugCommand::Vars => {
                show_args(&frame);
                continue;
            }
            DebugCommand::Stack => {
                for (depth, value) in frame.stack.iter().rev().enumerate() {
                    println!("{:>4} {value}", depth + 1);
                }
                continue;
            }
            DebugCommand::Next => StepMode::Line,
            DebugCommand::Step => StepMode::Instruction,
            DebugCommand::Quit => break,
        };

        match debugger.resume(mode) {
            Some(next) => {
                frame = next;
                show_stop(source, &frame, json)?;
            }
            None => return report(debugger.finish()),
        }
    }

    println!("goodbye");
    Ok(())
}

fn show_stop(source: &str, frame: &FrameSnapshot, json: bool) -> Result<(), String> {
    if json {
        let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!("{frame}");
    let current = frame
        .line
        .and_then(|line| Some((line, source.lines().nth((line as usize).checked_sub(1)?)?)));
    if let Some((line, text)) = current {
        println!("{line:>4} {text}");
    }
    show_args(frame);
    Ok(())
}

fn show_args(frame: &FrameSnapshot) {
    for (index, arg) in frame.args.iter().enumerate() {
        println!("     arg {index} = {arg}");
    }
}

fn report(outcome: DebugOutcome) -> Result<(), String> {
    let value = outcome.result.map_err(|err| err.to_string())?;
    println!("=> {value:?}");
    let replayed = outcome.replayed.map_err(|err| err.to_string())?;
    info!("replayed {replayed} outside calls");
    Ok(())
}
