//! Line oriented program text.
//!
//! ```text
//! # comment
//! fn add2 a b
//!     .line 2
//!     arg 0
//!     arg 1
//!     add
//!     ret
//!
//! fn main
//!     .line 5
//!     load add2
//!     const 40
//!     const 2
//!     call 2
//!     ret
//! ```
//!
//! Every `fn` header names the function and its parameters. `.line` sets the
//! source line reported for the instructions that follow it.

use std::collections::HashMap;

use thiserror::Error;

use crate::{Function, Instruction, Program, Value, find_native};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct AssembleError {
    pub line: usize,
    pub kind: AssembleErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleErrorKind {
    #[error("instruction outside of a function")]
    OutsideFunction,
    #[error("missing function name")]
    MissingName,
    #[error("duplicate function `{0}`")]
    DuplicateFunction(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown native `{0}`")]
    UnknownNative(String),
    #[error("unknown instruction `{0}`")]
    UnknownInstruction(String),
    #[error("missing operand for `{0}`")]
    MissingOperand(&'static str),
    #[error("invalid operand `{0}`")]
    InvalidOperand(String),
    #[error("unexpected operand `{0}`")]
    UnexpectedOperand(String),
}

struct FunctionBuilder {
    name: String,
    arity: usize,
    instructions: Vec<Instruction>,
    lines: Vec<Option<u32>>,
}

impl FunctionBuilder {
    fn finish(self) -> Function {
        Function {
            name: self.name,
            arity: self.arity,
            instructions: self.instructions,
            lines: self.lines,
        }
    }
}

/// Assembles program text into a [`Program`].
pub fn assemble(source: &str) -> Result<Program, AssembleError> {
    let indices = collect_functions(source)?;
    let mut program = Program::default();
    let mut current: Option<FunctionBuilder> = None;
    let mut line: Option<u32> = None;

    for (number, text) in lines(source) {
        let err = |kind| AssembleError { line: number, kind };
        let mut words = text.split_whitespace();
        let Some(head) = words.next() else {
            continue;
        };

        if head == "fn" {
            if let Some(builder) = current.take() {
                program.add(builder.finish());
            }
            let name = words.next().ok_or(err(AssembleErrorKind::MissingName))?;
            current = Some(FunctionBuilder {
                name: name.to_string(),
                arity: words.count(),
                instructions: Vec::new(),
                lines: Vec::new(),
            });
            line = None;
            continue;
        }

        let builder = current
            .as_mut()
            .ok_or(err(AssembleErrorKind::OutsideFunction))?;

        if head == ".line" {
            let operand = words.next().ok_or(err(AssembleErrorKind::MissingOperand(".line")))?;
            line = Some(
                operand
                    .parse()
                    .map_err(|_| err(AssembleErrorKind::InvalidOperand(operand.to_string())))?,
            );
            continue;
        }

        let rest = text[head.len()..].trim();
        let instruction = parse_instruction(head, rest, &indices).map_err(err)?;
        builder.instructions.push(instruction);
        builder.lines.push(line);
    }

    if let Some(builder) = current.take() {
        program.add(builder.finish());
    }
    Ok(program)
}

fn lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source.lines().enumerate().filter_map(|(index, text)| {
        let text = strip_comment(text).trim();
        (!text.is_empty()).then_some((index + 1, text))
    })
}

/// Cuts the line at the first `#` outside a string literal.
fn strip_comment(text: &str) -> &str {
    let mut quoted = false;
    for (index, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => return &text[..index],
            _ => {}
        }
    }
    text
}

fn collect_functions(source: &str) -> Result<HashMap<String, usize>, AssembleError> {
    let mut indices = HashMap::new();
    for (number, text) in lines(source) {
        let mut words = text.split_whitespace();
        if words.next() != Some("fn") {
            continue;
        }
        let name = words.next().ok_or(AssembleError {
            line: number,
            kind: AssembleErrorKind::MissingName,
        })?;
        let index = indices.len();
        if indices.insert(name.to_string(), index).is_some() {
            return Err(AssembleError {
                line: number,
                kind: AssembleErrorKind::DuplicateFunction(name.to_string()),
            });
        }
    }
    Ok(indices)
}

fn parse_instruction(
    head: &str,
    rest: &str,
    indices: &HashMap<String, usize>,
) -> Result<Instruction, AssembleErrorKind> {
    let no_operand = |instruction| {
        if rest.is_empty() {
            Ok(instruction)
        } else {
            Err(AssembleErrorKind::UnexpectedOperand(rest.to_string()))
        }
    };

    match head {
        "const" => Ok(Instruction::PushConst {
            value: parse_literal(rest)?,
        }),
        "load" => {
            let name = operand(rest, "load")?;
            let index = indices
                .get(name)
                .copied()
                .ok_or_else(|| AssembleErrorKind::UnknownFunction(name.to_string()))?;
            Ok(Instruction::LoadFunction { index })
        }
        "native" => {
            let name = operand(rest, "native")?;
            let native = find_native(name)
                .ok_or_else(|| AssembleErrorKind::UnknownNative(name.to_string()))?;
            Ok(Instruction::LoadNative { native })
        }
        "arg" => Ok(Instruction::LoadArg {
            index: parse_count(operand(rest, "arg")?)?,
        }),
        "call" => Ok(Instruction::Call {
            argc: parse_count(operand(rest, "call")?)?,
        }),
        "add" => no_operand(Instruction::Add),
        "sub" => no_operand(Instruction::Sub),
        "mul" => no_operand(Instruction::Mul),
        "eq" => no_operand(Instruction::Eq),
        "dup" => no_operand(Instruction::Dup),
        "swap" => no_operand(Instruction::Swap),
        "pop" => no_operand(Instruction::Pop),
        "ret" => no_operand(Instruction::Return),
        "raise" => no_operand(Instruction::Raise),
        other => Err(AssembleErrorKind::UnknownInstruction(other.to_string())),
    }
}

fn operand<'a>(rest: &'a str, name: &'static str) -> Result<&'a str, AssembleErrorKind> {
    let mut words = rest.split_whitespace();
    let first = words.next().ok_or(AssembleErrorKind::MissingOperand(name))?;
    match words.next() {
        Some(extra) => Err(AssembleErrorKind::UnexpectedOperand(extra.to_string())),
        None => Ok(first),
    }
}

fn parse_count(text: &str) -> Result<usize, AssembleErrorKind> {
    text.parse()
        .map_err(|_| AssembleErrorKind::InvalidOperand(text.to_string()))
}

fn parse_literal(text: &str) -> Result<Value, AssembleErrorKind> {
    match text {
        "" => Err(AssembleErrorKind::MissingOperand("const")),
        "nil" => Ok(Value::nil()),
        "true" => Ok(Value::bool(true)),
        "false" => Ok(Value::bool(false)),
        _ if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') => {
            Ok(Value::string(&text[1..text.len() - 1]))
        }
        _ => text
            .parse::<i64>()
            .map(Value::fixnum)
            .map_err(|_| AssembleErrorKind::InvalidOperand(text.to_string())),
    }
}
