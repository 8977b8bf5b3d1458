use std::{collections::HashMap, fmt, sync::Arc};

use crate::{Native, Value};

#[derive(Debug, Clone)]
pub enum Instruction {
    PushConst { value: Value },
    LoadFunction { index: usize },
    LoadNative { native: &'static Native },
    LoadArg { index: usize },
    /// Calls the value below the `argc` arguments on top of the stack.
    Call { argc: usize },
    Add,
    Sub,
    Mul,
    Eq,
    Dup,
    Swap,
    Pop,
    Return,
    Raise,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushConst { value } => write!(f, "const {value:?}"),
            Instruction::LoadFunction { index } => write!(f, "load #{index}"),
            Instruction::LoadNative { native } => write!(f, "native {}", native.name),
            Instruction::LoadArg { index } => write!(f, "arg {index}"),
            Instruction::Call { argc } => write!(f, "call {argc}"),
            Instruction::Add => write!(f, "add"),
            Instruction::Sub => write!(f, "sub"),
            Instruction::Mul => write!(f, "mul"),
            Instruction::Eq => write!(f, "eq"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::Swap => write!(f, "swap"),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Return => write!(f, "ret"),
            Instruction::Raise => write!(f, "raise"),
        }
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub arity: usize,
    pub instructions: Vec<Instruction>,
    /// Source line of each instruction, if known.
    pub lines: Vec<Option<u32>>,
}

impl Function {
    #[must_use]
    pub fn instruction(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    #[must_use]
    pub fn line(&self, ip: usize) -> Option<u32> {
        self.lines.get(ip).copied().flatten()
    }
}

#[derive(Debug, Default)]
pub struct Program {
    functions: Vec<Arc<Function>>,
    names: HashMap<String, usize>,
}

impl Program {
    pub const ENTRY: &'static str = "main";

    /// Adds a function, replacing any earlier one of the same name.
    pub fn add(&mut self, function: Function) -> usize {
        if let Some(&index) = self.names.get(&function.name) {
            self.functions[index] = Arc::new(function);
            return index;
        }
        let index = self.functions.len();
        self.names.insert(function.name.clone(), index);
        self.functions.push(Arc::new(function));
        index
    }

    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.names.get(name).map(|&index| &self.functions[index])
    }

    #[must_use]
    pub fn function_at(&self, index: usize) -> Option<&Arc<Function>> {
        self.functions.get(index)
    }
}
