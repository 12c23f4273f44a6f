//! The execution engine: program state and the semantics of every [OpCode](crate::opcode::OpCode)

use crate::gc;
use crate::opcode::{DecodeError, OpCode};
use derive_more::Display;
use std::result::Result as StdResult;
use thiserror::Error;
use tracing::{info, trace};

pub mod heap;
pub use heap::*;

pub mod memory;
pub use memory::{Memory, MEM_SIZE};

pub mod stack;
pub use stack::Stack;

/// capacity of the operand stack
pub const STACK_MAX: usize = 1024;
/// capacity of the call stack
pub const CALL_STACK_MAX: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StackKind {
    #[display(fmt = "operand stack")]
    Operand,
    #[display(fmt = "call stack")]
    Call,
}

/// Runtime faults. None of them can be recovered from, a program that produced
/// one is [`Status::Faulted`] for good.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{0} overflow")]
    StackOverflow(StackKind),

    #[error("{0} underflow")]
    StackUnderflow(StackKind),

    #[error("invalid address {addr} at pc={pc}")]
    InvalidAddress { addr: i32, pc: usize },

    #[error("invalid memory index {index} at pc={pc}")]
    InvalidIndex { index: i32, pc: usize },

    #[error("type mismatch at pc={pc}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        pc: usize,
    },

    #[error("division by zero at pc={pc}")]
    DivByZero { pc: usize },

    #[error("invalid opcode 0x{opcode:02X} at pc={pc}")]
    InvalidOpcode { opcode: u8, pc: usize },

    #[error("truncated instruction at pc={pc}")]
    TruncatedInstruction { pc: usize },

    #[error("{0} does not refer to a live object")]
    DanglingReference(ObjectRef),

    #[error("the program faulted and cannot be resumed")]
    Faulted,
}

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Status {
    #[display(fmt = "running")]
    Running,
    #[display(fmt = "halted")]
    Halted,
    #[display(fmt = "faulted")]
    Faulted,
}

macro_rules! type_mismatch {
    ($expected:literal, $found:expr, $pc:expr) => {
        Error::TypeMismatch {
            expected: $expected,
            found: $found,
            pc: $pc,
        }
    };
}

/// The complete state of a running program. It owns the bytecode and the heap.
#[derive(Debug)]
pub struct Program {
    code: Vec<u8>,
    pc: usize,
    stack: Stack<Value>,
    call_stack: Stack<usize>,
    memory: Memory,
    heap: Heap,
    instruction_count: u64,
    status: Status,
}

impl Program {
    /// takes ownership of (already validated) bytecode and sets the pc to its first byte
    pub fn new(code: Vec<u8>) -> Self {
        Self {
            code,
            pc: 0,
            stack: Stack::new(StackKind::Operand, STACK_MAX),
            call_stack: Stack::new(StackKind::Call, CALL_STACK_MAX),
            memory: Memory::default(),
            heap: Heap::new(),
            instruction_count: 0,
            status: Status::Running,
        }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn stack(&self) -> &Stack<Value> {
        &self.stack
    }

    pub fn call_stack(&self) -> &Stack<usize> {
        &self.call_stack
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// pushes onto the operand stack from outside of the instruction stream
    pub fn push(&mut self, value: Value) -> Result<()> {
        self.stack.push(value)
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop()
    }

    pub fn set_global(&mut self, index: i32, value: Value) -> Result<()> {
        self.memory
            .store(index, value)
            .ok_or(Error::InvalidIndex { index, pc: self.pc })
    }

    /// runs one mark-sweep cycle rooted at the operand stack and global memory.
    /// Returns the number of freed objects.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = gc::roots(self);
        gc::collect(&mut self.heap, roots)
    }

    /// Executes exactly one instruction. Returns false once the program halted,
    /// either through HALT or by running off the end of the code.
    pub fn step(&mut self) -> Result<bool> {
        match self.status {
            Status::Halted => return Ok(false),
            Status::Faulted => return Err(Error::Faulted),
            Status::Running => {}
        }
        if self.pc >= self.code.len() {
            self.status = Status::Halted;
            return Ok(false);
        }

        match self.cycle() {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.status = Status::Halted;
                info!(instructions = self.instruction_count, "program halted");
                Ok(false)
            }
            Err(e) => {
                self.status = Status::Faulted;
                Err(e)
            }
        }
    }

    /// steps until the program halts or faults
    pub fn run(&mut self) -> Result<()> {
        while self.step()? {}
        Ok(())
    }

    /// fetch, count, advance the pc, then execute. Control flow instructions
    /// overwrite the already advanced pc.
    fn cycle(&mut self) -> Result<bool> {
        let at = self.pc;
        self.instruction_count += 1;
        let op = OpCode::decode(&self.code[at..]).map_err(|e| match e {
            DecodeError::Unknown(opcode) => Error::InvalidOpcode { opcode, pc: at },
            DecodeError::Truncated(_) | DecodeError::Empty => {
                Error::TruncatedInstruction { pc: at }
            }
        })?;
        self.pc = at + op.serialized_size();
        trace!(pc = at, %op, "exec");
        self.exec(op, at)
    }

    /// Faults are detected before anything is popped, so a faulting instruction
    /// leaves the operand stack as it found it.
    fn exec(&mut self, op: OpCode, at: usize) -> Result<bool> {
        use OpCode::*;
        match op {
            Push(x) => self.push_int(x)?,
            Pop => {
                self.stack.pop()?;
            }
            Dup => {
                let top = self.stack.peek(0)?;
                self.stack.push(top)?;
            }

            Add => self.binary(at, |a, b| Ok(a.wrapping_add(b)))?,
            Sub => self.binary(at, |a, b| Ok(a.wrapping_sub(b)))?,
            Mul => self.binary(at, |a, b| Ok(a.wrapping_mul(b)))?,
            Div => self.binary(at, |a, b| match b {
                0 => Err(Error::DivByZero { pc: at }),
                _ => Ok(a.wrapping_div(b)),
            })?,
            Eq => self.binary(at, |a, b| Ok((a == b) as i32))?,
            Neq => self.binary(at, |a, b| Ok((a != b) as i32))?,
            Lt => self.binary(at, |a, b| Ok((a < b) as i32))?,
            Gt => self.binary(at, |a, b| Ok((a > b) as i32))?,
            Le => self.binary(at, |a, b| Ok((a <= b) as i32))?,
            Ge => self.binary(at, |a, b| Ok((a >= b) as i32))?,

            Jmp(addr) => self.pc = self.target(addr, at)?,
            Jz(addr) => self.branch(addr, at, |v| v == 0)?,
            Jnz(addr) => self.branch(addr, at, |v| v != 0)?,

            Store(index) => {
                let value = self.stack.peek(0)?;
                self.memory
                    .store(index, value)
                    .ok_or(Error::InvalidIndex { index, pc: at })?;
                self.stack.pop()?;
            }
            Load(index) => {
                let value = self
                    .memory
                    .load(index)
                    .ok_or(Error::InvalidIndex { index, pc: at })?;
                self.stack.push(value)?;
            }

            Call(addr) => {
                let target = self.target(addr, at)?;
                self.call_stack.push(self.pc)?;
                self.pc = target;
            }
            Ret => self.pc = self.call_stack.pop()?,

            OpCode::Pair => {
                let right = self.stack.peek(0)?;
                let left = self.stack.peek(1)?;
                self.stack.pop()?;
                self.stack.pop()?;
                let pair = self.heap.make_pair(left, right);
                self.stack.push(pair)?;
            }
            Left | Right => {
                let heap::Pair { left, right } = self.peek_pair(at)?;
                self.stack.pop()?;
                self.stack.push(if op == Left { left } else { right })?;
            }

            Halt => return Ok(false),
        }
        Ok(true)
    }

    /// boxes `x` and pushes it. Checks for room first, so no object is allocated
    /// for a push that overflows
    fn push_int(&mut self, x: i32) -> Result<()> {
        if self.stack.len() >= self.stack.capacity() {
            return Err(Error::StackOverflow(StackKind::Operand));
        }
        let value = self.heap.make_int(x);
        self.stack.push(value)
    }

    /// pops b, then a, and pushes `f(a, b)`
    fn binary(&mut self, at: usize, f: impl FnOnce(i32, i32) -> Result<i32>) -> Result<()> {
        let b = self.peek_int(0, at)?;
        let a = self.peek_int(1, at)?;
        let result = f(a, b)?;
        self.stack.pop()?;
        self.stack.pop()?;
        self.push_int(result)
    }

    /// pops the condition and jumps to `addr` if `taken` says so
    fn branch(&mut self, addr: i32, at: usize, taken: impl FnOnce(i32) -> bool) -> Result<()> {
        let cond = self.peek_int(0, at)?;
        let target = if taken(cond) {
            Some(self.target(addr, at)?)
        } else {
            None
        };
        self.stack.pop()?;
        if let Some(target) = target {
            self.pc = target;
        }
        Ok(())
    }

    fn target(&self, addr: i32, at: usize) -> Result<usize> {
        usize::try_from(addr)
            .ok()
            .filter(|a| *a < self.code.len())
            .ok_or(Error::InvalidAddress { addr, pc: at })
    }

    fn peek_object(&self, ridx: usize, at: usize) -> Result<&Object> {
        match self.stack.peek(ridx)? {
            Value::Nil => Err(type_mismatch!("an object", "nil", at)),
            Value::Object(r) => self.heap.get(r).ok_or(Error::DanglingReference(r)),
        }
    }

    fn peek_int(&self, ridx: usize, at: usize) -> Result<i32> {
        match self.peek_object(ridx, at)? {
            Object::Int(x) => Ok(*x),
            other => Err(type_mismatch!("Int", other.type_name(), at)),
        }
    }

    fn peek_pair(&self, at: usize) -> Result<heap::Pair> {
        match self.peek_object(0, at)? {
            Object::Pair(pair) => Ok(*pair),
            other => Err(type_mismatch!("Pair", other.type_name(), at)),
        }
    }

    /// the integer value of `value`, if it is a boxed int
    pub fn int_value(&self, value: Value) -> Option<i32> {
        match self.heap.get(value.as_object()?)? {
            Object::Int(x) => Some(*x),
            _ => None,
        }
    }
}
