//! A stack based bytecode VM with a garbage collected object heap.
//!
//! Running a bytecode file takes the following steps:
//! 1. read the file with [`loader::load`]
//! 1. check it with [`loader::validate`]. Execution relies on every opcode being known
//!    and every operand being complete, so never skip this.
//! 1. create a [`vm::Program`] from the code ([`loader::load_program`] does all three)
//! 1. call [`vm::Program::run`], or [`vm::Program::step`] in a loop:
//!
//!    ```no_run
//!    # use gcvm_lib::{loader, vm::Status};
//!    let mut program = loader::load_program("prog.byc")?;
//!    while program.step()? {
//!        // inspect program.pc(), program.stack(), ...
//!    }
//!    assert_eq!(program.status(), Status::Halted);
//!    # Ok::<(), Box<dyn std::error::Error>>(())
//!    ```
//!
//! Garbage collection never happens on its own, call [`vm::Program::collect_garbage`]
//! between instructions. Bytecode can be produced from text with [`asm::assemble`].
pub mod asm;
pub mod gc;
pub mod loader;
pub mod opcode;
pub mod vm;
