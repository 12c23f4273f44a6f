use std::io::{stdout, Write};

use anyhow::{anyhow, bail, Result};
use crossterm::style::Stylize;
use gcvm_lib::opcode::disassemble;
use gcvm_lib::vm::{Program, Status};
use rustyline::{error::ReadlineError, DefaultEditor};
use tracing::debug;

use crate::report;

/// number of breakpoint slots
pub const MAX_BREAKPOINTS: usize = 32;
/// number of instructions shown by `list`
pub const LIST_WINDOW: usize = 10;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum UserCommand {
    Step,
    Continue,
    Break(usize),
    Delete(usize),
    Clear,
    List,
    InfoBreak,
    MemStat,
    Gc,
    Leaks,
    ShowStack,
    ShowMemory,
    ShowHeap,
    LastCommand,
    Exit,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Flow {
    Continue,
    Exit,
}

/// A fixed table of breakpoint slots. Ids are 1-based slot numbers and stay
/// stable until the breakpoint is deleted.
#[derive(Debug, Default)]
pub struct Breakpoints {
    slots: [Option<usize>; MAX_BREAKPOINTS],
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Added {
    New(usize),
    Exists(usize),
    Full,
}

impl Breakpoints {
    pub fn add(&mut self, addr: usize) -> Added {
        if let Some(id) = self.find(addr) {
            return Added::Exists(id);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(i) => {
                self.slots[i] = Some(addr);
                Added::New(i + 1)
            }
            None => Added::Full,
        }
    }

    /// false if `id` does not name an active breakpoint
    pub fn delete(&mut self, id: usize) -> bool {
        let Some(slot) = id.checked_sub(1).and_then(|i| self.slots.get_mut(i)) else {
            return false;
        };
        slot.take().is_some()
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_BREAKPOINTS];
    }

    /// id of the active breakpoint at `addr`
    pub fn find(&self, addr: usize) -> Option<usize> {
        self.iter().find(|(_, a)| *a == addr).map(|(id, _)| id)
    }

    /// (id, address) of every active breakpoint
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|addr| (i + 1, addr)))
    }
}

/// Owns the program being debugged. Every command writes its report to the
/// writer it is given, runtime faults are returned as errors.
pub struct Debugger {
    program: Program,
    breakpoints: Breakpoints,
}

impl Debugger {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            breakpoints: Breakpoints::default(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn execute(&mut self, cmd: &UserCommand, out: &mut impl Write) -> Result<Flow> {
        use UserCommand::*;
        match cmd {
            Step => {
                if self.is_running(out)? {
                    self.step(out)?;
                }
            }
            Continue => {
                if self.is_running(out)? {
                    self.resume(out)?;
                }
            }
            Break(addr) => match self.breakpoints.add(*addr) {
                Added::New(id) => writeln!(out, "Breakpoint {} set at address {}", id, addr)?,
                Added::Exists(id) => {
                    writeln!(out, "Breakpoint {} already exists at address {}", id, addr)?
                }
                Added::Full => writeln!(
                    out,
                    "All {} breakpoint slots are in use",
                    MAX_BREAKPOINTS
                )?,
            },
            Delete(id) => {
                if self.breakpoints.delete(*id) {
                    writeln!(out, "Breakpoint {} deleted", id)?;
                } else {
                    writeln!(out, "Invalid breakpoint id {}", id)?;
                }
            }
            Clear => {
                self.breakpoints.clear();
                writeln!(out, "All breakpoints cleared")?;
            }
            List => self.list(out)?,
            InfoBreak => {
                let mut count = 0;
                for (id, addr) in self.breakpoints.iter() {
                    writeln!(out, "[{}] address {}", id, addr)?;
                    count += 1;
                }
                writeln!(out, "Total breakpoints: {}", count)?;
            }
            MemStat => report::write_heap_stats(out, &self.program)?,
            Gc => {
                let freed = self.program.collect_garbage();
                writeln!(
                    out,
                    "Collected {} objects, {} still live",
                    freed,
                    self.program.heap().len()
                )?;
            }
            Leaks => writeln!(
                out,
                "Potential leaks: {} objects",
                self.program.heap().stats().live
            )?,
            ShowStack => report::write_stack(out, &self.program)?,
            ShowMemory => report::write_memory(out, &self.program)?,
            ShowHeap => report::write_heap(out, &self.program)?,
            LastCommand => {}
            Exit => {
                writeln!(out, "Exiting debugger")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn is_running(&self, out: &mut impl Write) -> Result<bool> {
        let running = self.program.status() == Status::Running;
        if !running {
            writeln!(out, "The program has finished")?;
        }
        Ok(running)
    }

    /// false once the program halted
    fn step(&mut self, out: &mut impl Write) -> Result<bool> {
        if self.program.step()? {
            return Ok(true);
        }
        writeln!(out, "Program halted at pc={}", self.program.pc())?;
        Ok(false)
    }

    /// steps off the current breakpoint first, then until the next one
    fn resume(&mut self, out: &mut impl Write) -> Result<()> {
        if self.breakpoints.find(self.program.pc()).is_some() && !self.step(out)? {
            return Ok(());
        }
        loop {
            let pc = self.program.pc();
            if let Some(id) = self.breakpoints.find(pc) {
                debug!(id, pc, "breakpoint hit");
                writeln!(out, "Hit breakpoint {} at address {}", id, pc)?;
                return Ok(());
            }
            if !self.step(out)? {
                return Ok(());
            }
        }
    }

    fn list(&self, out: &mut impl Write) -> Result<()> {
        let pc = self.program.pc();
        writeln!(out, "--- next {} instructions ---", LIST_WINDOW)?;
        for listing in disassemble(self.program.code(), pc, LIST_WINDOW) {
            let marker = if listing.offset() == pc { "->" } else { "  " };
            writeln!(out, " {} {}", marker, listing)?;
        }
        Ok(())
    }
}

/// runs the interactive session on the terminal until `exit`, EOF or a fault
pub fn run(program: Program) -> Result<()> {
    let mut debugger = Debugger::new(program);
    let mut rl = DefaultEditor::new()?;
    let mut stdout = stdout();
    let mut last_cmd: Option<UserCommand> = None;

    println!("{}", "=== VM debugger ===".bold());
    println!(
        "Commands: step, continue, break <addr>, delete <id>, clear, info break, list, \
         stack, memory, heap, memstat, gc, leaks, exit"
    );

    loop {
        let prompt = format!("(debug pc={}) > ", debugger.program().pc());
        let Some(cmd) = repeat_last(read_line(&mut rl, &prompt)?, last_cmd.as_ref()) else {
            continue;
        };
        let flow = debugger.execute(&cmd, &mut stdout)?;
        stdout.flush()?;
        if flow == Flow::Exit {
            return Ok(());
        }
        last_cmd = Some(cmd);
    }
}

/// resolves an empty line to the previous command. None if there is nothing to repeat yet
fn repeat_last(cmd: UserCommand, last: Option<&UserCommand>) -> Option<UserCommand> {
    match cmd {
        UserCommand::LastCommand => last.cloned(),
        cmd => Some(cmd),
    }
}

fn read_line(rl: &mut DefaultEditor, prompt: &str) -> Result<UserCommand> {
    loop {
        let line = rl.readline(prompt);
        use ReadlineError::*;
        match line {
            Ok(line) => match parse_line(&line) {
                Ok(cmd) => {
                    if cmd != UserCommand::LastCommand {
                        rl.add_history_entry(line.as_str())?;
                    }
                    return Ok(cmd);
                }
                Err(e) => eprintln!("{} {}", "Error:".red(), e),
            },
            Err(Interrupted | Eof) => return Ok(UserCommand::Exit),
            Err(other) => return Err(other.into()),
        }
    }
}

pub fn parse_line(line: &str) -> Result<UserCommand> {
    use UserCommand::*;
    let elems: Vec<_> = line.split_whitespace().collect();

    let Some((cmd, args)) = elems.split_first() else {
        return Ok(LastCommand);
    };
    let cmd = match *cmd {
        "s" | "step" => Step,
        "c" | "continue" => Continue,
        "b" | "break" => Break(parse_arg(args, "break needs an address")?),
        "d" | "delete" => Delete(parse_arg(args, "delete needs a breakpoint id")?),
        "clear" => Clear,
        "l" | "list" => List,
        "info" => match args {
            ["break"] => return Ok(InfoBreak),
            _ => bail!("did you mean 'info break'?"),
        },
        "memstat" => MemStat,
        "gc" => Gc,
        "leaks" => Leaks,
        "stack" => ShowStack,
        "memory" => ShowMemory,
        "heap" => ShowHeap,
        "q" | "exit" => Exit,
        other => bail!("unknown command: {}", other),
    };
    let takes_arg = matches!(cmd, Break(_) | Delete(_));
    if args.len() > usize::from(takes_arg) {
        bail!("too many arguments");
    }
    Ok(cmd)
}

fn parse_arg(args: &[&str], msg: &'static str) -> Result<usize> {
    args.first()
        .and_then(|arg| arg.parse().ok())
        .ok_or_else(|| anyhow!(msg))
}
