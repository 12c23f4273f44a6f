//! Text renderings of the program state, shared by the runner and the debugger

use gcvm_lib::opcode::disassemble;
use gcvm_lib::vm::Program;

use std::io::{self, Write};

/// operand stack, top first
pub fn write_stack(out: &mut impl Write, program: &Program) -> io::Result<()> {
    let stack = program.stack();
    if stack.is_empty() {
        return writeln!(out, "Stack is empty");
    }
    writeln!(out, "Stack (top -> bottom):")?;
    for (i, value) in stack.iter().enumerate().rev() {
        writeln!(out, "[{}] {}", i, program.heap().describe(*value))?;
    }
    Ok(())
}

/// every global memory slot that is not nil
pub fn write_memory(out: &mut impl Write, program: &Program) -> io::Result<()> {
    let mut empty = true;
    for (i, value) in program.memory().occupied() {
        if empty {
            writeln!(out, "Global memory:")?;
            empty = false;
        }
        writeln!(out, "[{}] {}", i, program.heap().describe(value))?;
    }
    if empty {
        writeln!(out, "Memory is empty")?;
    }
    Ok(())
}

pub fn write_heap_stats(out: &mut impl Write, program: &Program) -> io::Result<()> {
    let stats = program.heap().stats();
    writeln!(out, "Objects created: {}", stats.created)?;
    writeln!(out, "Objects freed:   {}", stats.freed)?;
    writeln!(out, "Live on heap:    {}", stats.live)
}

/// every live object with its handle
pub fn write_heap(out: &mut impl Write, program: &Program) -> io::Result<()> {
    let heap = program.heap();
    if heap.is_empty() {
        return writeln!(out, "Heap is empty");
    }
    for (r, _) in heap.iter() {
        writeln!(out, "{} {}", r, heap.describe(r.into()))?;
    }
    Ok(())
}

/// 16 bytes per line, followed by a disassembly of the whole code
pub fn write_dump(out: &mut impl Write, code: &[u8]) -> io::Result<()> {
    for (line, chunk) in code.chunks(16).enumerate() {
        let bytes: Vec<_> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        writeln!(out, "{:04}: {}", line * 16, bytes.join(" "))?;
    }
    writeln!(out)?;
    for listing in disassemble(code, 0, usize::MAX) {
        writeln!(out, "{}", listing)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcvm_lib::opcode::{encode, OpCode::*};
    use pretty_assertions::assert_eq;

    fn render(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut out = vec![];
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn final_state() {
        let mut p = Program::new(encode(&[Push(4), Store(7), Push(1), Push(2), Pair, Halt]));
        p.run().unwrap();

        assert_eq!(
            render(|out| write_stack(out, &p)),
            "Stack (top -> bottom):\n[0] Pair(#1, #2)\n"
        );
        assert_eq!(
            render(|out| write_memory(out, &p)),
            "Global memory:\n[7] Int(4)\n"
        );
        assert_eq!(
            render(|out| write_heap_stats(out, &p)),
            "Objects created: 4\nObjects freed:   0\nLive on heap:    4\n"
        );
    }

    #[test]
    fn empty_state() {
        let p = Program::new(vec![]);
        assert_eq!(render(|out| write_stack(out, &p)), "Stack is empty\n");
        assert_eq!(render(|out| write_memory(out, &p)), "Memory is empty\n");
        assert_eq!(render(|out| write_heap(out, &p)), "Heap is empty\n");
    }

    #[test]
    fn dump() {
        let code = encode(&[Push(258), Halt]);
        assert_eq!(
            render(|out| write_dump(out, &code)),
            "0000: 01 02 01 00 00 FF\n\n0000: PUSH   258\n0005: HALT\n"
        );
    }
}
