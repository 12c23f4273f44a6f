use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::style::Stylize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gcvm_lib::vm::Program;
use gcvm_lib::{asm, loader};

use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{fs, process};

mod debugger;
mod report;

/// file extension every bytecode file must carry
const BYTECODE_EXTENSION: &str = "byc";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// the bytecode file to run, or the assembly source with --assemble
    file: PathBuf,

    /// `debug` starts the interactive debugger instead of running the program
    mode: Option<Mode>,

    /// print a hex dump and a disassembly before running
    #[arg(long)]
    dump: bool,

    /// run one garbage collection after the program halted and report it
    #[arg(long)]
    gc: bool,

    /// assemble FILE into the bytecode file given with -o instead of running anything
    #[arg(long, requires = "output")]
    assemble: bool,

    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Debug,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage errors exit with 1, --help and --version with 0
            let _ = e.print();
            process::exit(i32::from(e.use_stderr()));
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.assemble {
        let Some(output) = &cli.output else {
            bail!("--assemble needs an output file (-o)");
        };
        return assemble(&cli.file, output);
    }

    if cli.file.extension().and_then(|e| e.to_str()) != Some(BYTECODE_EXTENSION) {
        bail!(
            "{} is not a .{} file",
            cli.file.display(),
            BYTECODE_EXTENSION
        );
    }

    let code = loader::load(&cli.file)?;
    if cli.dump {
        report::write_dump(&mut stdout().lock(), &code)?;
    }
    loader::validate(&code)
        .with_context(|| format!("{} is not valid bytecode", cli.file.display()))?;
    let program = Program::new(code);

    match cli.mode {
        Some(Mode::Debug) => debugger::run(program),
        None => execute(program, cli.gc, &mut stdout().lock()),
    }
}

/// runs to the end and reports the final state. With `gc` one collection follows,
/// reported with its own timing.
fn execute(mut program: Program, gc: bool, out: &mut impl Write) -> Result<()> {
    let start = Instant::now();
    program
        .run()
        .with_context(|| format!("runtime fault after {} instructions", program.instruction_count()))?;
    let elapsed = start.elapsed();

    writeln!(out, "Instruction count: {}", program.instruction_count())?;
    writeln!(out, "Execution time: {}", millis(elapsed))?;
    report::write_stack(out, &program)?;
    report::write_memory(out, &program)?;

    if gc {
        let start = Instant::now();
        let freed = program.collect_garbage();
        let elapsed = start.elapsed();
        writeln!(out, "Garbage collection freed {} objects", freed)?;
        writeln!(out, "GC time: {}", millis(elapsed))?;
        report::write_heap_stats(out, &program)?;
    }
    Ok(())
}

fn millis(d: Duration) -> String {
    format!("{:.3} ms", d.as_secs_f64() * 1000.0)
}

fn assemble(input: &Path, output: &Path) -> Result<()> {
    let src = fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let code = asm::assemble(&src).with_context(|| format!("cannot assemble {}", input.display()))?;
    fs::write(output, &code).with_context(|| format!("cannot write {}", output.display()))?;
    info!(input = %input.display(), output = %output.display(), size = code.len(), "assembled");
    println!("Wrote {} bytes to {}", code.len(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn command_lines() {
        let c = cli(&["prog.byc"]);
        assert!(c.mode.is_none() && !c.dump && !c.gc && !c.assemble);

        let c = cli(&["prog.byc", "debug"]);
        assert!(c.mode == Some(Mode::Debug));

        let c = cli(&["--assemble", "prog.asm", "-o", "prog.byc"]);
        assert!(c.assemble);
        assert_eq!(c.output, Some(PathBuf::from("prog.byc")));

        assert!(Cli::try_parse_from(["vm"]).is_err());
        assert!(Cli::try_parse_from(["vm", "prog.byc", "trace"]).is_err());
        assert!(Cli::try_parse_from(["vm", "--assemble", "prog.asm"]).is_err());
    }

    #[test]
    fn rejects_wrong_extension_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.bin");
        fs::write(&path, [0xFFu8]).unwrap();
        let err = run(cli(&[path.to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("is not a .byc file"));
    }

    #[test]
    fn assemble_then_run() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("prog.asm");
        let out = dir.path().join("prog.byc");
        fs::write(&src, "PUSH 2\nPUSH 3\nADD\nHALT\n").unwrap();

        run(cli(&[
            "--assemble",
            src.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(fs::read(&out).unwrap().len(), 12);
        run(cli(&[out.to_str().unwrap(), "--gc"])).unwrap();
    }

    #[test]
    fn final_report_with_timings() {
        // PUSH 1, PUSH 2, PAIR, POP, PUSH 3, HALT
        let program = Program::new(vec![
            0x01, 1, 0, 0, 0, 0x01, 2, 0, 0, 0, 0x50, 0x02, 0x01, 3, 0, 0, 0, 0xFF,
        ]);
        let mut out = Vec::<u8>::new();
        execute(program, true, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();

        assert_eq!(lines[0], "Instruction count: 6");
        assert!(lines[1].starts_with("Execution time: ") && lines[1].ends_with(" ms"));
        assert_eq!(
            lines[2..6],
            [
                "Stack (top -> bottom):",
                "[0] Int(3)",
                "Memory is empty",
                "Garbage collection freed 3 objects"
            ]
        );
        assert!(lines[6].starts_with("GC time: "));
        assert_eq!(lines[9], "Live on heap:    1");
    }

    #[test]
    fn millis_formatting() {
        assert_eq!(millis(Duration::from_micros(1500)), "1.500 ms");
    }

    #[test]
    fn invalid_and_faulting_programs_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.byc");

        fs::write(&path, [0x01u8, 0x02]).unwrap();
        let err = run(cli(&[path.to_str().unwrap()])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<loader::Error>(),
            Some(loader::Error::TruncatedInstruction { offset: 0, .. })
        ));

        // PUSH 1, PUSH 0, DIV, HALT
        fs::write(
            &path,
            [0x01u8, 1, 0, 0, 0, 0x01, 0, 0, 0, 0, 0x13, 0xFF],
        )
        .unwrap();
        let err = run(cli(&[path.to_str().unwrap()])).unwrap_err();
        assert!(format!("{:#}", err).contains("division by zero at pc=10"));
    }
}
