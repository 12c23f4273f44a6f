//! Reads bytecode files and checks them before anything gets executed.
//!
//! The file format is a flat sequence of instructions without any header, each one
//! being an opcode byte, optionally followed by a 4 byte little endian operand.

use crate::opcode::{self, OpCode};
use crate::vm::Program;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::result::Result as StdResult;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid opcode 0x{opcode:02X} at pc={offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    #[error("truncated instruction 0x{opcode:02X} at pc={offset}")]
    TruncatedInstruction { opcode: u8, offset: usize },

    #[error("program has no HALT instruction")]
    MissingHalt,
}

pub type Result<T> = StdResult<T, Error>;

/// Reads the whole file. An empty file is an error as well.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let io_err = |source| Error::Io {
        path: path.to_owned(),
        source,
    };
    let code = fs::read(path).map_err(io_err)?;
    if code.is_empty() {
        return Err(io_err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "file is empty",
        )));
    }
    debug!(path = %path.display(), size = code.len(), "loaded bytecode");
    Ok(code)
}

/// Walks the code once: every opcode must be known, every operand complete, and a HALT
/// must be reached. Bytes after the first HALT are not looked at, and jump targets or
/// memory indices are only checked when they are used.
pub fn validate(code: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < code.len() {
        let opcode = code[offset];
        let size = OpCode::serialized_size_of(opcode)
            .ok_or(Error::InvalidOpcode { opcode, offset })?;
        if offset + size > code.len() {
            return Err(Error::TruncatedInstruction { opcode, offset });
        }
        if opcode == opcode::HALT {
            debug!(halt = offset, "bytecode validated");
            return Ok(());
        }
        offset += size;
    }
    Err(Error::MissingHalt)
}

/// load + validate + handing the code to a fresh [`Program`]
pub fn load_program(path: impl AsRef<Path>) -> Result<Program> {
    let code = load(path)?;
    validate(&code)?;
    Ok(Program::new(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{encode, OpCode::*, DUP, HALT, POP, STORE};
    use std::io::Write;

    #[test]
    fn accepts_well_formed_code() {
        let code = encode(&[Push(1), Jz(11), Halt, Push(2), Halt]);
        assert!(validate(&code).is_ok());
    }

    #[test]
    fn stops_at_first_halt() {
        let mut code = encode(&[Push(1), Halt]);
        code.extend_from_slice(&[0x99, 0x01]);
        assert!(validate(&code).is_ok());
    }

    #[test]
    fn rejects_unknown_opcode() {
        let code = vec![POP, 0x04, HALT];
        assert!(matches!(
            validate(&code),
            Err(Error::InvalidOpcode {
                opcode: 0x04,
                offset: 1
            })
        ));
    }

    #[test]
    fn rejects_truncated_operand() {
        let code = vec![DUP, STORE, 1, 0];
        assert!(matches!(
            validate(&code),
            Err(Error::TruncatedInstruction {
                opcode: STORE,
                offset: 1
            })
        ));
    }

    #[test]
    fn requires_halt() {
        let code = encode(&[Push(1), Pop]);
        assert!(matches!(validate(&code), Err(Error::MissingHalt)));
        assert!(matches!(validate(&[]), Err(Error::MissingHalt)));
    }

    #[test]
    fn operand_bytes_are_not_opcodes() {
        // the operand of PUSH contains 0xFF bytes, which must not count as HALT
        let code = encode(&[Push(-1), Pop]);
        assert!(matches!(validate(&code), Err(Error::MissingHalt)));
    }

    #[test]
    fn load_reads_whole_file() {
        let code = encode(&[Push(2), Push(3), Add, Halt]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&code).unwrap();

        assert_eq!(load(file.path()).unwrap(), code);
        let mut program = load_program(file.path()).unwrap();
        program.run().unwrap();
        assert_eq!(program.int_value(program.stack()[0]), Some(5));
    }

    #[test]
    fn load_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path().join("missing.byc")),
            Err(Error::Io { .. })
        ));

        let empty = tempfile::NamedTempFile::new().unwrap();
        let Err(Error::Io { source, .. }) = load(empty.path()) else {
            panic!("empty file was accepted");
        };
        assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
    }
}
