//! A small two-pass assembler for the textual form of the instruction set.
//!
//! ```text
//! ; count down from 3
//!         PUSH 3
//!         STORE 0
//! loop:   LOAD 0
//!         JZ end
//!         ...
//!         JMP loop
//! end:    HALT
//! ```
//!
//! Mnemonics are the upper case names of [`OpCode`] variants (plus aliases like `CMP`).
//! An operand is either an integer or a label, which is replaced by the byte offset
//! the label was defined at.

use crate::opcode::OpCode;
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashMap;
use std::result::Result as StdResult;
use thiserror::Error;
use tracing::debug;

#[derive(Parser)]
#[grammar = "asm.pest"]
struct AsmParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] Box<pest::error::Error<Rule>>),

    #[error("line {line}: unknown instruction {mnemonic}")]
    UnknownInstruction { mnemonic: String, line: usize },

    #[error("line {line}: {mnemonic} needs an operand")]
    MissingOperand { mnemonic: String, line: usize },

    #[error("line {line}: {mnemonic} takes no operand")]
    UnexpectedOperand { mnemonic: String, line: usize },

    #[error("line {line}: label {label} is not defined")]
    UndefinedLabel { label: String, line: usize },

    #[error("line {line}: label {label} is defined twice")]
    DuplicateLabel { label: String, line: usize },

    #[error("line {line}: {text} does not fit into 32 bits")]
    InvalidNumber { text: String, line: usize },
}

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand<'a> {
    Number(i32),
    Label(&'a str),
}

/// an instruction whose labels are not resolved yet
#[derive(Debug)]
struct Statement<'a> {
    line: usize,
    mnemonic: &'a str,
    operand: Option<Operand<'a>>,
}

/// Translates assembly source into bytecode. The output passes
/// [`loader::validate`](crate::loader::validate) as long as the source contains a HALT.
pub fn assemble(src: &str) -> Result<Vec<u8>> {
    let pairs = AsmParser::parse(Rule::file, src).map_err(Box::new)?;

    // first pass: collect the statements and the offset of every label
    let mut labels = HashMap::new();
    let mut statements = vec![];
    let mut offset = 0;
    for pair in pairs.flat_map(|file| file.into_inner()) {
        let line = pair.line_col().0;
        match pair.as_rule() {
            Rule::label => {
                let label = pair.as_str().trim_end_matches(':').trim_end();
                if labels.insert(label, offset).is_some() {
                    return Err(Error::DuplicateLabel {
                        label: label.into(),
                        line,
                    });
                }
            }
            Rule::instruction => {
                let statement = parse_instruction(pair)?;
                offset += encoded_size(&statement)?;
                statements.push(statement);
            }
            _ => {}
        }
    }

    // second pass: resolve labels and emit
    let mut code = Vec::with_capacity(offset);
    for statement in &statements {
        let operand = match statement.operand {
            None => None,
            Some(Operand::Number(x)) => Some(x),
            Some(Operand::Label(label)) => match labels.get(label) {
                Some(target) => Some(to_operand(*target, statement.line)?),
                None => {
                    return Err(Error::UndefinedLabel {
                        label: label.into(),
                        line: statement.line,
                    })
                }
            },
        };
        let op = OpCode::from_mnemonic(statement.mnemonic, operand).ok_or_else(|| {
            Error::UnknownInstruction {
                mnemonic: statement.mnemonic.into(),
                line: statement.line,
            }
        })?;
        code.extend(op.to_bytes());
    }

    debug!(
        instructions = statements.len(),
        labels = labels.len(),
        size = code.len(),
        "assembled"
    );
    Ok(code)
}

fn parse_instruction(pair: Pair) -> Result<Statement> {
    let line = pair.line_col().0;
    let mut parts = pair.into_inner();
    let mnemonic = parts.next().map_or("", |p| p.as_str());
    let operand = match parts.next() {
        None => None,
        Some(p) if p.as_rule() == Rule::number => {
            let text = p.as_str();
            let x = text.parse().map_err(|_| Error::InvalidNumber {
                text: text.into(),
                line,
            })?;
            Some(Operand::Number(x))
        }
        Some(p) => Some(Operand::Label(p.as_str())),
    };
    Ok(Statement {
        line,
        mnemonic,
        operand,
    })
}

/// checks mnemonic and operand presence, and returns the encoded size
fn encoded_size(statement: &Statement) -> Result<usize> {
    let mnemonic = || statement.mnemonic.to_string();
    let line = statement.line;
    match (OpCode::takes_operand(statement.mnemonic), statement.operand) {
        (None, _) => Err(Error::UnknownInstruction {
            mnemonic: mnemonic(),
            line,
        }),
        (Some(true), None) => Err(Error::MissingOperand {
            mnemonic: mnemonic(),
            line,
        }),
        (Some(false), Some(_)) => Err(Error::UnexpectedOperand {
            mnemonic: mnemonic(),
            line,
        }),
        (Some(takes_operand), _) => {
            OpCode::from_mnemonic(statement.mnemonic, takes_operand.then_some(0))
                .map(|op| op.serialized_size())
                .ok_or_else(|| Error::UnknownInstruction {
                    mnemonic: mnemonic(),
                    line,
                })
        }
    }
}

fn to_operand(offset: usize, line: usize) -> Result<i32> {
    i32::try_from(offset).map_err(|_| Error::InvalidNumber {
        text: offset.to_string(),
        line,
    })
}
