use thiserror::Error;

use crate::ast::NodeId;
use crate::program::Label;

/// Errors raised while turning pattern source text into a tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected `{found}` at offset {pos}")]
    Unexpected { found: char, pos: usize },
    #[error("unexpected end of pattern, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("invalid quantifier at offset {pos}")]
    InvalidQuantifier { pos: usize },
    #[error("`{construct}` at offset {pos} is not supported")]
    Unsupported { construct: String, pos: usize },
}

/// Errors raised while lowering a tree into a program.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("node id {0} is used more than once")]
    DuplicateNodeId(NodeId),
    #[error("node {id}: literal of {len} bytes exceeds the maximum of {max}")]
    LiteralTooLong { id: NodeId, len: usize, max: usize },
    #[error("node {0}: empty literal")]
    EmptyLiteral(NodeId),
    #[error("node {id}: minimum {min} is greater than maximum {max}")]
    InvalidBounds { id: NodeId, min: u32, max: u32 },
    #[error("node {0}: unbounded repetition of a group that can match the empty string")]
    EmptyRepetition(NodeId),
    #[error("no node ids left after {0} for the search wrapper")]
    IdSpaceExhausted(NodeId),
    #[error("internal error: label `{0}` is defined more than once")]
    DuplicateLabel(Label),
    #[error("internal error: label `{0}` is never defined")]
    UndefinedLabel(Label),
}

/// Errors raised by the matcher while executing a program.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("execution fuel exhausted after {0} steps")]
    FuelExhausted(u32),
    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(u32),
    #[error("instruction pointer {0} is out of range")]
    InvalidJump(usize),
    #[error("return with an empty call stack")]
    ReturnWithoutCall,
    #[error("register `{0}` went out of range")]
    RegisterOverflow(&'static str),
    #[error("group {0} has no active state")]
    InactiveGroup(NodeId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}
