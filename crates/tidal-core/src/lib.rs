/*! Core IR types and builders for behavioral-to-structural hardware lowering.
 *
 * Converting event-driven processes into registers and combinational logic
 * requires a representation where signal reads, timed writes, and suspension
 * points are explicit. This crate provides the module/process/block graph the
 * lowering passes operate on, plus the analyses (CFG, dominators, temporal
 * regions) they share.
 */

pub mod analysis;
pub mod block;
pub mod builder;
pub mod format;
pub mod instructions;
pub mod module;
pub mod persist;
pub mod process;
pub mod signal;
pub mod types;
pub mod values;

pub use analysis::{ControlFlowGraph, DominatorTree, TemporalError, TemporalRegionId, TemporalRegions};
pub use block::{BasicBlock, BlockId, BlockParam, Terminator};
pub use builder::{ModuleBuilder, ProcessBuilder};
pub use instructions::{DriveField, Instruction};
pub use module::{value_type, ClockEdge, Module, Register, RegisterReset, StructuralBody};
pub use process::{Process, ProcessBody, ProcessId};
pub use signal::{Signal, SignalId, SignalKind};
pub use types::{StructField, StructType, Type};
pub use values::{BlockParamId, Constant, Delay, SourceLocation, TempId, Value};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
    #[error("Builder error: {0}")]
    BuilderError(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("Signal not found: {0}")]
    SignalNotFound(SignalId),
}

pub type Result<T> = std::result::Result<T, IrError>;
