/*! Unified interface for behavioral-to-structural hardware lowering.
 *
 * Single import for everything you need: the IR data model, the builder API,
 * the structural analyses, and the lowering pass pipeline.
 */

pub use tidal_core as core;
pub use tidal_lower as lower;

pub use tidal_core::{
    analysis::{ControlFlowGraph, DominatorTree, TemporalRegions},
    block::{BasicBlock, BlockId, Terminator},
    builder::ModuleBuilder,
    instructions::Instruction,
    module::{ClockEdge, Module, Register},
    process::Process,
    signal::{Signal, SignalId, SignalKind},
    types::Type,
    values::{Delay, Value},
};

pub use tidal_lower::{
    Config, Diagnostic, DiagnosticBuffer, DiagnosticSink, LowerError, Pipeline, PipelineSummary,
};
