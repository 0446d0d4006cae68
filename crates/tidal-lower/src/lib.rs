/*! Lower event-driven processes into structural hardware.
 *
 * A process with branches and wait points cannot be emitted as gates and
 * registers directly. This pipeline proves when it can be restructured into
 * pure combinational logic plus clocked registers—and performs the rewrite
 * without changing which time step any signal is sampled in. Processes that
 * resist conversion are left untouched rather than approximated.
 */

pub mod combine;
pub mod deseq;
pub mod diag;
pub mod dnf;
pub mod ecm;
pub mod expr;
pub mod motion;
pub mod pipeline;
pub mod tcm;

pub use combine::DriveCombination;
pub use deseq::Desequentialization;
pub use diag::{Diagnostic, DiagnosticBuffer, DiagnosticSink, Severity};
pub use ecm::EarlyCodeMotion;
pub use pipeline::{Config, LowerContext, Pass, Pipeline, PipelineSummary};
pub use tcm::TemporalCodeMotion;

use thiserror::Error;

/// Fatal failures of a pipeline run. Unsupported drive/enable shapes are not
/// errors—they exclude the affected process and surface as diagnostics.
#[derive(Error, Debug)]
pub enum LowerError {
    #[error("structural error in process {process}: {message}")]
    Structural { process: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
