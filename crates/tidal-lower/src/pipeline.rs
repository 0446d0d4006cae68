use crate::combine::DriveCombination;
use crate::deseq::Desequentialization;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::ecm::EarlyCodeMotion;
use crate::tcm::TemporalCodeMotion;
use crate::LowerError;
use std::collections::HashSet;
use tidal_core::{Module, Process, ProcessId, TemporalRegions};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Config {
    /// How many boolean sub-conditions desequentialization may analyze per
    /// signal before giving up on that signal.
    pub max_primitives: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { max_primitives: 8 }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), LowerError> {
        if self.max_primitives == 0 {
            return Err(LowerError::Config(
                "max_primitives must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared state of one pipeline invocation: configuration, the diagnostic
/// sink, and the processes excluded by an earlier pass failure.
pub struct LowerContext<'a> {
    pub config: &'a Config,
    pub sink: &'a mut dyn DiagnosticSink,
    excluded: HashSet<ProcessId>,
}

impl<'a> LowerContext<'a> {
    pub fn new(config: &'a Config, sink: &'a mut dyn DiagnosticSink) -> Self {
        Self {
            config,
            sink,
            excluded: HashSet::new(),
        }
    }

    pub fn is_excluded(&self, id: ProcessId) -> bool {
        self.excluded.contains(&id)
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Mark a process as unconvertible for the rest of the run. The process
    /// itself is left exactly as it was.
    pub fn exclude(&mut self, process: &Process, message: impl Into<String>) {
        let message = message.into();
        debug!(process = %process.name, "excluding process: {}", message);
        let mut diag = Diagnostic::warning(message).with_process(&process.name);
        if let Some(loc) = &process.loc {
            diag = diag.with_location(loc.clone());
        }
        self.sink.report(diag);
        self.excluded.insert(process.id);
    }
}

pub trait Pass {
    fn name(&self) -> &'static str;

    fn run_on_module(
        &mut self,
        module: &mut Module,
        ctx: &mut LowerContext,
    ) -> Result<bool, LowerError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub converted: usize,
    pub excluded: usize,
    pub retained: usize,
    pub changed: bool,
}

/// The lowering pass sequence over one module. Passes run strictly in order;
/// temporal regions are validated before the first mutation so a structurally
/// broken module aborts with the IR untouched.
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self, LowerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn run(
        &self,
        module: &mut Module,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<PipelineSummary, LowerError> {
        for process in module.processes.values() {
            if let Err(err) = TemporalRegions::compute(&process.body) {
                let mut diag = Diagnostic::error(err.to_string()).with_process(&process.name);
                if let Some(loc) = &process.loc {
                    diag = diag.with_location(loc.clone());
                }
                sink.report(diag);
                return Err(LowerError::Structural {
                    process: process.name.clone(),
                    message: err.to_string(),
                });
            }
        }

        let before = module.processes.len();
        let mut ctx = LowerContext::new(&self.config, sink);
        let mut changed = false;

        let mut passes: Vec<Box<dyn Pass>> = vec![
            Box::new(EarlyCodeMotion),
            Box::new(TemporalCodeMotion),
            Box::new(DriveCombination),
            Box::new(Desequentialization),
        ];

        for pass in &mut passes {
            debug!(pass = pass.name(), "running pass");
            changed |= pass.run_on_module(module, &mut ctx)?;
        }

        let excluded = ctx.excluded_count();
        let after = module.processes.len();
        Ok(PipelineSummary {
            converted: before - after,
            excluded,
            retained: after,
            changed,
        })
    }
}
