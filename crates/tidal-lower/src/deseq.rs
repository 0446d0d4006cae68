use crate::dnf::{AtomTable, Cube, Dnf};
use crate::expr::ExprBuilder;
use crate::motion::def_site_map;
use crate::pipeline::{LowerContext, Pass};
use crate::LowerError;
use indexmap::IndexMap;
use std::collections::HashMap;
use thiserror::Error;
use tidal_core::analysis::{TemporalRegionId, TemporalRegions};
use tidal_core::{
    value_type, BlockId, BlockParamId, ClockEdge, Constant, Delay, DriveField, Instruction, Module,
    Process, ProcessId, Register, RegisterReset, SignalId, TempId, Terminator, Type, Value,
};
use tracing::{debug, trace};

/// Detect "update the stored value on a clock edge, else hold" drive patterns
/// and replace the whole process with structural registers plus inlined
/// combinational logic. Conversion is all-or-nothing per process: if any
/// driven signal resists classification, the process is left byte-for-byte
/// unchanged and an unsupported-pattern diagnostic is emitted.
pub struct Desequentialization;

impl Pass for Desequentialization {
    fn name(&self) -> &'static str {
        "desequentialization"
    }

    fn run_on_module(
        &mut self,
        module: &mut Module,
        ctx: &mut LowerContext,
    ) -> Result<bool, LowerError> {
        let mut changed = false;
        let ids: Vec<ProcessId> = module.processes.keys().copied().collect();

        for id in ids {
            if ctx.is_excluded(id) {
                continue;
            }
            let Some(index) = module.processes.get_index_of(&id) else {
                continue;
            };
            let Some(process) = module.processes.shift_remove(&id) else {
                continue;
            };

            let trs = match TemporalRegions::compute(&process.body) {
                Ok(trs) => trs,
                Err(err) => {
                    let name = process.name.clone();
                    module.processes.shift_insert(index, id, process);
                    return Err(LowerError::Structural {
                        process: name,
                        message: err.to_string(),
                    });
                }
            };

            match convert_process(module, &process, &trs, ctx.config.max_primitives) {
                Ok(conversion) => {
                    debug!(
                        process = %process.name,
                        registers = conversion.registers.len(),
                        "converted process to registers"
                    );
                    module.body.combinational.extend(conversion.comb);
                    module.body.registers.extend(conversion.registers);
                    changed = true;
                }
                Err(Unsupported::NoDrives) => {
                    trace!(process = %process.name, "process drives nothing; skipping");
                    module.processes.shift_insert(index, id, process);
                }
                Err(reason) => {
                    module.processes.shift_insert(index, id, process);
                    if let Some(process) = module.process(id) {
                        ctx.exclude(process, reason.to_string());
                    }
                }
            }
        }

        Ok(changed)
    }
}

/// Why a process (or one of its signals) cannot become a register. Local and
/// recoverable: surfaces as a diagnostic, never as an error return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
enum Unsupported {
    #[error("process drives no signal")]
    NoDrives,

    #[error("{signal} is driven outside a temporal region exit")]
    DriveOutsideExit { signal: SignalId },

    #[error("{signal} is driven through an aggregate field")]
    FieldDrive { signal: SignalId },

    #[error("{signal} is driven from more than one temporal region")]
    MultipleDrivingRegions { signal: SignalId },

    #[error("{signal} is driven with inconsistent delays")]
    MixedDelays { signal: SignalId },

    #[error("{signal} is driven with a non-delta delay")]
    TimedDrive { signal: SignalId },

    #[error("{signal} is driven by several uncombined drives")]
    MultipleDrives { signal: SignalId },

    #[error("enable of {signal} is not a recognizable clock-edge test")]
    NoClockEdge { signal: SignalId },

    #[error("enable of {signal} conjoins edges of two different clocks")]
    MultipleClocks { signal: SignalId },

    #[error("{signal} depends on a value sampled more than one cycle in the past")]
    StaleSample { signal: SignalId },

    #[error("enable of {signal} references conditions other than signal probes")]
    OpaqueCondition { signal: SignalId },

    #[error("gave up after analyzing {limit} boolean sub-conditions")]
    BudgetExceeded { limit: usize },

    #[error("{signal} depends on a value carried across a suspension point")]
    LoopCarriedValue { signal: SignalId },
}

struct Conversion {
    comb: Vec<Instruction>,
    registers: Vec<Register>,
}

struct DriveSite {
    region: TemporalRegionId,
    value: Value,
    delay: Delay,
    enable: Option<Value>,
    field: Option<DriveField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomKind {
    /// Probe sampled in the driving region: the present-cycle value.
    CurrentProbe(SignalId),
    /// Probe sampled exactly one suspension earlier.
    OldProbe(SignalId),
    /// Probe from further in the past than one cycle.
    StaleProbe(SignalId),
    Opaque,
}

/// Per-signal analysis state: the interned sub-conditions, the enable cube
/// assumed true when simplifying the data path, and the rewrite memo.
struct RegCx {
    signal: SignalId,
    driving: TemporalRegionId,
    atoms: AtomTable,
    assumption: Cube,
    budget: usize,
    memo: HashMap<Value, Value>,
}

struct Converter<'a> {
    eb: ExprBuilder<'a>,
    body: &'a tidal_core::ProcessBody,
    defs: HashMap<TempId, (BlockId, usize)>,
    trs: &'a TemporalRegions,
    probe_cache: HashMap<SignalId, Value>,
}

fn convert_process(
    module: &mut Module,
    process: &Process,
    trs: &TemporalRegions,
    budget: usize,
) -> Result<Conversion, Unsupported> {
    let body = &process.body;
    let defs = def_site_map(body);

    let mut sites: IndexMap<SignalId, Vec<DriveSite>> = IndexMap::new();
    for (&block_id, block) in &body.blocks {
        for inst in &block.instructions {
            let Instruction::Drive {
                signal,
                field,
                value,
                delay,
                enable,
            } = inst
            else {
                continue;
            };
            let Some(region) = trs.region_of(block_id) else {
                return Err(Unsupported::DriveOutsideExit { signal: *signal });
            };
            if !trs.is_exit(block_id) {
                return Err(Unsupported::DriveOutsideExit { signal: *signal });
            }
            sites.entry(*signal).or_default().push(DriveSite {
                region,
                value: value.clone(),
                delay: *delay,
                enable: enable.clone(),
                field: field.clone(),
            });
        }
    }
    if sites.is_empty() {
        return Err(Unsupported::NoDrives);
    }

    let mut converter = Converter {
        eb: ExprBuilder::new(module),
        body,
        defs,
        trs,
        probe_cache: HashMap::new(),
    };

    let mut registers = Vec::new();
    for (signal, sites) in sites {
        registers.push(converter.analyze_signal(signal, sites, budget)?);
    }

    Ok(Conversion {
        comb: converter.eb.take_pending(),
        registers,
    })
}

impl<'a> Converter<'a> {
    fn analyze_signal(
        &mut self,
        signal: SignalId,
        sites: Vec<DriveSite>,
        budget: usize,
    ) -> Result<Register, Unsupported> {
        if sites.len() > 1 {
            let first = &sites[0];
            if sites.iter().any(|s| s.region != first.region) {
                return Err(Unsupported::MultipleDrivingRegions { signal });
            }
            if sites.iter().any(|s| s.delay != first.delay) {
                return Err(Unsupported::MixedDelays { signal });
            }
            return Err(Unsupported::MultipleDrives { signal });
        }
        let site = sites.into_iter().next().ok_or(Unsupported::NoDrives)?;

        if site.field.is_some() {
            return Err(Unsupported::FieldDrive { signal });
        }
        if site.delay.time != 0 {
            return Err(Unsupported::TimedDrive { signal });
        }
        let enable = site.enable.clone().ok_or(Unsupported::NoClockEdge { signal })?;

        let mut rcx = RegCx {
            signal,
            driving: site.region,
            atoms: AtomTable::new(),
            assumption: Cube::top(),
            budget,
            memo: HashMap::new(),
        };

        let mut dnf = self.build_dnf(&mut rcx, &enable, true)?;
        dnf.simplify();
        let cube = match dnf.cubes.as_slice() {
            [cube] if !cube.is_empty() => cube.clone(),
            _ => return Err(Unsupported::NoClockEdge { signal }),
        };

        let mut currents = Vec::new();
        let mut olds = Vec::new();
        for (atom, polarity) in cube.literals() {
            match self.classify_atom(rcx.driving, rcx.atoms.get(atom)) {
                AtomKind::CurrentProbe(sig) => currents.push((atom, polarity, sig)),
                AtomKind::OldProbe(sig) => olds.push((atom, polarity, sig)),
                AtomKind::StaleProbe(sig) => {
                    return Err(Unsupported::StaleSample { signal: sig })
                }
                AtomKind::Opaque => return Err(Unsupported::OpaqueCondition { signal }),
            }
        }

        let (_, old_polarity, clock) = match olds.as_slice() {
            [] => return Err(Unsupported::NoClockEdge { signal }),
            [old] => *old,
            olds => {
                if olds.iter().any(|&(_, _, sig)| sig != olds[0].2) {
                    return Err(Unsupported::MultipleClocks { signal });
                }
                return Err(Unsupported::OpaqueCondition { signal });
            }
        };
        let matched = currents
            .iter()
            .find(|&&(_, polarity, sig)| sig == clock && polarity == !old_polarity)
            .copied()
            .ok_or(Unsupported::NoClockEdge { signal })?;
        let edge = if old_polarity {
            ClockEdge::Falling
        } else {
            ClockEdge::Rising
        };

        // The data path may assume the whole enable cube holds: the register
        // only samples when it does.
        rcx.assumption = cube.clone();

        let (data_source, reset) = self.detect_reset(&mut rcx, &site.value, clock)?;
        let data = self.rewrite(&mut rcx, &data_source)?;

        let mut enable_value: Option<Value> = None;
        for &(atom, polarity, _) in currents.iter().filter(|&&(atom, _, _)| atom != matched.0) {
            let atom_value = rcx.atoms.get(atom).clone();
            let base = self.rewrite(&mut rcx, &atom_value)?;
            let literal = if polarity { base } else { self.eb.not(base) };
            enable_value = Some(match enable_value {
                None => literal,
                Some(acc) => self.eb.and(acc, literal),
            });
        }

        Ok(Register {
            signal,
            clock,
            edge,
            data,
            enable: enable_value,
            reset,
        })
    }

    /// A drive value of shape `mux(reset, constant, data)` (either polarity,
    /// exactly one constant arm) denotes a synchronous reset.
    fn detect_reset(
        &mut self,
        rcx: &mut RegCx,
        value: &Value,
        clock: SignalId,
    ) -> Result<(Value, Option<RegisterReset>), Unsupported> {
        let Some(Instruction::Mux {
            condition,
            then_val,
            else_val,
            ..
        }) = self.def_inst(value).cloned()
        else {
            return Ok((value.clone(), None));
        };

        let mut cond = self.build_dnf(rcx, &condition, true)?;
        cond.simplify();
        cond.assume(&rcx.assumption);

        let literal = match cond.cubes.as_slice() {
            [cube] if cube.len() == 1 => cube.literals().next(),
            _ => None,
        };
        let Some((atom, polarity)) = literal else {
            return Ok((value.clone(), None));
        };
        let AtomKind::CurrentProbe(reset_signal) =
            self.classify_atom(rcx.driving, rcx.atoms.get(atom))
        else {
            return Ok((value.clone(), None));
        };
        if reset_signal == clock {
            return Ok((value.clone(), None));
        }

        match (then_val.is_constant(), else_val.is_constant()) {
            (true, false) => Ok((
                else_val,
                Some(RegisterReset {
                    signal: reset_signal,
                    active_high: polarity,
                    value: then_val,
                }),
            )),
            (false, true) => Ok((
                then_val,
                Some(RegisterReset {
                    signal: reset_signal,
                    active_high: !polarity,
                    value: else_val,
                }),
            )),
            _ => Ok((value.clone(), None)),
        }
    }

    fn def_inst(&self, value: &Value) -> Option<&Instruction> {
        let temp = value.as_temp()?;
        let (block, idx) = self.defs.get(&temp)?;
        self.body.block(*block)?.instructions.get(*idx)
    }

    fn build_dnf(
        &mut self,
        rcx: &mut RegCx,
        value: &Value,
        positive: bool,
    ) -> Result<Dnf, Unsupported> {
        if let Value::Constant(Constant::Bool(b)) = value {
            return Ok(if *b == positive {
                Dnf::true_()
            } else {
                Dnf::false_()
            });
        }

        let limit = rcx.budget;
        let budget_err = move |_| Unsupported::BudgetExceeded { limit };

        let Some(inst) = self.def_inst(value).cloned() else {
            return self.dnf_atom(rcx, value, positive);
        };
        match inst {
            Instruction::And { left, right, .. } => {
                let l = self.build_dnf(rcx, &left, positive)?;
                let r = self.build_dnf(rcx, &right, positive)?;
                if positive {
                    l.and(r).map_err(budget_err)
                } else {
                    l.or(r).map_err(budget_err)
                }
            }
            Instruction::Or { left, right, .. } => {
                let l = self.build_dnf(rcx, &left, positive)?;
                let r = self.build_dnf(rcx, &right, positive)?;
                if positive {
                    l.or(r).map_err(budget_err)
                } else {
                    l.and(r).map_err(budget_err)
                }
            }
            Instruction::Not { operand, .. } => self.build_dnf(rcx, &operand, !positive),
            Instruction::Xor { left, right, .. } => {
                let ll = self.build_dnf(rcx, &left, true)?;
                let ln = self.build_dnf(rcx, &left, false)?;
                let rl = self.build_dnf(rcx, &right, true)?;
                let rn = self.build_dnf(rcx, &right, false)?;
                let (a, b) = if positive {
                    (ll.and(rn), ln.and(rl))
                } else {
                    (ll.and(rl), ln.and(rn))
                };
                a.map_err(budget_err)?
                    .or(b.map_err(budget_err)?)
                    .map_err(budget_err)
            }
            Instruction::Mux {
                condition,
                then_val,
                else_val,
                ..
            } => {
                let c = self.build_dnf(rcx, &condition, true)?;
                let cn = self.build_dnf(rcx, &condition, false)?;
                let t = self.build_dnf(rcx, &then_val, positive)?;
                let e = self.build_dnf(rcx, &else_val, positive)?;
                c.and(t)
                    .map_err(budget_err)?
                    .or(cn.and(e).map_err(budget_err)?)
                    .map_err(budget_err)
            }
            _ => self.dnf_atom(rcx, value, positive),
        }
    }

    fn dnf_atom(
        &mut self,
        rcx: &mut RegCx,
        value: &Value,
        positive: bool,
    ) -> Result<Dnf, Unsupported> {
        let atom = rcx.atoms.intern(value.clone());
        if rcx.atoms.len() > rcx.budget {
            return Err(Unsupported::BudgetExceeded { limit: rcx.budget });
        }
        Ok(Dnf::literal(atom, positive))
    }

    fn classify_atom(&self, driving: TemporalRegionId, value: &Value) -> AtomKind {
        match value {
            Value::Temp(temp) => {
                let Some((block, idx)) = self.defs.get(temp) else {
                    return AtomKind::Opaque;
                };
                let Some(Instruction::Probe { signal, .. }) =
                    self.body.block(*block).and_then(|b| b.instructions.get(*idx))
                else {
                    return AtomKind::Opaque;
                };
                let Some(region) = self.trs.region_of(*block) else {
                    return AtomKind::Opaque;
                };
                if region == driving {
                    AtomKind::CurrentProbe(*signal)
                } else if self.direct_old_allowed(region, driving) {
                    AtomKind::OldProbe(*signal)
                } else {
                    AtomKind::StaleProbe(*signal)
                }
            }
            Value::BlockParam(id) => self.classify_param(driving, id),
            _ => AtomKind::Opaque,
        }
    }

    /// A probe used directly from an earlier region is only "one cycle old"
    /// when that region runs exactly once, immediately before the driving
    /// region: the driving region has no other way in, and nothing re-enters
    /// the probing region.
    fn direct_old_allowed(&self, region: TemporalRegionId, driving: TemporalRegionId) -> bool {
        region != driving
            && self.trs.region_predecessors(driving) == [region]
            && self.trs.region_predecessors(region).is_empty()
    }

    /// A parameter of the driving region's entry models a value threaded
    /// across the suspension. It is the previous cycle's sample when every
    /// wait into the entry passes a probe taken in the suspending region.
    fn classify_param(&self, driving: TemporalRegionId, id: &BlockParamId) -> AtomKind {
        let entry = self.trs.region(driving).entry;
        if id.block != entry {
            return AtomKind::Opaque;
        }

        let mut signal: Option<SignalId> = None;
        let mut any_wait = false;
        for (&block_id, block) in &self.body.blocks {
            let Terminator::Wait {
                dest, dest_args, ..
            } = &block.terminator
            else {
                continue;
            };
            if *dest != entry {
                continue;
            }
            any_wait = true;
            let Some(arg) = dest_args.get(id.index as usize) else {
                return AtomKind::Opaque;
            };
            let Some(Instruction::Probe { signal: s, .. }) = self.def_inst(arg) else {
                return AtomKind::Opaque;
            };
            let probed = *s;
            let def_region = arg
                .as_temp()
                .and_then(|t| self.defs.get(&t))
                .and_then(|(block, _)| self.trs.region_of(*block));
            if def_region != self.trs.region_of(block_id) || def_region.is_none() {
                return AtomKind::StaleProbe(probed);
            }
            match signal {
                None => signal = Some(probed),
                Some(previous) if previous != probed => return AtomKind::Opaque,
                Some(_) => {}
            }
        }

        match (any_wait, signal) {
            (true, Some(signal)) => AtomKind::OldProbe(signal),
            _ => AtomKind::Opaque,
        }
    }

    /// Re-express a process value at module scope, staging new instructions.
    /// Boolean subgraphs are normalized and specialized under the enable
    /// assumption; probes become continuous module-level reads.
    fn rewrite(&mut self, rcx: &mut RegCx, value: &Value) -> Result<Value, Unsupported> {
        if let Some(hit) = rcx.memo.get(value) {
            return Ok(hit.clone());
        }

        let out = match value {
            Value::Constant(_) | Value::Undefined => value.clone(),
            Value::BlockParam(_) => {
                return Err(Unsupported::LoopCarriedValue { signal: rcx.signal })
            }
            Value::Temp(_) => {
                let Some(inst) = self.def_inst(value).cloned() else {
                    return Err(Unsupported::OpaqueCondition { signal: rcx.signal });
                };
                match inst {
                    Instruction::Probe { signal, .. } => self.stage_probe(rcx, value, signal)?,
                    Instruction::And { .. }
                    | Instruction::Or { .. }
                    | Instruction::Not { .. }
                    | Instruction::Xor { .. } => self.rewrite_bool(rcx, value)?,
                    Instruction::Mux {
                        condition,
                        then_val,
                        else_val,
                        ..
                    } => {
                        let arms_are_bool = value_type(self.eb.module(), self.body, &then_val)
                            == Some(Type::Bool);
                        if arms_are_bool {
                            self.rewrite_bool(rcx, value)?
                        } else {
                            let c = self.rewrite_bool(rcx, &condition)?;
                            let t = self.rewrite(rcx, &then_val)?;
                            let e = self.rewrite(rcx, &else_val)?;
                            self.eb.mux(c, t, e)
                        }
                    }
                    Instruction::Eq { left, right, .. } => {
                        let left = self.rewrite(rcx, &left)?;
                        let right = self.rewrite(rcx, &right)?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::Eq {
                            result: result.clone(),
                            left,
                            right,
                        });
                        result
                    }
                    Instruction::Ne { left, right, .. } => {
                        let left = self.rewrite(rcx, &left)?;
                        let right = self.rewrite(rcx, &right)?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::Ne {
                            result: result.clone(),
                            left,
                            right,
                        });
                        result
                    }
                    Instruction::Add { left, right, ty, .. } => {
                        let left = self.rewrite(rcx, &left)?;
                        let right = self.rewrite(rcx, &right)?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::Add {
                            result: result.clone(),
                            left,
                            right,
                            ty,
                        });
                        result
                    }
                    Instruction::Sub { left, right, ty, .. } => {
                        let left = self.rewrite(rcx, &left)?;
                        let right = self.rewrite(rcx, &right)?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::Sub {
                            result: result.clone(),
                            left,
                            right,
                            ty,
                        });
                        result
                    }
                    Instruction::StructCreate { fields, ty, .. } => {
                        let fields = fields
                            .iter()
                            .map(|f| self.rewrite(rcx, f))
                            .collect::<Result<Vec<_>, _>>()?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::StructCreate {
                            result: result.clone(),
                            fields,
                            ty,
                        });
                        result
                    }
                    Instruction::ExtractField {
                        aggregate, index, ..
                    } => {
                        let aggregate = self.rewrite(rcx, &aggregate)?;
                        let result = self.eb.temp();
                        self.eb.push(Instruction::ExtractField {
                            result: result.clone(),
                            aggregate,
                            index,
                        });
                        result
                    }
                    Instruction::Drive { .. } => {
                        return Err(Unsupported::OpaqueCondition { signal: rcx.signal })
                    }
                }
            }
        };

        rcx.memo.insert(value.clone(), out.clone());
        Ok(out)
    }

    fn stage_probe(
        &mut self,
        rcx: &mut RegCx,
        value: &Value,
        signal: SignalId,
    ) -> Result<Value, Unsupported> {
        let def_region = value
            .as_temp()
            .and_then(|t| self.defs.get(&t))
            .and_then(|(block, _)| self.trs.region_of(*block));
        if def_region != Some(rcx.driving) {
            return Err(Unsupported::StaleSample { signal });
        }
        if let Some(hit) = self.probe_cache.get(&signal) {
            return Ok(hit.clone());
        }
        let result = self.eb.temp();
        self.eb.push(Instruction::Probe {
            result: result.clone(),
            signal,
        });
        self.probe_cache.insert(signal, result.clone());
        Ok(result)
    }

    fn rewrite_bool(&mut self, rcx: &mut RegCx, value: &Value) -> Result<Value, Unsupported> {
        let mut dnf = self.build_dnf(rcx, value, true)?;
        dnf.simplify();
        let assumption = rcx.assumption.clone();
        dnf.assume(&assumption);
        self.materialize_dnf(rcx, &dnf)
    }

    fn materialize_dnf(&mut self, rcx: &mut RegCx, dnf: &Dnf) -> Result<Value, Unsupported> {
        if dnf.is_false() {
            return Ok(Value::false_());
        }
        if dnf.is_true() {
            return Ok(Value::true_());
        }

        let mut disjunction: Option<Value> = None;
        for cube in &dnf.cubes {
            let mut conjunction: Option<Value> = None;
            for (atom, polarity) in cube.literals() {
                let atom_value = rcx.atoms.get(atom).clone();
                let base = self.rewrite(rcx, &atom_value)?;
                let literal = if polarity { base } else { self.eb.not(base) };
                conjunction = Some(match conjunction {
                    None => literal,
                    Some(acc) => self.eb.and(acc, literal),
                });
            }
            let cube_value = conjunction.unwrap_or_else(Value::true_);
            disjunction = Some(match disjunction {
                None => cube_value,
                Some(acc) => self.eb.or(acc, cube_value),
            });
        }

        Ok(disjunction.unwrap_or_else(Value::false_))
    }
}
