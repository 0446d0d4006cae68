use crate::expr::ExprBuilder;
use crate::motion::{def_site, def_site_map, DefSite};
use crate::pipeline::{LowerContext, Pass};
use crate::LowerError;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use tidal_core::analysis::{ControlFlowGraph, DominatorTree, TemporalRegions};
use tidal_core::{
    value_type, BlockId, BlockParam, BlockParamId, Delay, DriveField, Instruction, Module, Process,
    ProcessId, SignalId, TempId, Terminator, Type, Value,
};
use tracing::trace;

/// Move every drive to its temporal region's unique exit block, converting
/// control-flow-dependent execution into a data-dependent enable, then merge
/// same-signal same-delay drives behind a priority selector. Afterwards all
/// drives of a converted process live in region exit blocks.
pub struct TemporalCodeMotion;

impl Pass for TemporalCodeMotion {
    fn name(&self) -> &'static str {
        "temporal-code-motion"
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
            let Some(mut process) = module.processes.shift_remove(&id) else {
                continue;
            };
            let outcome = rewrite_process(module, &mut process);
            module.processes.shift_insert(index, id, process);

            match outcome? {
                Outcome::Done(c) => changed |= c,
                Outcome::Skip(reason) => {
                    if let Some(process) = module.process(id) {
                        ctx.exclude(process, reason);
                    }
                }
            }
        }

        Ok(changed)
    }
}

enum Outcome {
    Done(bool),
    Skip(String),
}

struct ExitMerge {
    exits: Vec<BlockId>,
    terminator: MergedTerminator,
}

enum MergedTerminator {
    Halt,
    Wait {
        dest: BlockId,
        sensitivity: Vec<SignalId>,
        param_types: Vec<Type>,
    },
}

fn rewrite_process(module: &mut Module, process: &mut Process) -> Result<Outcome, LowerError> {
    let trs = TemporalRegions::compute(&process.body).map_err(|err| LowerError::Structural {
        process: process.name.clone(),
        message: err.to_string(),
    })?;

    // Plan all exit unifications before committing any, so a region that
    // cannot be unified leaves the process untouched.
    let mut merges = Vec::new();
    for region in trs.regions() {
        match plan_exit_merge(module, process, &region.exits) {
            Ok(None) => {}
            Ok(Some(merge)) => merges.push(merge),
            Err(reason) => return Ok(Outcome::Skip(reason)),
        }
    }

    let mut changed = false;
    for merge in merges {
        commit_exit_merge(&mut process.body, merge);
        changed = true;
    }

    let trs = TemporalRegions::compute(&process.body).map_err(|err| LowerError::Structural {
        process: process.name.clone(),
        message: err.to_string(),
    })?;
    let cfg = ControlFlowGraph::build(&process.body);
    let dom = DominatorTree::from_cfg(&cfg);
    let defs = def_site_map(&process.body);

    for region_index in 0..trs.regions().len() {
        let region = &trs.regions()[region_index];
        let exit = match region.exits.as_slice() {
            [exit] => *exit,
            _ => return Ok(Outcome::Skip("temporal region without a unique exit".into())),
        };

        match rewrite_region(module, process, &cfg, &dom, &defs, &region.blocks, region.entry, exit)
        {
            Ok(region_changed) => changed |= region_changed,
            Err(reason) => return Ok(Outcome::Skip(reason)),
        }
    }

    Ok(Outcome::Done(changed))
}

fn plan_exit_merge(
    module: &Module,
    process: &Process,
    exits: &[BlockId],
) -> Result<Option<ExitMerge>, String> {
    if exits.is_empty() {
        return Err("temporal region without an exit".to_string());
    }
    if exits.len() == 1 {
        return Ok(None);
    }

    let terminators: Vec<&Terminator> = exits
        .iter()
        .filter_map(|id| process.body.block(*id))
        .map(|b| &b.terminator)
        .collect();

    if terminators.iter().all(|t| matches!(t, Terminator::Halt)) {
        return Ok(Some(ExitMerge {
            exits: exits.to_vec(),
            terminator: MergedTerminator::Halt,
        }));
    }

    let mut waits = terminators.iter().filter_map(|t| match t {
        Terminator::Wait {
            dest,
            dest_args,
            sensitivity,
        } => Some((*dest, dest_args, sensitivity)),
        _ => None,
    });
    let Some((dest, first_args, sensitivity)) = waits.next() else {
        return Err("region exits cannot be unified".to_string());
    };
    if terminators.len() != exits.len() {
        return Err("region exits cannot be unified".to_string());
    }
    for (other_dest, other_args, other_sens) in waits {
        if other_dest != dest || other_sens != sensitivity || other_args.len() != first_args.len() {
            return Err("region exits cannot be unified".to_string());
        }
    }
    if terminators
        .iter()
        .any(|t| !matches!(t, Terminator::Wait { .. }))
    {
        return Err("region exits cannot be unified".to_string());
    }

    let mut param_types = Vec::new();
    for arg in first_args {
        match value_type(module, &process.body, arg) {
            Some(ty) => param_types.push(ty),
            None => return Err("cannot type a value threaded through the region exit".to_string()),
        }
    }

    Ok(Some(ExitMerge {
        exits: exits.to_vec(),
        terminator: MergedTerminator::Wait {
            dest,
            sensitivity: sensitivity.clone(),
            param_types,
        },
    }))
}

fn commit_exit_merge(body: &mut tidal_core::ProcessBody, merge: ExitMerge) {
    let exit = body.create_block();

    match merge.terminator {
        MergedTerminator::Halt => {
            if let Some(block) = body.block_mut(exit) {
                block.set_terminator(Terminator::Halt);
            }
            for old in merge.exits {
                if let Some(block) = body.block_mut(old) {
                    block.set_terminator(Terminator::Jump(exit, vec![]));
                }
            }
        }
        MergedTerminator::Wait {
            dest,
            sensitivity,
            param_types,
        } => {
            let mut dest_args = Vec::new();
            if let Some(block) = body.block_mut(exit) {
                for (i, ty) in param_types.into_iter().enumerate() {
                    let index = block.add_param(BlockParam::new(format!("v{}", i), ty));
                    dest_args.push(Value::BlockParam(BlockParamId { block: exit, index }));
                }
                block.set_terminator(Terminator::Wait {
                    dest,
                    dest_args,
                    sensitivity,
                });
            }
            for old in merge.exits {
                if let Some(block) = body.block_mut(old) {
                    let args = match &block.terminator {
                        Terminator::Wait { dest_args, .. } => dest_args.clone(),
                        _ => vec![],
                    };
                    block.set_terminator(Terminator::Jump(exit, args));
                }
            }
        }
    }
}

struct DriveSpec {
    value: Value,
    enable: Option<Value>,
}

#[allow(clippy::too_many_arguments)]
fn rewrite_region(
    module: &mut Module,
    process: &mut Process,
    cfg: &ControlFlowGraph,
    dom: &DominatorTree,
    defs: &HashMap<TempId, (BlockId, usize)>,
    blocks: &[BlockId],
    entry: BlockId,
    exit: BlockId,
) -> Result<bool, String> {
    let region: HashSet<BlockId> = blocks.iter().copied().collect();

    // Drives outside the exit, in program order.
    let mut drive_sites: Vec<(BlockId, usize)> = Vec::new();
    let topo = region_topo(&process.body, cfg, blocks);
    let order: Vec<BlockId> = match &topo {
        Some(order) => order.clone(),
        None => blocks.to_vec(),
    };
    for &block_id in &order {
        if block_id == exit {
            continue;
        }
        if let Some(block) = process.body.block(block_id) {
            for (idx, inst) in block.instructions.iter().enumerate() {
                if inst.is_drive() {
                    drive_sites.push((block_id, idx));
                }
            }
        }
    }

    let exit_drive_count = process
        .body
        .block(exit)
        .map(|b| b.instructions.iter().filter(|i| i.is_drive()).count())
        .unwrap_or(0);

    if drive_sites.is_empty() && exit_drive_count <= 1 {
        return Ok(false);
    }

    if !drive_sites.is_empty() && topo.is_none() {
        return Err("control flow cycle inside a temporal region".to_string());
    }

    let dominates_exit = |value: &Value| -> bool {
        match def_site(defs, value) {
            DefSite::Everywhere => true,
            DefSite::Block(block) => dom.dominates(block, exit),
            DefSite::Unknown => false,
        }
    };

    // Everything a moved drive needs must already be visible at the exit;
    // early code motion is responsible for making this the common case.
    for &(block_id, idx) in &drive_sites {
        let Some(inst) = process
            .body
            .block(block_id)
            .and_then(|b| b.instructions.get(idx))
        else {
            continue;
        };
        for op in inst.operands() {
            if !dominates_exit(op) {
                return Err("drive operand is not available at the region exit".to_string());
            }
        }
    }

    let mut cb = ExprBuilder::new(module);

    // Reach conditions for the blocks that hold drives, from explicit branch
    // decisions. Computed over the acyclic region in topological order.
    let mut reach: HashMap<BlockId, Value> = HashMap::new();
    reach.insert(entry, Value::true_());
    if !drive_sites.is_empty() {
        let needed = reach_targets(&process.body, cfg, &region, &drive_sites);
        for &block_id in &order {
            if block_id == entry || !needed.contains(&block_id) {
                continue;
            }
            let mut cond: Option<Value> = None;
            for &pred in cfg.predecessors(block_id) {
                if !region.contains(&pred) {
                    continue;
                }
                let Some(pred_block) = process.body.block(pred) else {
                    continue;
                };
                if pred_block.terminator.is_suspension() {
                    continue;
                }
                let pred_reach = reach.get(&pred).cloned().unwrap_or_else(Value::false_);
                let edge = match &pred_block.terminator {
                    Terminator::Jump(_, _) => pred_reach,
                    Terminator::Branch {
                        condition,
                        then_block,
                        else_block,
                        ..
                    } => {
                        if *then_block == block_id && *else_block == block_id {
                            pred_reach
                        } else {
                            if !dominates_exit(condition) {
                                return Err(
                                    "branch condition is not available at the region exit"
                                        .to_string(),
                                );
                            }
                            if *then_block == block_id {
                                cb.and(pred_reach, condition.clone())
                            } else {
                                let negated = cb.not(condition.clone());
                                cb.and(pred_reach, negated)
                            }
                        }
                    }
                    _ => continue,
                };
                cond = Some(match cond {
                    None => edge,
                    Some(existing) => cb.or(existing, edge),
                });
            }
            reach.insert(block_id, cond.unwrap_or_else(Value::false_));
        }
    }

    // Assemble the full drive list for the exit in program order.
    let mut final_order: Vec<(SignalId, Option<DriveField>, Delay, DriveSpec)> = Vec::new();
    for &(block_id, idx) in &drive_sites {
        let Some(Instruction::Drive {
            signal,
            field,
            value,
            delay,
            enable,
        }) = process
            .body
            .block(block_id)
            .and_then(|b| b.instructions.get(idx))
            .cloned()
        else {
            continue;
        };
        let reached = reach.get(&block_id).cloned().unwrap_or_else(Value::false_);
        let combined = match enable {
            Some(en) => cb.and(reached, en),
            None => reached,
        };
        let enable = if combined.is_const_bool(true) {
            None
        } else {
            Some(combined)
        };
        final_order.push((signal, field, delay, DriveSpec { value, enable }));
    }
    if let Some(exit_block) = process.body.block(exit) {
        for inst in &exit_block.instructions {
            if let Instruction::Drive {
                signal,
                field,
                value,
                delay,
                enable,
            } = inst.clone()
            {
                final_order.push((signal, field, delay, DriveSpec { value, enable }));
            }
        }
    }

    // Combine same-target groups: first enabled wins, disjunction of enables.
    let mut groups: IndexMap<(SignalId, Option<DriveField>, Delay), Vec<DriveSpec>> =
        IndexMap::new();
    for (signal, field, delay, spec) in final_order {
        groups.entry((signal, field, delay)).or_default().push(spec);
    }

    let mut combined_any = false;
    let mut drives = Vec::new();
    for ((signal, field, delay), mut specs) in groups {
        if specs.len() == 1 {
            let spec = specs.pop().unwrap_or(DriveSpec {
                value: Value::Undefined,
                enable: None,
            });
            drives.push(Instruction::Drive {
                signal,
                field,
                value: spec.value,
                delay,
                enable: spec.enable,
            });
            continue;
        }

        combined_any = true;
        let mut value = specs
            .last()
            .map(|s| s.value.clone())
            .unwrap_or(Value::Undefined);
        for spec in specs.iter().rev().skip(1) {
            let select = spec.enable.clone().unwrap_or_else(Value::true_);
            value = cb.mux(select, spec.value.clone(), value);
        }

        let mut enable: Option<Value> = Some(Value::false_());
        for spec in &specs {
            enable = match (&enable, &spec.enable) {
                (_, None) => None,
                (None, _) => None,
                (Some(acc), Some(en)) => Some(cb.or(acc.clone(), en.clone())),
            };
        }
        let enable = enable.filter(|v| !v.is_const_bool(true));

        drives.push(Instruction::Drive {
            signal,
            field,
            value,
            delay,
            enable,
        });
    }

    let moved_any = !drive_sites.is_empty();
    if !moved_any && !combined_any {
        return Ok(false);
    }

    // Commit: strip the moved drives, then rebuild the exit block.
    let mut removals: HashMap<BlockId, Vec<usize>> = HashMap::new();
    for &(block_id, idx) in &drive_sites {
        removals.entry(block_id).or_default().push(idx);
    }
    for (block_id, mut indices) in removals {
        indices.sort_unstable_by(|a, b| b.cmp(a));
        if let Some(block) = process.body.block_mut(block_id) {
            for idx in indices {
                if idx < block.instructions.len() {
                    block.instructions.remove(idx);
                }
            }
        }
    }

    let pending = cb.take_pending();
    if let Some(exit_block) = process.body.block_mut(exit) {
        exit_block.instructions.retain(|inst| !inst.is_drive());
        exit_block.instructions.extend(pending);
        exit_block.instructions.extend(drives);
    }

    trace!(process = %process.name, "localized drives at {}", exit);
    Ok(true)
}

/// Blocks whose reach condition feeds some drive: the drive blocks plus all
/// their intra-region ancestors. Wait edges are region boundaries and do not
/// count as ancestry.
fn reach_targets(
    body: &tidal_core::ProcessBody,
    cfg: &ControlFlowGraph,
    region: &HashSet<BlockId>,
    drive_sites: &[(BlockId, usize)],
) -> HashSet<BlockId> {
    let mut needed = HashSet::new();
    let mut queue: VecDeque<BlockId> = drive_sites.iter().map(|&(b, _)| b).collect();
    while let Some(block) = queue.pop_front() {
        if !needed.insert(block) {
            continue;
        }
        for &pred in cfg.predecessors(block) {
            let pred_is_wait = body
                .block(pred)
                .map(|b| b.terminator.is_suspension())
                .unwrap_or(true);
            if region.contains(&pred) && !pred_is_wait && !needed.contains(&pred) {
                queue.push_back(pred);
            }
        }
    }
    needed
}

/// Topological order of the intra-region subgraph, or None if it has a cycle.
fn region_topo(
    body: &tidal_core::ProcessBody,
    cfg: &ControlFlowGraph,
    blocks: &[BlockId],
) -> Option<Vec<BlockId>> {
    let region: HashSet<BlockId> = blocks.iter().copied().collect();
    let is_wait = |block: BlockId| {
        body.block(block)
            .map(|b| b.terminator.is_suspension())
            .unwrap_or(true)
    };
    let mut indegree: HashMap<BlockId, usize> = blocks.iter().map(|&b| (b, 0)).collect();

    for &block in blocks {
        if is_wait(block) {
            continue;
        }
        for &succ in cfg.successors(block) {
            if region.contains(&succ) {
                if let Some(count) = indegree.get_mut(&succ) {
                    *count += 1;
                }
            }
        }
    }

    let mut queue: VecDeque<BlockId> = blocks
        .iter()
        .copied()
        .filter(|b| indegree.get(b) == Some(&0))
        .collect();
    let mut order = Vec::new();

    while let Some(block) = queue.pop_front() {
        order.push(block);
        if is_wait(block) {
            continue;
        }
        for &succ in cfg.successors(block) {
            if region.contains(&succ) {
                if let Some(count) = indegree.get_mut(&succ) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }
    }

    if order.len() == blocks.len() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticBuffer;
    use crate::pipeline::Config;
    use tidal_core::builder::ModuleBuilder;
    use tidal_core::SignalKind;

    fn run(module: &mut Module) -> (bool, DiagnosticBuffer) {
        let config = Config::default();
        let mut sink = DiagnosticBuffer::new();
        let changed = {
            let mut ctx = LowerContext::new(&config, &mut sink);
            TemporalCodeMotion.run_on_module(module, &mut ctx).unwrap()
        };
        (changed, sink)
    }

    #[test]
    fn branch_drives_collapse_into_exit() {
        let mut builder = ModuleBuilder::new("m");
        let sel = builder.signal("sel", Type::Bool, SignalKind::Input);
        let q = builder.signal("q", Type::Uint(8), SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let t = proc.create_block_id();
        let f = proc.create_block_id();
        let end = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        let c = proc.probe(sel);
        proc.branch(c, t, f);

        proc.switch_to_block(t).unwrap();
        proc.drive(q, Value::uint(1, 8), Delay::delta(), None);
        proc.jump(end);

        proc.switch_to_block(f).unwrap();
        proc.drive(q, Value::uint(0, 8), Delay::delta(), None);
        proc.jump(end);

        proc.switch_to_block(end).unwrap();
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        let (changed, sink) = run(&mut module);
        assert!(changed);
        assert!(sink.is_empty());

        let body = &module.process(id).unwrap().body;
        let drive_count = |block: BlockId| {
            body.block(block)
                .unwrap()
                .instructions
                .iter()
                .filter(|i| i.is_drive())
                .count()
        };
        assert_eq!(drive_count(t), 0);
        assert_eq!(drive_count(f), 0);
        assert_eq!(drive_count(end), 1);
        assert!(body
            .block(end)
            .unwrap()
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Mux { .. })));

        // every drive now lives in a region exit block
        let trs = TemporalRegions::compute(body).unwrap();
        for (block_id, block) in &body.blocks {
            if block.instructions.iter().any(|i| i.is_drive()) {
                assert!(trs.is_exit(*block_id));
            }
        }

        // a second run changes nothing
        let (changed, sink) = run(&mut module);
        assert!(!changed);
        assert!(sink.is_empty());
    }

    #[test]
    fn compatible_wait_exits_are_merged() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let sel = builder.signal("sel", Type::Bool, SignalKind::Input);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let w1 = proc.create_block_id();
        let w2 = proc.create_block_id();
        let resume = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        let c = proc.probe(sel);
        proc.branch(c, w1, w2);

        proc.switch_to_block(w1).unwrap();
        proc.wait(resume, vec![], vec![clk]);

        proc.switch_to_block(w2).unwrap();
        proc.wait(resume, vec![], vec![clk]);

        proc.switch_to_block(resume).unwrap();
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        let (changed, sink) = run(&mut module);
        assert!(changed);
        assert!(sink.is_empty());

        let body = &module.process(id).unwrap().body;
        let trs = TemporalRegions::compute(body).unwrap();
        for region in trs.regions() {
            assert_eq!(region.exits.len(), 1);
        }
        // the old exits now jump into the merged one
        assert!(matches!(
            body.block(w1).unwrap().terminator,
            Terminator::Jump(_, _)
        ));
        assert!(matches!(
            body.block(w2).unwrap().terminator,
            Terminator::Jump(_, _)
        ));
    }

    #[test]
    fn incompatible_exits_exclude_the_process() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let sel = builder.signal("sel", Type::Bool, SignalKind::Input);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let w = proc.create_block_id();
        let h = proc.create_block_id();
        let resume = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        let c = proc.probe(sel);
        proc.branch(c, w, h);

        proc.switch_to_block(w).unwrap();
        proc.wait(resume, vec![], vec![clk]);

        proc.switch_to_block(h).unwrap();
        proc.halt();

        proc.switch_to_block(resume).unwrap();
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();
        let before = format!("{}", module.process(id).unwrap());

        let (_, sink) = run(&mut module);
        assert_eq!(sink.warnings().count(), 1);

        let after = format!("{}", module.process(id).unwrap());
        assert_eq!(before, after);
    }
}
