use crate::motion::blocks_between;
use crate::pipeline::{LowerContext, Pass};
use crate::LowerError;
use std::collections::HashMap;
use tidal_core::analysis::{ControlFlowGraph, DominatorTree, TemporalRegions};
use tidal_core::{BlockId, Instruction, Module, ProcessBody, ProcessId, SignalId, TempId, Value};
use tracing::trace;

/// Hoist side-effect-free instructions to the earliest block where their
/// operands are available, and probes as far up as their temporal region
/// allows. Later passes rely on drive operands being defined at region exits
/// without needing to relocate the defining computations themselves.
pub struct EarlyCodeMotion;

impl Pass for EarlyCodeMotion {
    fn name(&self) -> &'static str {
        "early-code-motion"
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
            let Some(process) = module.processes.get_mut(&id) else {
                continue;
            };
            let trs =
                TemporalRegions::compute(&process.body).map_err(|err| LowerError::Structural {
                    process: process.name.clone(),
                    message: err.to_string(),
                })?;
            if hoist_process(&mut process.body, &trs) {
                trace!(process = %process.name, "hoisted instructions");
                changed = true;
            }
        }

        Ok(changed)
    }
}

fn hoist_process(body: &mut ProcessBody, trs: &TemporalRegions) -> bool {
    let cfg = ControlFlowGraph::build(body);
    let dom = DominatorTree::from_cfg(&cfg);
    let rpo = cfg.reverse_postorder();

    let mut defs: HashMap<TempId, BlockId> = HashMap::new();
    for (&block_id, block) in &body.blocks {
        for inst in &block.instructions {
            if let Some(temp) = inst.result().and_then(|r| r.as_temp()) {
                defs.insert(temp, block_id);
            }
        }
    }

    let mut changed = false;

    // Reverse postorder guarantees operand definitions settle before their
    // users are examined, so one sweep reaches a fixpoint.
    for &block_id in &rpo {
        let mut i = 0;
        loop {
            let Some(inst) = body
                .block(block_id)
                .and_then(|b| b.instructions.get(i))
                .cloned()
            else {
                break;
            };

            let dest = if inst.is_pure() {
                pure_dest(&inst, block_id, body.entry_block, &dom, &defs)
            } else if let Instruction::Probe { signal, .. } = inst {
                probe_dest(body, &cfg, &dom, trs, block_id, i, signal)
            } else {
                block_id
            };

            if dest != block_id {
                let moved = match body.block_mut(block_id) {
                    Some(b) => b.instructions.remove(i),
                    None => break,
                };
                if let Some(temp) = moved.result().and_then(|r| r.as_temp()) {
                    defs.insert(temp, dest);
                }
                if let Some(target) = body.block_mut(dest) {
                    target.instructions.push(moved);
                }
                changed = true;
            } else {
                i += 1;
            }
        }
    }

    changed
}

/// The deepest block that defines an operand; the instruction lands directly
/// below all of its operand definitions.
fn pure_dest(
    inst: &Instruction,
    current: BlockId,
    entry: BlockId,
    dom: &DominatorTree,
    defs: &HashMap<TempId, BlockId>,
) -> BlockId {
    let mut target = entry;
    for op in inst.operands() {
        let site = match op {
            Value::Constant(_) | Value::Undefined => continue,
            Value::BlockParam(id) => id.block,
            Value::Temp(t) => match defs.get(t) {
                Some(block) => *block,
                None => return current,
            },
        };
        if dom.dominates(target, site) {
            target = site;
        } else if !dom.dominates(site, target) {
            return current;
        }
    }
    if target != current && !dom.dominates(target, current) {
        return current;
    }
    target
}

/// Walk the immediate-dominator chain upward, stopping at the temporal region
/// boundary and before crossing any same-signal probe or drive on a path
/// between the hoist destination and the probe's block.
fn probe_dest(
    body: &ProcessBody,
    cfg: &ControlFlowGraph,
    dom: &DominatorTree,
    trs: &TemporalRegions,
    block_id: BlockId,
    idx: usize,
    signal: SignalId,
) -> BlockId {
    let tr = trs.region_of(block_id);
    let Some(block) = body.block(block_id) else {
        return block_id;
    };
    if block.instructions[..idx]
        .iter()
        .any(|other| other.touches_signal(signal))
    {
        return block_id;
    }

    let mut dest = block_id;
    loop {
        let Some(up) = dom.idom(dest) else {
            break;
        };
        if trs.region_of(up) != tr {
            break;
        }
        let between = blocks_between(cfg, up, block_id);
        let blocked = between.iter().any(|&x| {
            let Some(xb) = body.block(x) else {
                return false;
            };
            if x == block_id {
                // a loop re-enters the probe's block: every other
                // instruction in it would be crossed
                xb.instructions
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != idx && other.touches_signal(signal))
            } else {
                xb.instructions.iter().any(|other| other.touches_signal(signal))
            }
        });
        if blocked {
            break;
        }
        dest = up;
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticBuffer;
    use crate::pipeline::Config;
    use tidal_core::builder::ModuleBuilder;
    use tidal_core::{Delay, SignalKind, Type};

    fn run(module: &mut Module) -> bool {
        let config = Config::default();
        let mut sink = DiagnosticBuffer::new();
        let mut ctx = LowerContext::new(&config, &mut sink);
        EarlyCodeMotion.run_on_module(module, &mut ctx).unwrap()
    }

    #[test]
    fn pure_op_hoists_to_operand_block() {
        let mut builder = ModuleBuilder::new("m");
        let a = builder.signal("a", Type::Bool, SignalKind::Input);
        let b = builder.signal("b", Type::Bool, SignalKind::Input);
        let q = builder.signal("q", Type::Bool, SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let left = proc.create_block_id();
        let right = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        let va = proc.probe(a);
        let vb = proc.probe(b);
        proc.branch(va.clone(), left, right);

        // the and() depends only on entry values, so it belongs in entry
        proc.switch_to_block(left).unwrap();
        let both = proc.and_(va, vb);
        proc.drive(q, both, Delay::delta(), None);
        proc.halt();

        proc.switch_to_block(right).unwrap();
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        assert!(run(&mut module));

        let body = &module.process(id).unwrap().body;
        let entry_block = body.block(entry).unwrap();
        assert!(entry_block
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::And { .. })));
        let left_block = body.block(left).unwrap();
        assert!(left_block
            .instructions
            .iter()
            .all(|inst| !matches!(inst, Instruction::And { .. })));

        // second run reaches a fixpoint
        assert!(!run(&mut module));
    }

    #[test]
    fn probe_stays_inside_its_temporal_region() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let d = builder.signal("d", Type::Bool, SignalKind::Input);
        let q = builder.signal("q", Type::Bool, SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let resumed = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        proc.wait(resumed, vec![], vec![clk]);

        proc.switch_to_block(resumed).unwrap();
        let vd = proc.probe(d);
        proc.drive(q, vd, Delay::delta(), None);
        proc.wait(resumed, vec![], vec![clk]);

        let id = proc.build().unwrap();
        let mut module = builder.build();

        // the probe's region entry is `resumed` itself: nothing to do
        assert!(!run(&mut module));

        let body = &module.process(id).unwrap().body;
        assert!(body
            .block(resumed)
            .unwrap()
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::Probe { .. })));
    }

    #[test]
    fn probe_does_not_cross_same_signal_drive() {
        let mut builder = ModuleBuilder::new("m");
        let s = builder.signal("s", Type::Bool, SignalKind::Internal);
        let q = builder.signal("q", Type::Bool, SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let mid1 = proc.create_block_id();
        let mid2 = proc.create_block_id();
        let tail = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        proc.branch(Value::true_(), mid1, mid2);

        proc.switch_to_block(mid1).unwrap();
        proc.drive(s, Value::true_(), Delay::delta(), None);
        proc.jump(tail);

        proc.switch_to_block(mid2).unwrap();
        proc.jump(tail);

        proc.switch_to_block(tail).unwrap();
        let vs = proc.probe(s);
        proc.drive(q, vs, Delay::delta(), None);
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        run(&mut module);

        let body = &module.process(id).unwrap().body;
        // hoisting to entry would reorder the probe above mid1's drive of s
        assert!(body
            .block(tail)
            .unwrap()
            .instructions
            .iter()
            .any(|inst| matches!(inst, Instruction::Probe { .. })));
    }
}
