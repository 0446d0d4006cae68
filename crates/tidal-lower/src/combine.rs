use crate::pipeline::{LowerContext, Pass};
use crate::LowerError;
use indexmap::IndexMap;
use std::collections::HashSet;
use tidal_core::{
    BlockId, Delay, DriveField, Instruction, Module, Process, ProcessId, SignalId, Type, Value,
};
use tracing::trace;

/// Fuse drives that together cover every field of one aggregate signal into a
/// single whole-aggregate drive, and drop duplicated whole-aggregate drives.
/// Purely shape-changing: observable signal behavior is untouched, but the
/// fused form is what desequentialization can pattern-match.
pub struct DriveCombination;

impl Pass for DriveCombination {
    fn name(&self) -> &'static str {
        "drive-combination"
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
            changed |= combine_process(module, &mut process);
            module.processes.shift_insert(index, id, process);
        }

        Ok(changed)
    }
}

fn combine_process(module: &mut Module, process: &mut Process) -> bool {
    let mut changed = false;
    let block_ids: Vec<BlockId> = process.body.blocks.keys().copied().collect();
    for block_id in block_ids {
        changed |= combine_block(module, process, block_id);
    }
    if changed {
        trace!(process = %process.name, "combined aggregate drives");
    }
    changed
}

struct FusePlan {
    signal: SignalId,
    delay: Delay,
    ty: Type,
    /// Instruction indices of the fused field drives, in field order.
    sources: Vec<usize>,
    /// Where the whole-aggregate drive replaces the last field drive.
    insert_at: usize,
}

fn is_unconditional(enable: &Option<Value>) -> bool {
    match enable {
        None => true,
        Some(v) => v.is_const_bool(true),
    }
}

fn combine_block(module: &mut Module, process: &mut Process, block_id: BlockId) -> bool {
    let Some(block) = process.body.block(block_id) else {
        return false;
    };

    // Candidate field drives per (signal, delay). Only statically indexed,
    // unconditionally enabled drives participate, and only when no other
    // drive of the same target could be reordered against them.
    let mut field_groups: IndexMap<(SignalId, Delay), Vec<(usize, usize)>> = IndexMap::new();
    let mut disqualified: HashSet<(SignalId, Delay)> = HashSet::new();
    let mut last_whole: IndexMap<(SignalId, Delay), Value> = IndexMap::new();
    let mut duplicate_removals: Vec<usize> = Vec::new();

    for (idx, inst) in block.instructions.iter().enumerate() {
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
        let aggregate = module
            .signal(*signal)
            .map(|s| s.ty.is_aggregate())
            .unwrap_or(false);
        if !aggregate {
            continue;
        }
        let key = (*signal, *delay);
        if !is_unconditional(enable) {
            disqualified.insert(key);
            last_whole.swap_remove(&key);
            continue;
        }
        match field {
            Some(DriveField::Index(i)) => {
                field_groups.entry(key).or_default().push((*i, idx));
                last_whole.swap_remove(&key);
            }
            Some(DriveField::Dynamic(_)) => {
                disqualified.insert(key);
                last_whole.swap_remove(&key);
            }
            None => {
                // an identical whole-aggregate drive immediately repeated
                // (no same-target drive in between) collapses to one
                disqualified.insert(key);
                if last_whole.get(&key) == Some(value) {
                    duplicate_removals.push(idx);
                } else {
                    last_whole.insert(key, value.clone());
                }
            }
        }
    }

    let mut plans: Vec<FusePlan> = Vec::new();
    for ((signal, delay), mut members) in field_groups {
        if disqualified.contains(&(signal, delay)) {
            continue;
        }
        let Some(ty) = module.signal(signal).map(|s| s.ty.clone()) else {
            continue;
        };
        let field_count = ty.field_count();
        if members.len() != field_count {
            continue;
        }
        members.sort_by_key(|&(field_index, _)| field_index);
        let total_partition = members
            .iter()
            .enumerate()
            .all(|(expected, &(field_index, _))| field_index == expected);
        if !total_partition {
            continue;
        }
        let insert_at = members
            .iter()
            .map(|&(_, idx)| idx)
            .max()
            .unwrap_or(0);
        plans.push(FusePlan {
            signal,
            delay,
            ty,
            sources: members.iter().map(|&(_, idx)| idx).collect(),
            insert_at,
        });
    }

    if plans.is_empty() && duplicate_removals.is_empty() {
        return false;
    }

    let mut removed: HashSet<usize> = duplicate_removals.iter().copied().collect();
    for plan in &plans {
        removed.extend(plan.sources.iter().copied());
    }

    // Materialize replacements, then rebuild the instruction list in place.
    let mut replacements: IndexMap<usize, Vec<Instruction>> = IndexMap::new();
    for plan in &plans {
        let Some(block) = process.body.block(block_id) else {
            return false;
        };
        let mut fields = Vec::new();
        for &source in &plan.sources {
            let Some(Instruction::Drive { value, .. }) = block.instructions.get(source) else {
                return false;
            };
            fields.push(value.clone());
        }
        let result = Value::Temp(module.new_temp());
        replacements.insert(
            plan.insert_at,
            vec![
                Instruction::StructCreate {
                    result: result.clone(),
                    fields,
                    ty: plan.ty.clone(),
                },
                Instruction::Drive {
                    signal: plan.signal,
                    field: None,
                    value: result,
                    delay: plan.delay,
                    enable: None,
                },
            ],
        );
    }

    let Some(block) = process.body.block_mut(block_id) else {
        return false;
    };
    let old = std::mem::take(&mut block.instructions);
    let mut rebuilt = Vec::with_capacity(old.len());
    for (idx, inst) in old.into_iter().enumerate() {
        if let Some(fused) = replacements.swap_remove(&idx) {
            rebuilt.extend(fused);
            continue;
        }
        if removed.contains(&idx) {
            continue;
        }
        rebuilt.push(inst);
    }
    block.instructions = rebuilt;

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticBuffer;
    use crate::pipeline::{Config, LowerContext};
    use tidal_core::builder::ModuleBuilder;
    use tidal_core::{SignalKind, StructField, StructType};

    fn pair_type() -> Type {
        Type::Struct(StructType::new(vec![
            StructField::new("lo", Type::Uint(4)),
            StructField::new("hi", Type::Uint(4)),
        ]))
    }

    fn run(module: &mut Module) -> bool {
        let config = Config::default();
        let mut sink = DiagnosticBuffer::new();
        let mut ctx = LowerContext::new(&config, &mut sink);
        DriveCombination.run_on_module(module, &mut ctx).unwrap()
    }

    #[test]
    fn total_field_partition_fuses() {
        let mut builder = ModuleBuilder::new("m");
        let s = builder.signal("s", pair_type(), SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        proc.switch_to_block(entry).unwrap();
        proc.drive_field(s, 0, Value::uint(3, 4), Delay::delta(), None);
        proc.drive_field(s, 1, Value::uint(5, 4), Delay::delta(), None);
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        assert!(run(&mut module));

        let body = &module.process(id).unwrap().body;
        let block = body.block(entry).unwrap();
        let drives: Vec<&Instruction> =
            block.instructions.iter().filter(|i| i.is_drive()).collect();
        assert_eq!(drives.len(), 1);
        assert!(matches!(
            drives[0],
            Instruction::Drive { field: None, .. }
        ));
        assert!(block
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::StructCreate { .. })));

        // nothing left to fuse on a rerun
        assert!(!run(&mut module));
    }

    #[test]
    fn partial_cover_is_left_alone() {
        let mut builder = ModuleBuilder::new("m");
        let s = builder.signal("s", pair_type(), SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        proc.switch_to_block(entry).unwrap();
        proc.drive_field(s, 0, Value::uint(3, 4), Delay::delta(), None);
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        assert!(!run(&mut module));
        let body = &module.process(id).unwrap().body;
        assert!(matches!(
            body.block(entry).unwrap().instructions[0],
            Instruction::Drive {
                field: Some(DriveField::Index(0)),
                ..
            }
        ));
    }

    #[test]
    fn conditional_field_drive_is_left_alone() {
        let mut builder = ModuleBuilder::new("m");
        let en = builder.signal("en", Type::Bool, SignalKind::Input);
        let s = builder.signal("s", pair_type(), SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        proc.switch_to_block(entry).unwrap();
        let v = proc.probe(en);
        proc.drive_field(s, 0, Value::uint(3, 4), Delay::delta(), Some(v));
        proc.drive_field(s, 1, Value::uint(5, 4), Delay::delta(), None);
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        assert!(!run(&mut module));
        let body = &module.process(id).unwrap().body;
        let drives = body
            .block(entry)
            .unwrap()
            .instructions
            .iter()
            .filter(|i| i.is_drive())
            .count();
        assert_eq!(drives, 2);
    }

    #[test]
    fn duplicate_whole_drives_collapse() {
        let mut builder = ModuleBuilder::new("m");
        let s = builder.signal("s", pair_type(), SignalKind::Output);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        proc.switch_to_block(entry).unwrap();
        let whole = proc.struct_create(
            vec![Value::uint(1, 4), Value::uint(2, 4)],
            pair_type(),
        );
        proc.drive(s, whole.clone(), Delay::delta(), None);
        proc.drive(s, whole, Delay::delta(), None);
        proc.halt();

        let id = proc.build().unwrap();
        let mut module = builder.build();

        assert!(run(&mut module));
        let body = &module.process(id).unwrap().body;
        let drives = body
            .block(entry)
            .unwrap()
            .instructions
            .iter()
            .filter(|i| i.is_drive())
            .count();
        assert_eq!(drives, 1);
    }
}
