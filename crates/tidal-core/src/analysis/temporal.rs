use crate::analysis::cfg::ControlFlowGraph;
use crate::block::BlockId;
use crate::process::ProcessBody;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TemporalRegionId(pub u32);

impl std::fmt::Display for TemporalRegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tr{}", self.0)
    }
}

/// Partition of a process CFG into maximal regions that execute within one
/// logical time step. Region boundaries are exactly the wait edges; every
/// reachable block belongs to exactly one region.
#[derive(Debug, Clone)]
pub struct TemporalRegions {
    assignment: HashMap<BlockId, TemporalRegionId>,
    regions: Vec<RegionInfo>,
    wait_preds: HashMap<TemporalRegionId, Vec<TemporalRegionId>>,
}

#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub id: TemporalRegionId,
    pub entry: BlockId,
    pub blocks: Vec<BlockId>,
    pub exits: Vec<BlockId>,
}

/// The CFG shape violates an assumption the partition requires. Always a
/// reported analysis failure, never a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemporalError {
    #[error("{block} is entered both by a wait edge and by ordinary control flow")]
    MixedEntry { block: BlockId },

    #[error("{block} is reachable from two different temporal regions")]
    AmbiguousRegion { block: BlockId },
}

impl TemporalRegions {
    pub fn compute(body: &ProcessBody) -> Result<Self, TemporalError> {
        let cfg = ControlFlowGraph::build(body);
        let reachable = cfg.reachable_blocks();

        let mut wait_targets: HashSet<BlockId> = HashSet::new();
        let mut ordinary_targets: HashSet<BlockId> = HashSet::new();
        for (&block_id, block) in &body.blocks {
            if !reachable.contains(&block_id) {
                continue;
            }
            let is_wait = block.terminator.is_suspension();
            for succ in block.successors() {
                if is_wait {
                    wait_targets.insert(succ);
                } else {
                    ordinary_targets.insert(succ);
                }
            }
        }

        // Resumption must land at an unambiguous region entry.
        for &block_id in &wait_targets {
            if ordinary_targets.contains(&block_id) {
                return Err(TemporalError::MixedEntry { block: block_id });
            }
        }

        let mut assignment: HashMap<BlockId, TemporalRegionId> = HashMap::new();
        let mut entries: Vec<BlockId> = Vec::new();

        let mut seed = |block: BlockId,
                        assignment: &mut HashMap<BlockId, TemporalRegionId>,
                        entries: &mut Vec<BlockId>| {
            let id = TemporalRegionId(entries.len() as u32);
            assignment.insert(block, id);
            entries.push(block);
        };

        seed(body.entry_block, &mut assignment, &mut entries);
        for &block_id in body.blocks.keys() {
            if block_id != body.entry_block
                && reachable.contains(&block_id)
                && wait_targets.contains(&block_id)
            {
                seed(block_id, &mut assignment, &mut entries);
            }
        }

        // Flood the region ids along ordinary edges.
        let mut queue: VecDeque<BlockId> = entries.iter().copied().collect();
        while let Some(block_id) = queue.pop_front() {
            let tr = assignment[&block_id];
            let block = match body.block(block_id) {
                Some(b) => b,
                None => continue,
            };
            if block.terminator.is_suspension() {
                continue;
            }
            for succ in block.successors() {
                match assignment.get(&succ) {
                    None => {
                        assignment.insert(succ, tr);
                        queue.push_back(succ);
                    }
                    Some(&existing) if existing != tr => {
                        return Err(TemporalError::AmbiguousRegion { block: succ });
                    }
                    Some(_) => {}
                }
            }
        }

        let mut regions: Vec<RegionInfo> = entries
            .iter()
            .enumerate()
            .map(|(i, &entry)| RegionInfo {
                id: TemporalRegionId(i as u32),
                entry,
                blocks: Vec::new(),
                exits: Vec::new(),
            })
            .collect();

        for (&block_id, block) in &body.blocks {
            if let Some(&tr) = assignment.get(&block_id) {
                let region = &mut regions[tr.0 as usize];
                region.blocks.push(block_id);
                if block.terminator.is_region_exit() {
                    region.exits.push(block_id);
                }
            }
        }

        let mut wait_preds: HashMap<TemporalRegionId, Vec<TemporalRegionId>> = HashMap::new();
        for (&block_id, block) in &body.blocks {
            let Some(&from) = assignment.get(&block_id) else {
                continue;
            };
            if block.terminator.is_suspension() {
                for succ in block.successors() {
                    if let Some(&to) = assignment.get(&succ) {
                        let preds = wait_preds.entry(to).or_default();
                        if !preds.contains(&from) {
                            preds.push(from);
                        }
                    }
                }
            }
        }

        Ok(Self {
            assignment,
            regions,
            wait_preds,
        })
    }

    pub fn region_of(&self, block: BlockId) -> Option<TemporalRegionId> {
        self.assignment.get(&block).copied()
    }

    pub fn regions(&self) -> &[RegionInfo] {
        &self.regions
    }

    pub fn region(&self, id: TemporalRegionId) -> &RegionInfo {
        &self.regions[id.0 as usize]
    }

    pub fn is_exit(&self, block: BlockId) -> bool {
        self.region_of(block)
            .map(|tr| self.region(tr).exits.contains(&block))
            .unwrap_or(false)
    }

    /// Regions that transition into `id` through a wait edge, i.e. the
    /// regions whose signal samples are one suspension older.
    pub fn region_predecessors(&self, id: TemporalRegionId) -> &[TemporalRegionId] {
        self.wait_preds
            .get(&id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::signal::SignalKind;
    use crate::types::Type;
    use crate::values::Value;

    #[test]
    fn two_regions_across_wait() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let check = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        proc.wait(check, vec![], vec![clk]);

        proc.switch_to_block(check).unwrap();
        proc.wait(check, vec![], vec![clk]);

        let id = proc.build().unwrap();
        let module = builder.build();
        let body = &module.process(id).unwrap().body;

        let trs = TemporalRegions::compute(body).unwrap();
        assert_eq!(trs.regions().len(), 2);
        assert_ne!(trs.region_of(entry), trs.region_of(check));
        assert!(trs.is_exit(entry));
        assert!(trs.is_exit(check));

        let check_tr = trs.region_of(check).unwrap();
        let preds = trs.region_predecessors(check_tr);
        assert!(preds.contains(&trs.region_of(entry).unwrap()));
        assert!(preds.contains(&check_tr));
    }

    #[test]
    fn ordinary_merge_of_two_regions_is_an_error() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let resumed = proc.create_block_id();
        let join = proc.create_block_id();

        // entry jumps to join; resumed (a fresh region after the wait) also
        // jumps to join: join is reachable from two regions.
        proc.switch_to_block(entry).unwrap();
        proc.branch(Value::true_(), join, resumed);

        proc.switch_to_block(resumed).unwrap();
        proc.wait(join, vec![], vec![clk]);

        proc.switch_to_block(join).unwrap();
        proc.halt();

        let id = proc.build().unwrap();
        let module = builder.build();
        let body = &module.process(id).unwrap().body;

        let err = TemporalRegions::compute(body).unwrap_err();
        assert_eq!(err, TemporalError::MixedEntry { block: join });
    }

    #[test]
    fn every_reachable_block_has_exactly_one_region() {
        let mut builder = ModuleBuilder::new("m");
        let clk = builder.signal("clk", Type::Bool, SignalKind::Input);
        let mut proc = builder.process("p");

        let entry = proc.entry_block_id();
        let a = proc.create_block_id();
        let b = proc.create_block_id();
        let join = proc.create_block_id();

        proc.switch_to_block(entry).unwrap();
        proc.wait(a, vec![], vec![clk]);

        proc.switch_to_block(a).unwrap();
        proc.branch(Value::true_(), b, join);

        proc.switch_to_block(b).unwrap();
        proc.jump(join);

        proc.switch_to_block(join).unwrap();
        proc.wait(a, vec![], vec![clk]);

        let id = proc.build().unwrap();
        let module = builder.build();
        let body = &module.process(id).unwrap().body;

        let trs = TemporalRegions::compute(body).unwrap();
        assert_eq!(trs.regions().len(), 2);
        for block_id in body.blocks.keys() {
            assert!(trs.region_of(*block_id).is_some());
        }
        let tr = trs.region_of(a).unwrap();
        assert_eq!(trs.region_of(b), Some(tr));
        assert_eq!(trs.region_of(join), Some(tr));
        assert_eq!(trs.region(tr).exits, vec![join]);
    }
}
