/*! Dominance-based code-motion utilities shared by the lowering passes.
 *
 * "Move this operation as early/late as its operands allow" recurs in early
 * code motion, temporal code motion, and desequentialization. Expressed here
 * as worklist queries over the dominator tree instead of ad-hoc pointer
 * hoisting.
 */

use std::collections::{HashMap, HashSet, VecDeque};
use tidal_core::analysis::ControlFlowGraph;
use tidal_core::{BlockId, ProcessBody, TempId, Value};

/// Where a value is defined, for dominance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    /// Constants and undef: available in every block.
    Everywhere,
    Block(BlockId),
    /// A temporary with no visible definition (malformed input).
    Unknown,
}

pub fn def_site_map(body: &ProcessBody) -> HashMap<TempId, (BlockId, usize)> {
    let mut map = HashMap::new();
    for (&block_id, block) in &body.blocks {
        for (idx, inst) in block.instructions.iter().enumerate() {
            if let Some(temp) = inst.result().and_then(|r| r.as_temp()) {
                map.insert(temp, (block_id, idx));
            }
        }
    }
    map
}

pub fn def_site(defs: &HashMap<TempId, (BlockId, usize)>, value: &Value) -> DefSite {
    match value {
        Value::Constant(_) | Value::Undefined => DefSite::Everywhere,
        Value::BlockParam(id) => DefSite::Block(id.block),
        Value::Temp(id) => match defs.get(id) {
            Some((block, _)) => DefSite::Block(*block),
            None => DefSite::Unknown,
        },
    }
}

/// Blocks lying on some path strictly after `from` and leading into `to`.
/// `from` itself is excluded; `to` is included only when a cycle re-enters it.
pub fn blocks_between(cfg: &ControlFlowGraph, from: BlockId, to: BlockId) -> HashSet<BlockId> {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<BlockId> = cfg
        .predecessors(to)
        .iter()
        .copied()
        .filter(|&p| p != from)
        .collect();

    while let Some(block) = queue.pop_front() {
        if block == from || !visited.insert(block) {
            continue;
        }
        for &pred in cfg.predecessors(block) {
            if pred != from && !visited.contains(&pred) {
                queue.push_back(pred);
            }
        }
    }

    visited
}
