use crate::analysis::cfg::ControlFlowGraph;
use crate::block::BlockId;
use crate::process::ProcessBody;
use std::collections::{HashMap, HashSet};

/// Dominator tree over a process body. Recomputed from scratch after every
/// structural mutation; never updated incrementally.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl DominatorTree {
    pub fn build(body: &ProcessBody) -> Self {
        let cfg = ControlFlowGraph::build(body);
        Self::from_cfg(&cfg)
    }

    pub fn from_cfg(cfg: &ControlFlowGraph) -> Self {
        let entry = cfg.entry;
        let mut idom = HashMap::new();
        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        let blocks = cfg.reverse_postorder();

        if blocks.len() <= 1 {
            return Self { idom, children };
        }

        let mut doms: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();

        doms.insert(entry, HashSet::from([entry]));

        for &block in &blocks[1..] {
            doms.insert(block, blocks.iter().copied().collect());
        }

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &blocks[1..] {
                let preds = cfg.predecessors(block);

                if preds.is_empty() {
                    continue;
                }

                let mut new_dom: Option<HashSet<BlockId>> = None;
                for pred in preds {
                    if let Some(pred_dom) = doms.get(pred) {
                        if let Some(acc) = new_dom {
                            new_dom = Some(acc.intersection(pred_dom).copied().collect());
                        } else {
                            new_dom = Some(pred_dom.clone());
                        }
                    }
                }

                if let Some(mut new_dom_set) = new_dom {
                    new_dom_set.insert(block);

                    if doms[&block] != new_dom_set {
                        doms.insert(block, new_dom_set);
                        changed = true;
                    }
                }
            }
        }

        for &block in &blocks {
            if block == entry {
                continue;
            }

            let dominators = &doms[&block];

            for &candidate in dominators {
                if candidate == block {
                    continue;
                }

                let mut is_immediate = true;
                for &other in dominators {
                    if other == block || other == candidate {
                        continue;
                    }

                    if doms
                        .get(&candidate)
                        .map_or(false, |c_doms| c_doms.contains(&other))
                    {
                        is_immediate = false;
                        break;
                    }
                }

                if is_immediate {
                    idom.insert(block, candidate);
                    children.entry(candidate).or_default().push(block);
                    break;
                }
            }
        }

        Self { idom, children }
    }

    pub fn dominates(&self, dominator: BlockId, dominated: BlockId) -> bool {
        if dominator == dominated {
            return true;
        }

        let mut current = dominated;
        while let Some(&idom) = self.idom.get(&current) {
            if idom == dominator {
                return true;
            }
            if idom == current {
                break;
            }
            current = idom;
        }

        false
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
