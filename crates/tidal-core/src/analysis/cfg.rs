use crate::block::BlockId;
use crate::process::ProcessBody;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub edges: HashMap<BlockId, Vec<BlockId>>,
    pub reverse_edges: HashMap<BlockId, Vec<BlockId>>,
    pub entry: BlockId,
}

impl ControlFlowGraph {
    pub fn build(body: &ProcessBody) -> Self {
        let mut edges = HashMap::new();
        let mut reverse_edges: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        for (block_id, block) in &body.blocks {
            let successors = block.successors();
            edges.insert(*block_id, successors.clone());

            for succ in successors {
                reverse_edges.entry(succ).or_default().push(*block_id);
            }
        }

        Self {
            edges,
            reverse_edges,
            entry: body.entry_block,
        }
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.reverse_edges
            .get(&block)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.edges.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        self.dfs_postorder(self.entry, &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    fn dfs_postorder(
        &self,
        block: BlockId,
        visited: &mut HashSet<BlockId>,
        postorder: &mut Vec<BlockId>,
    ) {
        if !visited.insert(block) {
            return;
        }

        for &succ in self.successors(block) {
            self.dfs_postorder(succ, visited, postorder);
        }

        postorder.push(block);
    }

    pub fn reachable_blocks(&self) -> HashSet<BlockId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(self.entry);

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                for &succ in self.successors(current) {
                    queue.push_back(succ);
                }
            }
        }

        visited
    }
}
