use crate::block::{BasicBlock, BlockId};
use crate::values::SourceLocation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc{}", self.0)
    }
}

/// A unit of behavioral logic: a control-flow graph of basic blocks that
/// suspends at wait points and ends at halts. Created by the frontend and
/// either converted away by desequentialization or passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub body: ProcessBody,
    pub loc: Option<SourceLocation>,
}

impl Process {
    pub fn new(id: ProcessId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            body: ProcessBody::new(),
            loc: None,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.body.entry_block
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessBody {
    pub entry_block: BlockId,
    pub blocks: IndexMap<BlockId, BasicBlock>,
    next_block_id: u32,
}

impl ProcessBody {
    pub fn new() -> Self {
        let entry_block = BlockId(0);
        let mut blocks = IndexMap::new();
        blocks.insert(entry_block, BasicBlock::new(entry_block));

        Self {
            entry_block,
            blocks,
            next_block_id: 1,
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&id)
    }

    pub fn is_terminated(&self) -> bool {
        self.blocks.values().all(|b| b.is_terminated())
    }
}

impl Default for ProcessBody {
    fn default() -> Self {
        Self::new()
    }
}
