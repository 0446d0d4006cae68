use crate::block::{BlockId, BlockParam, Terminator};
use crate::instructions::{DriveField, Instruction};
use crate::module::Module;
use crate::process::{Process, ProcessId};
use crate::signal::SignalId;
use crate::types::Type;
use crate::values::{BlockParamId, Delay, Value};
use crate::{IrError, Result};

pub struct ProcessBuilder<'a> {
    module: &'a mut Module,
    process: Process,
    current_block: BlockId,
}

impl<'a> ProcessBuilder<'a> {
    pub(crate) fn new(module: &'a mut Module, process: Process) -> Self {
        let current_block = process.entry_block();
        Self {
            module,
            process,
            current_block,
        }
    }

    pub fn entry_block_id(&self) -> BlockId {
        self.process.entry_block()
    }

    pub fn create_block_id(&mut self) -> BlockId {
        self.process.body.create_block()
    }

    pub fn switch_to_block(&mut self, block_id: BlockId) -> Result<()> {
        if self.process.body.block(block_id).is_none() {
            return Err(IrError::BuilderError(format!(
                "{} does not exist in process {}",
                block_id, self.process.name
            )));
        }
        self.current_block = block_id;
        Ok(())
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn block_param(&mut self, block: BlockId, name: &str, ty: Type) -> Result<Value> {
        let bb = self.process.body.block_mut(block).ok_or_else(|| {
            IrError::BuilderError(format!("{} does not exist in process", block))
        })?;
        let index = bb.add_param(BlockParam::new(name, ty));
        Ok(Value::BlockParam(BlockParamId { block, index }))
    }

    fn push(&mut self, inst: Instruction) {
        let block = self.current_block;
        if let Some(b) = self.process.body.block_mut(block) {
            b.add_instruction(inst);
        }
    }

    fn push_with_result(&mut self, make: impl FnOnce(Value) -> Instruction) -> Value {
        let result = Value::Temp(self.module.new_temp());
        self.push(make(result.clone()));
        result
    }

    pub fn probe(&mut self, signal: SignalId) -> Value {
        self.push_with_result(|result| Instruction::Probe { result, signal })
    }

    pub fn drive(&mut self, signal: SignalId, value: Value, delay: Delay, enable: Option<Value>) {
        self.push(Instruction::Drive {
            signal,
            field: None,
            value,
            delay,
            enable,
        });
    }

    pub fn drive_field(
        &mut self,
        signal: SignalId,
        index: usize,
        value: Value,
        delay: Delay,
        enable: Option<Value>,
    ) {
        self.push(Instruction::Drive {
            signal,
            field: Some(DriveField::Index(index)),
            value,
            delay,
            enable,
        });
    }

    pub fn and_(&mut self, left: Value, right: Value) -> Value {
        self.push_with_result(|result| Instruction::And {
            result,
            left,
            right,
        })
    }

    pub fn or_(&mut self, left: Value, right: Value) -> Value {
        self.push_with_result(|result| Instruction::Or {
            result,
            left,
            right,
        })
    }

    pub fn xor_(&mut self, left: Value, right: Value) -> Value {
        self.push_with_result(|result| Instruction::Xor {
            result,
            left,
            right,
        })
    }

    pub fn not_(&mut self, operand: Value) -> Value {
        self.push_with_result(|result| Instruction::Not { result, operand })
    }

    pub fn eq_(&mut self, left: Value, right: Value) -> Value {
        self.push_with_result(|result| Instruction::Eq {
            result,
            left,
            right,
        })
    }

    pub fn ne_(&mut self, left: Value, right: Value) -> Value {
        self.push_with_result(|result| Instruction::Ne {
            result,
            left,
            right,
        })
    }

    pub fn add(&mut self, left: Value, right: Value, ty: Type) -> Value {
        self.push_with_result(|result| Instruction::Add {
            result,
            left,
            right,
            ty,
        })
    }

    pub fn sub(&mut self, left: Value, right: Value, ty: Type) -> Value {
        self.push_with_result(|result| Instruction::Sub {
            result,
            left,
            right,
            ty,
        })
    }

    pub fn mux(&mut self, condition: Value, then_val: Value, else_val: Value) -> Value {
        self.push_with_result(|result| Instruction::Mux {
            result,
            condition,
            then_val,
            else_val,
        })
    }

    pub fn struct_create(&mut self, fields: Vec<Value>, ty: Type) -> Value {
        self.push_with_result(|result| Instruction::StructCreate { result, fields, ty })
    }

    pub fn extract_field(&mut self, aggregate: Value, index: usize) -> Value {
        self.push_with_result(|result| Instruction::ExtractField {
            result,
            aggregate,
            index,
        })
    }

    fn terminate(&mut self, term: Terminator) {
        let block = self.current_block;
        if let Some(b) = self.process.body.block_mut(block) {
            b.set_terminator(term);
        }
    }

    pub fn jump(&mut self, dest: BlockId) {
        self.terminate(Terminator::Jump(dest, vec![]));
    }

    pub fn jump_with_args(&mut self, dest: BlockId, args: Vec<Value>) {
        self.terminate(Terminator::Jump(dest, args));
    }

    pub fn branch(&mut self, condition: Value, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            condition,
            then_block,
            then_args: vec![],
            else_block,
            else_args: vec![],
        });
    }

    pub fn wait(&mut self, dest: BlockId, dest_args: Vec<Value>, sensitivity: Vec<SignalId>) {
        self.terminate(Terminator::Wait {
            dest,
            dest_args,
            sensitivity,
        });
    }

    pub fn halt(&mut self) {
        self.terminate(Terminator::Halt);
    }

    pub fn build(self) -> Result<ProcessId> {
        for (block_id, block) in &self.process.body.blocks {
            if !block.is_terminated() {
                return Err(IrError::BuilderError(format!(
                    "{} in process {} has no terminator",
                    block_id, self.process.name
                )));
            }
        }
        Ok(self.module.add_process(self.process))
    }
}
