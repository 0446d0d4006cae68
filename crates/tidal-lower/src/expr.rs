use tidal_core::{Instruction, Module, Value};

/// Accumulates boolean glue instructions without committing them, folding
/// constants so trivial conditions never materialize. The caller decides
/// where the pending instructions land (a region exit block, the module's
/// combinational body) and commits them in one step.
pub struct ExprBuilder<'m> {
    module: &'m mut Module,
    pending: Vec<Instruction>,
}

impl<'m> ExprBuilder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            pending: Vec::new(),
        }
    }

    pub fn take_pending(&mut self) -> Vec<Instruction> {
        std::mem::take(&mut self.pending)
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn push(&mut self, inst: Instruction) {
        self.pending.push(inst);
    }

    pub fn temp(&mut self) -> Value {
        Value::Temp(self.module.new_temp())
    }

    pub fn and(&mut self, left: Value, right: Value) -> Value {
        if left.is_const_bool(true) {
            return right;
        }
        if right.is_const_bool(true) {
            return left;
        }
        if left.is_const_bool(false) || right.is_const_bool(false) {
            return Value::false_();
        }
        let result = self.temp();
        self.pending.push(Instruction::And {
            result: result.clone(),
            left,
            right,
        });
        result
    }

    pub fn or(&mut self, left: Value, right: Value) -> Value {
        if left.is_const_bool(false) {
            return right;
        }
        if right.is_const_bool(false) {
            return left;
        }
        if left.is_const_bool(true) || right.is_const_bool(true) {
            return Value::true_();
        }
        let result = self.temp();
        self.pending.push(Instruction::Or {
            result: result.clone(),
            left,
            right,
        });
        result
    }

    pub fn not(&mut self, operand: Value) -> Value {
        if operand.is_const_bool(true) {
            return Value::false_();
        }
        if operand.is_const_bool(false) {
            return Value::true_();
        }
        let result = self.temp();
        self.pending.push(Instruction::Not {
            result: result.clone(),
            operand,
        });
        result
    }

    pub fn mux(&mut self, condition: Value, then_val: Value, else_val: Value) -> Value {
        if condition.is_const_bool(true) {
            return then_val;
        }
        if condition.is_const_bool(false) {
            return else_val;
        }
        let result = self.temp();
        self.pending.push(Instruction::Mux {
            result: result.clone(),
            condition,
            then_val,
            else_val,
        });
        result
    }
}
