use crate::signal::SignalId;
use crate::types::Type;
use crate::values::{Delay, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    And {
        result: Value,
        left: Value,
        right: Value,
    },
    Or {
        result: Value,
        left: Value,
        right: Value,
    },
    Xor {
        result: Value,
        left: Value,
        right: Value,
    },
    Not {
        result: Value,
        operand: Value,
    },

    Eq {
        result: Value,
        left: Value,
        right: Value,
    },
    Ne {
        result: Value,
        left: Value,
        right: Value,
    },

    Add {
        result: Value,
        left: Value,
        right: Value,
        ty: Type,
    },
    Sub {
        result: Value,
        left: Value,
        right: Value,
        ty: Type,
    },

    Mux {
        result: Value,
        condition: Value,
        then_val: Value,
        else_val: Value,
    },

    StructCreate {
        result: Value,
        fields: Vec<Value>,
        ty: Type,
    },
    ExtractField {
        result: Value,
        aggregate: Value,
        index: usize,
    },

    /// Read the current value of a signal. Relocatable, but never across a
    /// temporal region boundary and never past another same-signal effect.
    Probe {
        result: Value,
        signal: SignalId,
    },

    /// Timed write to a signal. A disabled drive leaves the signal unchanged.
    Drive {
        signal: SignalId,
        field: Option<DriveField>,
        value: Value,
        delay: Delay,
        enable: Option<Value>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveField {
    Index(usize),
    Dynamic(Value),
}

impl Instruction {
    pub fn result(&self) -> Option<&Value> {
        match self {
            Instruction::And { result, .. }
            | Instruction::Or { result, .. }
            | Instruction::Xor { result, .. }
            | Instruction::Not { result, .. }
            | Instruction::Eq { result, .. }
            | Instruction::Ne { result, .. }
            | Instruction::Add { result, .. }
            | Instruction::Sub { result, .. }
            | Instruction::Mux { result, .. }
            | Instruction::StructCreate { result, .. }
            | Instruction::ExtractField { result, .. }
            | Instruction::Probe { result, .. } => Some(result),
            Instruction::Drive { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Instruction::And { left, right, .. }
            | Instruction::Or { left, right, .. }
            | Instruction::Xor { left, right, .. }
            | Instruction::Eq { left, right, .. }
            | Instruction::Ne { left, right, .. }
            | Instruction::Add { left, right, .. }
            | Instruction::Sub { left, right, .. } => vec![left, right],
            Instruction::Not { operand, .. } => vec![operand],
            Instruction::Mux {
                condition,
                then_val,
                else_val,
                ..
            } => vec![condition, then_val, else_val],
            Instruction::StructCreate { fields, .. } => fields.iter().collect(),
            Instruction::ExtractField { aggregate, .. } => vec![aggregate],
            Instruction::Probe { .. } => vec![],
            Instruction::Drive {
                field,
                value,
                enable,
                ..
            } => {
                let mut ops = vec![value];
                if let Some(DriveField::Dynamic(index)) = field {
                    ops.push(index);
                }
                if let Some(en) = enable {
                    ops.push(en);
                }
                ops
            }
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Instruction::And { left, right, .. }
            | Instruction::Or { left, right, .. }
            | Instruction::Xor { left, right, .. }
            | Instruction::Eq { left, right, .. }
            | Instruction::Ne { left, right, .. }
            | Instruction::Add { left, right, .. }
            | Instruction::Sub { left, right, .. } => vec![left, right],
            Instruction::Not { operand, .. } => vec![operand],
            Instruction::Mux {
                condition,
                then_val,
                else_val,
                ..
            } => vec![condition, then_val, else_val],
            Instruction::StructCreate { fields, .. } => fields.iter_mut().collect(),
            Instruction::ExtractField { aggregate, .. } => vec![aggregate],
            Instruction::Probe { .. } => vec![],
            Instruction::Drive {
                field,
                value,
                enable,
                ..
            } => {
                let mut ops = vec![value];
                if let Some(DriveField::Dynamic(index)) = field {
                    ops.push(index);
                }
                if let Some(en) = enable {
                    ops.push(en);
                }
                ops
            }
        }
    }

    /// Side-effect free and freely relocatable.
    pub fn is_pure(&self) -> bool {
        !matches!(self, Instruction::Probe { .. } | Instruction::Drive { .. })
    }

    pub fn is_probe(&self) -> bool {
        matches!(self, Instruction::Probe { .. })
    }

    pub fn is_drive(&self) -> bool {
        matches!(self, Instruction::Drive { .. })
    }

    /// Probe or drive of the given signal. Ordering among these must be
    /// preserved within a temporal region.
    pub fn touches_signal(&self, sig: SignalId) -> bool {
        match self {
            Instruction::Probe { signal, .. } | Instruction::Drive { signal, .. } => *signal == sig,
            _ => false,
        }
    }
}
