use crate::instructions::Instruction;
use crate::process::{Process, ProcessBody, ProcessId};
use crate::signal::{Signal, SignalId, SignalKind};
use crate::types::Type;
use crate::values::{TempId, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A hardware module: signals at module scope, behavioral processes, and the
/// structural body (combinational value graph plus registers) that
/// desequentialization lowers processes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub signals: IndexMap<SignalId, Signal>,
    pub processes: IndexMap<ProcessId, Process>,
    pub body: StructuralBody,
    next_signal_id: u32,
    next_process_id: u32,
    next_temp_id: u32,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: IndexMap::new(),
            processes: IndexMap::new(),
            body: StructuralBody::default(),
            next_signal_id: 0,
            next_process_id: 0,
            next_temp_id: 0,
        }
    }

    pub fn add_signal(&mut self, name: impl Into<String>, ty: Type, kind: SignalKind) -> SignalId {
        let id = SignalId(self.next_signal_id);
        self.next_signal_id += 1;
        self.signals.insert(id, Signal::new(id, name, ty, kind));
        id
    }

    pub fn signal(&self, id: SignalId) -> Option<&Signal> {
        self.signals.get(&id)
    }

    /// Temporaries are numbered module-wide so that process instructions can
    /// migrate into the structural body without renaming.
    pub fn new_temp(&mut self) -> TempId {
        let id = TempId(self.next_temp_id);
        self.next_temp_id += 1;
        id
    }

    pub fn new_process(&mut self, name: impl Into<String>) -> Process {
        let id = ProcessId(self.next_process_id);
        self.next_process_id += 1;
        Process::new(id, name)
    }

    pub fn add_process(&mut self, process: Process) -> ProcessId {
        let id = process.id;
        self.processes.insert(id, process);
        id
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(&id)
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&id)
    }

    pub fn remove_process(&mut self, id: ProcessId) -> Option<Process> {
        self.processes.shift_remove(&id)
    }
}

/// Structural operations at module scope: a combinational value graph (probes
/// read signals continuously) and clocked registers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralBody {
    pub combinational: Vec<Instruction>,
    pub registers: Vec<Register>,
}

/// One clocked storage element: on the given edge of `clock`, when `enable`
/// holds (or unconditionally), the signal takes `data`; a synchronous reset
/// overrides `data` with the reset value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    pub signal: SignalId,
    pub clock: SignalId,
    pub edge: ClockEdge,
    pub data: Value,
    pub enable: Option<Value>,
    pub reset: Option<RegisterReset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockEdge {
    Rising,
    Falling,
}

impl std::fmt::Display for ClockEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockEdge::Rising => write!(f, "rising"),
            ClockEdge::Falling => write!(f, "falling"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterReset {
    pub signal: SignalId,
    pub active_high: bool,
    pub value: Value,
}

/// Infer the type of a value inside a process body. Resolves temporaries
/// through their defining instruction and block parameters through their
/// block's parameter list.
pub fn value_type(module: &Module, body: &ProcessBody, value: &Value) -> Option<Type> {
    match value {
        Value::Constant(c) => Some(c.ty()),
        Value::Undefined => None,
        Value::BlockParam(id) => body
            .block(id.block)
            .and_then(|b| b.params.get(id.index as usize))
            .map(|p| p.param_type.clone()),
        Value::Temp(id) => {
            let inst = body
                .blocks
                .values()
                .flat_map(|b| b.instructions.iter())
                .find(|inst| inst.result().and_then(|r| r.as_temp()) == Some(*id))?;
            instruction_type(module, body, inst)
        }
    }
}

fn instruction_type(module: &Module, body: &ProcessBody, inst: &Instruction) -> Option<Type> {
    match inst {
        Instruction::And { .. }
        | Instruction::Or { .. }
        | Instruction::Xor { .. }
        | Instruction::Not { .. }
        | Instruction::Eq { .. }
        | Instruction::Ne { .. } => Some(Type::Bool),
        Instruction::Add { ty, .. } | Instruction::Sub { ty, .. } => Some(ty.clone()),
        Instruction::Mux { then_val, .. } => value_type(module, body, then_val),
        Instruction::StructCreate { ty, .. } => Some(ty.clone()),
        Instruction::ExtractField {
            aggregate, index, ..
        } => value_type(module, body, aggregate).and_then(|ty| ty.field_type(*index).cloned()),
        Instruction::Probe { signal, .. } => module.signal(*signal).map(|s| s.ty.clone()),
        Instruction::Drive { .. } => None,
    }
}
