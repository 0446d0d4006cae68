use crate::types::Type;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u32);

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sig{}", self.0)
    }
}

/// A storage location with an observable value history. Signals are owned by
/// the module; processes read them through probes and write them through
/// drives only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub name: String,
    pub ty: Type,
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(id: SignalId, name: impl Into<String>, ty: Type, kind: SignalKind) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Input,
    Output,
    Internal,
}
