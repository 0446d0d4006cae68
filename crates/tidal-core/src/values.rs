use crate::types::Type;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempId(pub u32);

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockParamId {
    pub block: crate::block::BlockId,
    pub index: u32,
}

impl std::fmt::Display for BlockParamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:p{}", self.block, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Temp(TempId),
    BlockParam(BlockParamId),
    Constant(Constant),
    Undefined,
}

impl Value {
    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Value::Temp(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Value::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_const_bool(&self, expected: bool) -> bool {
        matches!(self, Value::Constant(Constant::Bool(b)) if *b == expected)
    }

    pub fn true_() -> Self {
        Value::Constant(Constant::Bool(true))
    }

    pub fn uint(value: u64, bits: u16) -> Self {
        Value::Constant(Constant::uint(value, bits))
    }

    pub fn false_() -> Self {
        Value::Constant(Constant::Bool(false))
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Temp(id) => write!(f, "{}", id),
            Value::BlockParam(id) => write!(f, "{}", id),
            Value::Constant(c) => write!(f, "{}", c),
            Value::Undefined => write!(f, "undef"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    Bool(bool),
    Uint(BigUint, u16),
    Aggregate(Vec<Constant>),
}

impl Constant {
    pub fn uint(value: u64, bits: u16) -> Self {
        Constant::Uint(BigUint::from(value), bits)
    }

    pub fn zero(ty: &Type) -> Option<Self> {
        match ty {
            Type::Bool => Some(Constant::Bool(false)),
            Type::Uint(bits) => Some(Constant::Uint(BigUint::from(0u32), *bits)),
            Type::Struct(st) => {
                let fields = st
                    .fields
                    .iter()
                    .map(|f| Constant::zero(&f.ty))
                    .collect::<Option<Vec<_>>>()?;
                Some(Constant::Aggregate(fields))
            }
            Type::Time => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Constant::Bool(b) => Some(*b as u64),
            Constant::Uint(val, _) => val.to_u64(),
            Constant::Aggregate(_) => None,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Constant::Bool(_) => Type::Bool,
            Constant::Uint(_, bits) => Type::Uint(*bits),
            Constant::Aggregate(fields) => Type::Struct(crate::types::StructType::new(
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, c)| crate::types::StructField::new(format!("f{}", i), c.ty()))
                    .collect(),
            )),
        }
    }
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Uint(val, bits) => write!(f, "{}u{}", val, bits),
            Constant::Aggregate(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Latency of a drive. `time` is in femtoseconds; `delta` counts zero-time
/// scheduler steps after the time offset elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delay {
    pub time: u64,
    pub delta: u32,
}

impl Delay {
    pub fn delta() -> Self {
        Self { time: 0, delta: 1 }
    }

    pub fn time(femtos: u64) -> Self {
        Self {
            time: femtos,
            delta: 0,
        }
    }
}

impl std::fmt::Display for Delay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}fs+{}d", self.time, self.delta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
