use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Uint(u16),
    Time,
    Struct(StructType),
}

impl Type {
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Bool => Some(1),
            Type::Uint(bits) => Some(*bits as u32),
            Type::Time => None,
            Type::Struct(st) => {
                let mut total = 0;
                for field in &st.fields {
                    total += field.ty.bit_width()?;
                }
                Some(total)
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    pub fn field_count(&self) -> usize {
        match self {
            Type::Struct(st) => st.fields.len(),
            _ => 0,
        }
    }

    pub fn field_type(&self, index: usize) -> Option<&Type> {
        match self {
            Type::Struct(st) => st.fields.get(index).map(|f| &f.ty),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Uint(bits) => write!(f, "u{}", bits),
            Type::Time => write!(f, "time"),
            Type::Struct(st) => {
                write!(f, "{{")?;
                for (i, field) in st.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: Vec<StructField>) -> Self {
        Self { fields }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

impl StructField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}
