//! Edges between rule tree nodes.

use std::fmt;

use arbor_expression::Shard;
use arbor_schema::FieldId;

/// Discriminates a node from its siblings.
///
/// Field edges use the schema's stable field ids, so two paths reaching the
/// same field through differently built expressions share one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Edge {
    /// Object field.
    Field(FieldId),
    /// Array element at a constant index.
    Index(usize),
    /// Every element of an array.
    Each,
}

impl Edge {
    /// Edge a shard descends through; `None` for filters, which constrain
    /// the array without leaving it.
    pub fn of(shard: &Shard) -> Option<Self> {
        match shard {
            Shard::Member(field) => Some(Self::Field(field.id())),
            Shard::Index(index) => Some(Self::Index(*index)),
            Shard::Each | Shard::Current | Shard::Iter(_) => Some(Self::Each),
            Shard::Where(_) => None,
        }
    }

    /// Whether the edge leads into array elements.
    pub fn is_element(self) -> bool {
        matches!(self, Self::Index(_) | Self::Each)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(id) => write!(f, "field {}", id.raw()),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Each => f.write_str("Each()"),
        }
    }
}
