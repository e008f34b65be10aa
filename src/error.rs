use crate::schema::{NodeId, NodeKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatementTreeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Depth {depth} exceeds the company limit of {max_levels} category levels")]
    DepthExceeded { depth: usize, max_levels: u8 },

    #[error("Account {0} cannot be committed with a blank name")]
    EmptyName(NodeId),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Account {node} belongs to company '{node_company}' but was linked from company '{other_company}'")]
    CrossTenantReference {
        node: NodeId,
        node_company: String,
        other_company: String,
    },

    #[error("Cannot clone company '{0}' onto itself")]
    SelfClone(String),

    #[error("Cyclic structure detected at account {0}")]
    CyclicStructure(NodeId),

    #[error("Account {node} is a {found:?} account; payload of kind {expected:?} is not allowed")]
    KindMismatch {
        node: NodeId,
        expected: NodeKind,
        found: NodeKind,
    },

    #[error("Account {0} has not been committed yet")]
    Uncommitted(NodeId),

    #[error("Invalid category levels {0}: must be 3, 4 or 5")]
    InvalidCategoryLevels(u8),

    #[error("No display order left after account {0}")]
    DisplayOrderOverflow(NodeId),

    #[error("Duplicate account id {0}")]
    DuplicateId(NodeId),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StatementTreeError>;
