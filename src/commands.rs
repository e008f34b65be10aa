use crate::cloning::CloneReport;
use crate::engine::{CancelOutcome, DeleteOutcome, MoveDirection, TreeEngine};
use crate::error::Result;
use crate::registry::EntityRegistry;
use crate::schema::{AccountNode, AccountPayload, CompanyId, NodeId};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One tree operation as submitted by an API layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TreeCommand {
    /// Add a new, uncommitted line. It must be named with `rename` to commit.
    Insert {
        company_id: CompanyId,
        #[serde(default)]
        parent_id: Option<NodeId>,
        payload: AccountPayload,
    },

    /// Commit a name (and, for a new line, its payload).
    Rename { target: NodeId, new_name: String },

    BeginEdit { target: NodeId },

    EditName { target: NodeId, draft: String },

    /// Drop a new line, or discard the draft name of a committed one.
    CancelEdit { target: NodeId },

    ToggleActive { target: NodeId },

    Move {
        target: NodeId,
        direction: MoveDirection,
    },

    /// Delete a line with its subtree.
    Delete { target: NodeId },

    UpdatePayload {
        target: NodeId,
        payload: AccountPayload,
    },

    Reparent {
        target: NodeId,
        #[serde(default)]
        new_parent: Option<NodeId>,
    },

    SetVisibility {
        target: NodeId,
        company_id: CompanyId,
        enabled: bool,
    },

    #[serde(rename = "clone")]
    CloneCompany {
        source_company: CompanyId,
        target_company: CompanyId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Node(AccountNode),
    Moved(bool),
    Deleted(DeleteOutcome),
    Cancelled(CancelOutcome),
    Cloned(CloneReport),
}

impl TreeCommand {
    pub fn apply<R: EntityRegistry>(&self, engine: &mut TreeEngine<R>) -> Result<CommandOutcome> {
        let outcome = match self {
            TreeCommand::Insert {
                company_id,
                parent_id,
                payload,
            } => CommandOutcome::Node(engine.insert(company_id, *parent_id, payload.clone())?),
            TreeCommand::Rename { target, new_name } => {
                CommandOutcome::Node(engine.rename(*target, new_name)?)
            }
            TreeCommand::BeginEdit { target } => CommandOutcome::Node(engine.begin_edit(*target)?),
            TreeCommand::EditName { target, draft } => {
                CommandOutcome::Node(engine.edit_name(*target, draft)?)
            }
            TreeCommand::CancelEdit { target } => {
                CommandOutcome::Cancelled(engine.cancel_edit(*target)?)
            }
            TreeCommand::ToggleActive { target } => {
                CommandOutcome::Node(engine.toggle_active(*target)?)
            }
            TreeCommand::Move { target, direction } => {
                CommandOutcome::Moved(engine.move_node(*target, *direction)?)
            }
            TreeCommand::Delete { target } => CommandOutcome::Deleted(engine.delete(*target)?),
            TreeCommand::UpdatePayload { target, payload } => {
                CommandOutcome::Node(engine.update_payload(*target, payload.clone())?)
            }
            TreeCommand::Reparent { target, new_parent } => {
                CommandOutcome::Node(engine.reparent(*target, *new_parent)?)
            }
            TreeCommand::SetVisibility {
                target,
                company_id,
                enabled,
            } => {
                let node = engine.set_company_visibility(*target, company_id, *enabled)?;
                CommandOutcome::Node(node)
            }
            TreeCommand::CloneCompany {
                source_company,
                target_company,
            } => CommandOutcome::Cloned(engine.clone_company(source_company, target_company)?),
        };
        Ok(outcome)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Vec<TreeCommand>)
    }

    pub fn schema_as_json() -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::generate_json_schema())?)
    }
}

/// Applies commands in order and stops at the first failure.
///
/// Commands before the failing one stay applied; each command is itself
/// all-or-nothing.
pub fn apply_commands<R: EntityRegistry>(
    engine: &mut TreeEngine<R>,
    commands: &[TreeCommand],
) -> Result<Vec<CommandOutcome>> {
    let mut outcomes = Vec::with_capacity(commands.len());
    for (idx, command) in commands.iter().enumerate() {
        debug!("Applying command #{}: {:?}", idx, command);
        outcomes.push(command.apply(engine)?);
    }
    Ok(outcomes)
}
