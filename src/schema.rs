use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type NodeId = Uuid;
pub type CompanyId = String;
pub type CategoryId = String;
pub type IndicatorId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum NodeKind {
    #[schemars(description = "Line aggregating one or more registry categories of the same revenue/expense type")]
    Category,

    #[schemars(description = "Line bound to exactly one registry indicator")]
    Indicator,

    #[schemars(description = "Totalizer summing other Category or Indicator lines of the same company")]
    Total,

    #[schemars(description = "Manually entered line with an explicit sign")]
    Flex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum EntryType {
    Revenue,
    Expense,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Sign {
    Positive,
    Negative,
}

/// Kind-specific payload of an account line.
///
/// The tag doubles as the node's kind, so a `Total` can never carry an
/// indicator id and switching kind means deleting and recreating the node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind")]
pub enum AccountPayload {
    Category {
        #[serde(rename = "categoryIds")]
        #[schemars(description = "Registry category ids, in selection order. All must share one revenue/expense type.")]
        category_ids: Vec<CategoryId>,

        #[serde(rename = "entryType", default, skip_serializing_if = "Option::is_none")]
        #[schemars(description = "Revenue/expense type inherited from the first selected category. Filled in on validation.")]
        entry_type: Option<EntryType>,
    },

    Indicator {
        #[serde(rename = "indicatorId")]
        #[schemars(description = "The registry indicator this line reports")]
        indicator_id: IndicatorId,
    },

    Total {
        #[serde(rename = "selectedAccountIds")]
        #[schemars(description = "Ids of the Category/Indicator accounts of the same company summed by this totalizer")]
        selected_account_ids: BTreeSet<NodeId>,
    },

    Flex {
        #[schemars(description = "Whether the manually supplied value adds to or subtracts from the statement")]
        sign: Sign,
    },
}

impl AccountPayload {
    pub fn category<I, S>(category_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CategoryId>,
    {
        Self::Category {
            category_ids: category_ids.into_iter().map(Into::into).collect(),
            entry_type: None,
        }
    }

    pub fn indicator(indicator_id: impl Into<IndicatorId>) -> Self {
        Self::Indicator {
            indicator_id: indicator_id.into(),
        }
    }

    pub fn total<I>(selected_account_ids: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        Self::Total {
            selected_account_ids: selected_account_ids.into_iter().collect(),
        }
    }

    pub fn flex(sign: Sign) -> Self {
        Self::Flex { sign }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Category { .. } => NodeKind::Category,
            Self::Indicator { .. } => NodeKind::Indicator,
            Self::Total { .. } => NodeKind::Total,
            Self::Flex { .. } => NodeKind::Flex,
        }
    }
}

/// Edit lifecycle of a node. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    /// Inserted but never committed; cancelling removes it.
    New,
    #[default]
    Committed,
    /// Committed node with an open name editor.
    Editing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountNode {
    pub(crate) id: NodeId,

    pub(crate) company_id: CompanyId,

    #[schemars(description = "Display code derived at creation time (e.g. 'R01', 'R01.02'). Not an identifier.")]
    pub code: String,

    pub name: String,

    #[schemars(description = "Parent account in the same company; null for root lines")]
    pub parent_id: Option<NodeId>,

    #[schemars(description = "Position among siblings, unique per (companyId, parentId)")]
    pub display_order: i32,

    pub is_active: bool,

    #[serde(flatten)]
    pub payload: AccountPayload,

    #[serde(default)]
    #[schemars(description = "Companies for which this line is enabled, independent of ownership")]
    pub company_visibility: BTreeSet<CompanyId>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    pub(crate) status: NodeStatus,

    #[serde(skip)]
    pub(crate) draft_name: Option<String>,
}

impl AccountNode {
    pub(crate) fn new_uncommitted(
        company_id: CompanyId,
        parent_id: Option<NodeId>,
        code: String,
        display_order: i32,
        payload: AccountPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            code,
            name: String::new(),
            parent_id,
            display_order,
            is_active: true,
            payload,
            company_visibility: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            status: NodeStatus::New,
            draft_name: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_committed(&self) -> bool {
        self.status != NodeStatus::New
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The name an editor should show: the open draft, else the committed name.
    pub fn display_name(&self) -> &str {
        self.draft_name.as_deref().unwrap_or(&self.name)
    }

    pub fn selected_account_ids(&self) -> Option<&BTreeSet<NodeId>> {
        match &self.payload {
            AccountPayload::Total {
                selected_account_ids,
            } => Some(selected_account_ids),
            _ => None,
        }
    }

    pub fn entry_type(&self) -> Option<EntryType> {
        match &self.payload {
            AccountPayload::Category { entry_type, .. } => *entry_type,
            _ => None,
        }
    }

    pub fn is_visible_for(&self, company_id: &str) -> bool {
        self.company_visibility.contains(company_id)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AccountNode)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
