use crate::error::{Result, StatementTreeError};
use crate::schema::{AccountNode, CompanyId, EntryType, NodeId, NodeKind};
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub id: NodeId,
    pub code: String,
    pub name: String,
    pub kind: NodeKind,
    pub entry_type: Option<EntryType>,
    pub depth: usize,
    pub is_active: bool,
}

impl AccountEntry {
    fn from_node(node: &AccountNode, depth: usize) -> Self {
        Self {
            id: node.id(),
            code: node.code.clone(),
            name: node.name.clone(),
            kind: node.kind(),
            entry_type: node.entry_type(),
            depth,
            is_active: node.is_active,
        }
    }
}

/// A company's committed statement lines flattened in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartOfAccounts {
    pub company_id: CompanyId,
    pub accounts: Vec<AccountEntry>,
}

impl ChartOfAccounts {
    pub fn from_store(store: &NodeStore, company_id: &str) -> Result<Self> {
        let mut accounts = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(&AccountNode, usize)> = store
            .roots(company_id)
            .into_iter()
            .rev()
            .map(|n| (n, 0))
            .collect();

        while let Some((node, depth)) = stack.pop() {
            if !visited.insert(node.id()) {
                return Err(StatementTreeError::CyclicStructure(node.id()));
            }
            if !node.is_committed() {
                continue;
            }
            accounts.push(AccountEntry::from_node(node, depth));
            for child in store.children(company_id, Some(node.id())).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        Ok(Self {
            company_id: company_id.to_string(),
            accounts,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Code,Name,Kind,Entry Type,Depth,Active\n");

        for account in &self.accounts {
            let entry_type = account
                .entry_type
                .map(|t| format!("{:?}", t))
                .unwrap_or_default();
            output.push_str(&format!(
                "{},{},{:?},{},{},{}\n",
                account.code,
                csv_field(&account.name),
                account.kind,
                entry_type,
                account.depth,
                account.is_active
            ));
        }

        output
    }

    pub fn total_accounts(&self) -> usize {
        self.accounts.len()
    }

    pub fn get_by_code(&self, code: &str) -> Option<&AccountEntry> {
        self.accounts.iter().find(|a| a.code == code)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
