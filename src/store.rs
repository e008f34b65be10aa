use crate::error::{Result, StatementTreeError};
use crate::schema::{AccountNode, CompanyId, NodeId};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;

type SiblingKey = (CompanyId, Option<NodeId>);

/// Flat table of account nodes keyed by id, with a derived
/// `(company, parent)` index for sibling lookups.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, AccountNode>,
    siblings: BTreeMap<SiblingKey, BTreeSet<NodeId>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: Vec<AccountNode>) -> Result<Self> {
        let mut store = Self::new();
        store.insert_batch(nodes)?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&AccountNode> {
        self.nodes.get(&id)
    }

    /// Children of `parent_id` (roots when `None`) ordered by display order,
    /// ties broken by the id's string form.
    pub fn children(&self, company_id: &str, parent_id: Option<NodeId>) -> Vec<&AccountNode> {
        let key = (company_id.to_string(), parent_id);
        let mut children: Vec<&AccountNode> = self
            .siblings
            .get(&key)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default();
        sort_by_display_order(&mut children);
        children
    }

    pub fn roots(&self, company_id: &str) -> Vec<&AccountNode> {
        self.children(company_id, None)
    }

    pub fn company_nodes(&self, company_id: &str) -> Vec<&AccountNode> {
        let mut nodes: Vec<&AccountNode> = self
            .nodes
            .values()
            .filter(|n| n.company_id == company_id)
            .collect();
        sort_by_display_order(&mut nodes);
        nodes
    }

    pub fn company_ids(&self) -> BTreeSet<CompanyId> {
        self.siblings.keys().map(|(company, _)| company.clone()).collect()
    }

    /// Inserts or replaces a node. A node can never move to another company.
    pub fn upsert(&mut self, node: AccountNode) -> Result<()> {
        if let Some(existing) = self.nodes.get(&node.id) {
            if existing.company_id != node.company_id {
                return Err(StatementTreeError::CrossTenantReference {
                    node: node.id,
                    node_company: existing.company_id.clone(),
                    other_company: node.company_id.clone(),
                });
            }
            let old_key = (existing.company_id.clone(), existing.parent_id);
            self.unindex(&old_key, node.id);
        }

        self.siblings
            .entry((node.company_id.clone(), node.parent_id))
            .or_default()
            .insert(node.id);
        self.nodes.insert(node.id, node);
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Option<AccountNode> {
        let node = self.nodes.remove(&id)?;
        let key = (node.company_id.clone(), node.parent_id);
        self.unindex(&key, id);
        Some(node)
    }

    /// All-or-nothing insert of fresh nodes.
    ///
    /// Every id must be new to the store and unique within the batch; on any
    /// failure the nodes already written by this call are removed again.
    pub fn insert_batch(&mut self, nodes: Vec<AccountNode>) -> Result<()> {
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if self.nodes.contains_key(&node.id) || !seen.insert(node.id) {
                return Err(StatementTreeError::DuplicateId(node.id));
            }
        }

        let total = nodes.len();
        let mut written = Vec::with_capacity(total);
        for node in nodes {
            let id = node.id;
            if let Err(e) = self.upsert(node) {
                debug!("Batch write failed at {}, rolling back {} nodes", id, written.len());
                for done in written {
                    self.remove(done);
                }
                return Err(e);
            }
            written.push(id);
        }

        debug!("Batch wrote {} nodes", total);
        Ok(())
    }

    /// Committed nodes as a flat list, ordered by company then position.
    pub fn committed_nodes(&self) -> Vec<&AccountNode> {
        let mut nodes: Vec<&AccountNode> =
            self.nodes.values().filter(|n| n.is_committed()).collect();
        nodes.sort_by(|a, b| {
            a.company_id
                .cmp(&b.company_id)
                .then_with(|| a.parent_id.cmp(&b.parent_id))
                .then_with(|| a.display_order.cmp(&b.display_order))
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        nodes
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let nodes: Vec<AccountNode> = serde_json::from_str(json)?;
        Self::from_nodes(nodes)
    }

    /// Serializes committed nodes only; transient edits never reach storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.committed_nodes())?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let store = Self::from_json(&json)?;
        info!(
            "Loaded {} accounts from {}",
            store.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        info!("Saved accounts to {}", path.as_ref().display());
        Ok(())
    }

    fn unindex(&mut self, key: &SiblingKey, id: NodeId) {
        if let Some(ids) = self.siblings.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.siblings.remove(key);
            }
        }
    }
}

pub(crate) fn sort_by_display_order(nodes: &mut [&AccountNode]) {
    nodes.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
    });
}
