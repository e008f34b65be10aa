use crate::error::{Result, StatementTreeError};
use crate::registry::EntityRegistry;
use crate::schema::{AccountNode, AccountPayload, CompanyId, NodeId, NodeStatus};
use crate::store::NodeStore;
use chrono::Utc;
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneReport {
    pub source_company: CompanyId,
    pub target_company: CompanyId,
    /// Source id to freshly allocated target id, for every cloned node.
    pub id_map: BTreeMap<NodeId, NodeId>,
    /// Uncommitted source nodes left behind.
    pub skipped_uncommitted: usize,
    /// Totalizer sources that had no cloned counterpart and were pruned.
    pub dropped_references: usize,
}

/// The target forest, fully built in memory and not yet written.
#[derive(Debug, Clone)]
pub struct ClonePlan {
    nodes: Vec<AccountNode>,
    report: CloneReport,
}

impl ClonePlan {
    pub fn nodes(&self) -> &[AccountNode] {
        &self.nodes
    }

    pub fn report(&self) -> CloneReport {
        self.report.clone()
    }

    pub fn into_nodes(self) -> Vec<AccountNode> {
        self.nodes
    }
}

/// Builds a copy of one company's committed forest for another company.
///
/// Ids are remapped in two passes: every node gets its new id first, then
/// parents and totalizer sources are rewritten through the finished map, so
/// no reference can resolve to a stale id.
pub struct TenantCloner<'a, R: EntityRegistry> {
    store: &'a NodeStore,
    registry: &'a R,
}

impl<'a, R: EntityRegistry> TenantCloner<'a, R> {
    pub fn new(store: &'a NodeStore, registry: &'a R) -> Self {
        Self { store, registry }
    }

    pub fn plan(&self, source_company: &str, target_company: &str) -> Result<ClonePlan> {
        if source_company == target_company {
            return Err(StatementTreeError::SelfClone(source_company.to_string()));
        }
        self.registry.get_company(source_company).ok_or_else(|| {
            StatementTreeError::NotFound(format!("company '{}'", source_company))
        })?;
        let target = self.registry.get_company(target_company).ok_or_else(|| {
            StatementTreeError::NotFound(format!("company '{}'", target_company))
        })?;

        let (ordered, skipped_uncommitted) = self.committed_preorder(source_company)?;

        if let Some((_, depth)) = ordered
            .iter()
            .find(|(_, depth)| *depth >= usize::from(target.category_levels))
        {
            return Err(StatementTreeError::DepthExceeded {
                depth: *depth,
                max_levels: target.category_levels,
            });
        }

        // Pass 1: allocate every id before any reference is rewritten.
        let id_map: BTreeMap<NodeId, NodeId> = ordered
            .iter()
            .map(|(node, _)| (node.id, Uuid::new_v4()))
            .collect();

        let root_offset = self
            .store
            .roots(target_company)
            .iter()
            .map(|n| n.display_order)
            .max()
            .unwrap_or(0);

        // Pass 2: rewrite parents, then leaf references.
        let now = Utc::now();
        let mut dropped_references = 0;
        let mut nodes = Vec::with_capacity(ordered.len());
        for (source, _) in &ordered {
            let mut node = (*source).clone();
            node.id = id_map[&source.id];
            node.company_id = target_company.to_string();
            match source.parent_id {
                Some(parent) => {
                    let new_parent = id_map.get(&parent).copied().ok_or_else(|| {
                        StatementTreeError::InvalidReference(format!(
                            "parent {} of account {} was not cloned",
                            parent, source.id
                        ))
                    })?;
                    node.parent_id = Some(new_parent);
                }
                None => {
                    node.display_order = node
                        .display_order
                        .checked_add(root_offset)
                        .ok_or(StatementTreeError::DisplayOrderOverflow(source.id))?;
                }
            }

            if let AccountPayload::Total {
                selected_account_ids,
            } = &mut node.payload
            {
                let before = selected_account_ids.len();
                *selected_account_ids = selected_account_ids
                    .iter()
                    .filter_map(|old| id_map.get(old).copied())
                    .collect();
                let dropped = before - selected_account_ids.len();
                if dropped > 0 {
                    warn!(
                        "Dropped {} uncloned sources from totalizer {}",
                        dropped, source.id
                    );
                    dropped_references += dropped;
                }
            }

            if node.company_visibility.remove(source_company) {
                node.company_visibility.insert(target_company.to_string());
            }

            node.status = NodeStatus::Committed;
            node.draft_name = None;
            node.created_at = now;
            node.updated_at = now;
            nodes.push(node);
        }

        debug!(
            "Planned clone of {} accounts from '{}' to '{}'",
            nodes.len(),
            source_company,
            target_company
        );

        Ok(ClonePlan {
            nodes,
            report: CloneReport {
                source_company: source_company.to_string(),
                target_company: target_company.to_string(),
                id_map,
                skipped_uncommitted,
                dropped_references,
            },
        })
    }

    /// Committed nodes of a company with their depths, parents before
    /// children. Nodes unreachable from a root can only sit on a parent
    /// cycle and are reported as such.
    fn committed_preorder(
        &self,
        company_id: &str,
    ) -> Result<(Vec<(&'a AccountNode, usize)>, usize)> {
        let store: &'a NodeStore = self.store;
        let mut visited = HashSet::new();
        let mut ordered = Vec::new();
        let mut skipped = 0;
        let mut stack: Vec<(&'a AccountNode, usize)> = store
            .roots(company_id)
            .into_iter()
            .rev()
            .map(|n| (n, 0))
            .collect();

        while let Some((node, depth)) = stack.pop() {
            if !visited.insert(node.id) {
                return Err(StatementTreeError::CyclicStructure(node.id));
            }
            if !node.is_committed() {
                skipped += 1;
                continue;
            }
            ordered.push((node, depth));
            for child in store.children(company_id, Some(node.id)).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }

        if let Some(stray) = store
            .company_nodes(company_id)
            .into_iter()
            .find(|n| n.is_committed() && !visited.contains(&n.id))
        {
            warn!("Account {} is not reachable from any root", stray.id);
            return Err(StatementTreeError::CyclicStructure(stray.id));
        }

        Ok((ordered, skipped))
    }
}
