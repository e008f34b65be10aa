use crate::cloning::{CloneReport, TenantCloner};
use crate::codes::{child_code, has_root_prefix, root_code, root_prefix};
use crate::config::EngineConfig;
use crate::error::{Result, StatementTreeError};
use crate::registry::{Company, EntityRegistry};
use crate::schema::{AccountNode, AccountPayload, NodeId, NodeKind, NodeStatus};
use crate::store::NodeStore;
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The deleted node followed by its descendants, in pre-order.
    pub removed: Vec<NodeId>,
    /// Totalizers whose source list lost one or more of the removed ids.
    pub updated_totals: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// A never-committed node was dropped.
    Discarded(DeleteOutcome),
    /// The node is back to its last committed name.
    Reverted(AccountNode),
}

/// A node together with its depth in the company forest (roots are 0).
#[derive(Debug, Clone, Copy)]
pub struct OutlineRow<'a> {
    pub depth: usize,
    pub node: &'a AccountNode,
}

/// Mutations over one store of account trees, validated against an entity
/// registry.
///
/// Callers serialize operations per company; every method runs to completion
/// and leaves the store consistent or untouched.
pub struct TreeEngine<R: EntityRegistry> {
    store: NodeStore,
    registry: R,
    config: EngineConfig,
}

impl<R: EntityRegistry> TreeEngine<R> {
    pub fn new(registry: R) -> Self {
        Self::with_store(registry, NodeStore::new(), EngineConfig::default())
    }

    pub fn with_store(registry: R, store: NodeStore, config: EngineConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    pub fn into_store(self) -> NodeStore {
        self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn get(&self, id: NodeId) -> Result<&AccountNode> {
        self.store
            .get(id)
            .ok_or_else(|| StatementTreeError::NotFound(format!("account {}", id)))
    }

    fn company(&self, company_id: &str) -> Result<Company> {
        self.registry
            .get_company(company_id)
            .ok_or_else(|| StatementTreeError::NotFound(format!("company '{}'", company_id)))
    }

    /// Number of ancestors of `id`. Fails on a parent cycle instead of looping.
    pub fn depth(&self, id: NodeId) -> Result<usize> {
        let mut current = self.get(id)?;
        let mut visited = HashSet::from([id]);
        let mut depth = 0;

        while let Some(parent_id) = current.parent_id {
            if !visited.insert(parent_id) {
                warn!("Parent cycle detected while measuring depth of {}", id);
                return Err(StatementTreeError::CyclicStructure(parent_id));
            }
            current = self.get(parent_id)?;
            depth += 1;
        }

        Ok(depth)
    }

    pub fn insert(
        &mut self,
        company_id: &str,
        parent_id: Option<NodeId>,
        payload: AccountPayload,
    ) -> Result<AccountNode> {
        let company = self.company(company_id)?;

        let (depth, parent_code) = match parent_id {
            Some(pid) => {
                let parent = self.get(pid)?;
                if parent.company_id != company_id {
                    return Err(StatementTreeError::CrossTenantReference {
                        node: pid,
                        node_company: parent.company_id.clone(),
                        other_company: company_id.to_string(),
                    });
                }
                if !parent.is_committed() {
                    return Err(StatementTreeError::Uncommitted(pid));
                }
                (self.depth(pid)? + 1, Some(parent.code.clone()))
            }
            None => (0, None),
        };

        if depth >= usize::from(company.category_levels) {
            return Err(StatementTreeError::DepthExceeded {
                depth,
                max_levels: company.category_levels,
            });
        }

        let payload = self.resolve_payload(company_id, None, payload, false)?;

        let siblings = self.store.children(company_id, parent_id);
        let width = self.config.code_width;
        let code = match parent_code {
            Some(parent_code) => child_code(&parent_code, siblings.len(), width),
            None => {
                let prefix = root_prefix(&self.config.code_prefixes, &payload);
                let same_prefix = siblings
                    .iter()
                    .filter(|s| has_root_prefix(&s.code, prefix))
                    .count();
                root_code(prefix, same_prefix, width)
            }
        };
        let display_order = next_display_order(&siblings)?;

        let node = AccountNode::new_uncommitted(
            company_id.to_string(),
            parent_id,
            code,
            display_order,
            payload,
        );
        debug!(
            "Inserted {:?} account {} ({}) at depth {} in company '{}'",
            node.kind(),
            node.id,
            node.code,
            depth,
            company_id
        );
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    /// Commits a name. The first commit of a new node also requires a
    /// complete payload.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<AccountNode> {
        let mut node = self.get(id)?.clone();
        let trimmed = new_name.trim();
        if trimmed.is_empty() {
            return Err(StatementTreeError::EmptyName(id));
        }

        if node.status == NodeStatus::New {
            node.payload =
                self.resolve_payload(&node.company_id, Some(id), node.payload.clone(), true)?;
            info!(
                "Committed {:?} account {} '{}' in company '{}'",
                node.kind(),
                id,
                trimmed,
                node.company_id
            );
        }

        node.name = trimmed.to_string();
        node.status = NodeStatus::Committed;
        node.draft_name = None;
        node.touch();
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    /// Opens the name editor on a committed node. New nodes are already
    /// being edited.
    pub fn begin_edit(&mut self, id: NodeId) -> Result<AccountNode> {
        let mut node = self.get(id)?.clone();
        if node.status == NodeStatus::Committed {
            node.status = NodeStatus::Editing;
            node.draft_name = Some(node.name.clone());
            self.store.upsert(node.clone())?;
        }
        Ok(node)
    }

    /// Holds an uncommitted draft name; nothing is validated until `rename`.
    pub fn edit_name(&mut self, id: NodeId, draft: &str) -> Result<AccountNode> {
        let mut node = self.get(id)?.clone();
        if node.status == NodeStatus::Committed {
            node.status = NodeStatus::Editing;
        }
        node.draft_name = Some(draft.to_string());
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    pub fn cancel_edit(&mut self, id: NodeId) -> Result<CancelOutcome> {
        let mut node = self.get(id)?.clone();
        match node.status {
            NodeStatus::New => {
                debug!("Discarding uncommitted account {}", id);
                Ok(CancelOutcome::Discarded(self.delete(id)?))
            }
            NodeStatus::Editing | NodeStatus::Committed => {
                node.status = NodeStatus::Committed;
                node.draft_name = None;
                self.store.upsert(node.clone())?;
                Ok(CancelOutcome::Reverted(node))
            }
        }
    }

    pub fn toggle_active(&mut self, id: NodeId) -> Result<AccountNode> {
        let mut node = self.get(id)?.clone();
        node.is_active = !node.is_active;
        node.touch();
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    /// Swaps display order with the adjacent sibling in `direction`.
    ///
    /// Returns `false` when the node is already first (Up) or last (Down).
    /// Only the two swapped siblings change.
    pub fn move_node(&mut self, id: NodeId, direction: MoveDirection) -> Result<bool> {
        let node = self.get(id)?;
        let siblings: Vec<NodeId> = self
            .store
            .children(&node.company_id, node.parent_id)
            .iter()
            .map(|s| s.id)
            .collect();

        let index = siblings
            .iter()
            .position(|s| *s == id)
            .ok_or_else(|| StatementTreeError::NotFound(format!("account {} among siblings", id)))?;

        let neighbor_index = match direction {
            MoveDirection::Up if index > 0 => index - 1,
            MoveDirection::Down if index + 1 < siblings.len() => index + 1,
            _ => return Ok(false),
        };

        let mut current = self.get(id)?.clone();
        let mut neighbor = self.get(siblings[neighbor_index])?.clone();
        std::mem::swap(&mut current.display_order, &mut neighbor.display_order);
        current.touch();
        neighbor.touch();
        debug!(
            "Swapped display order of {} ({}) and {} ({})",
            current.id, current.display_order, neighbor.id, neighbor.display_order
        );
        self.store.upsert(current)?;
        self.store.upsert(neighbor)?;
        Ok(true)
    }

    /// Removes a node with its whole subtree and strips the removed ids from
    /// every totalizer of the company.
    pub fn delete(&mut self, id: NodeId) -> Result<DeleteOutcome> {
        let company_id = self.get(id)?.company_id.clone();
        let removed: Vec<NodeId> = self
            .preorder(&company_id, &[id])?
            .into_iter()
            .map(|(node_id, _)| node_id)
            .collect();

        for node_id in &removed {
            self.store.remove(*node_id);
        }

        let removed_set: BTreeSet<NodeId> = removed.iter().copied().collect();
        let updated_totals = self.strip_total_references(&company_id, &removed_set)?;

        info!(
            "Deleted {} accounts from company '{}' ({} totalizers updated)",
            removed.len(),
            company_id,
            updated_totals.len()
        );

        Ok(DeleteOutcome {
            removed,
            updated_totals,
        })
    }

    fn strip_total_references(
        &mut self,
        company_id: &str,
        removed: &BTreeSet<NodeId>,
    ) -> Result<Vec<NodeId>> {
        let affected: Vec<AccountNode> = self
            .store
            .company_nodes(company_id)
            .into_iter()
            .filter(|n| {
                n.selected_account_ids()
                    .is_some_and(|ids| !ids.is_disjoint(removed))
            })
            .cloned()
            .collect();

        let mut updated = Vec::with_capacity(affected.len());
        for mut total in affected {
            if let AccountPayload::Total {
                selected_account_ids,
            } = &mut total.payload
            {
                selected_account_ids.retain(|source| !removed.contains(source));
                if selected_account_ids.is_empty() {
                    warn!("Totalizer {} has no remaining sources", total.id);
                }
            }
            total.touch();
            updated.push(total.id);
            self.store.upsert(total)?;
        }
        Ok(updated)
    }

    /// Checks a totalizer's source list: non-empty, existing, committed,
    /// same company, and never another Total or Flex line.
    pub fn validate_total(&self, node: &AccountNode) -> Result<()> {
        let AccountPayload::Total {
            selected_account_ids,
        } = &node.payload
        else {
            return Err(StatementTreeError::KindMismatch {
                node: node.id,
                expected: NodeKind::Total,
                found: node.kind(),
            });
        };

        if selected_account_ids.is_empty() {
            return Err(StatementTreeError::InvalidReference(format!(
                "totalizer {} has no selected accounts",
                node.id
            )));
        }

        for source in selected_account_ids {
            self.check_total_source(&node.company_id, Some(node.id), *source)?;
        }
        Ok(())
    }

    fn check_total_source(
        &self,
        company_id: &str,
        owner: Option<NodeId>,
        source: NodeId,
    ) -> Result<()> {
        if owner == Some(source) {
            return Err(StatementTreeError::InvalidReference(format!(
                "totalizer {} cannot include itself",
                source
            )));
        }

        let target = self.store.get(source).ok_or_else(|| {
            StatementTreeError::InvalidReference(format!("account {} does not exist", source))
        })?;

        if target.company_id != company_id {
            return Err(StatementTreeError::CrossTenantReference {
                node: source,
                node_company: target.company_id.clone(),
                other_company: company_id.to_string(),
            });
        }
        if !target.is_committed() {
            return Err(StatementTreeError::Uncommitted(source));
        }

        match target.kind() {
            NodeKind::Total | NodeKind::Flex => Err(StatementTreeError::InvalidReference(format!(
                "account {} is a {:?} line and cannot be totalized",
                source,
                target.kind()
            ))),
            NodeKind::Category | NodeKind::Indicator => Ok(()),
        }
    }

    /// Validates a payload against the registry and the store, filling in the
    /// category entry type. `complete` additionally requires a non-empty
    /// totalizer selection.
    fn resolve_payload(
        &self,
        company_id: &str,
        owner: Option<NodeId>,
        payload: AccountPayload,
        complete: bool,
    ) -> Result<AccountPayload> {
        match payload {
            AccountPayload::Category { category_ids, .. } => {
                let mut seen = HashSet::new();
                let category_ids: Vec<String> = category_ids
                    .into_iter()
                    .filter(|id| seen.insert(id.clone()))
                    .collect();

                let mut entry_type = None;
                for category_id in &category_ids {
                    let category = self.registry.get_category(category_id).ok_or_else(|| {
                        StatementTreeError::InvalidReference(format!(
                            "category '{}' does not exist",
                            category_id
                        ))
                    })?;
                    match entry_type {
                        None => entry_type = Some(category.revenue_or_expense),
                        Some(expected) if expected != category.revenue_or_expense => {
                            return Err(StatementTreeError::InvalidReference(format!(
                                "category '{}' is {:?} but the line is {:?}",
                                category_id, category.revenue_or_expense, expected
                            )));
                        }
                        Some(_) => {}
                    }
                }

                if entry_type.is_none() {
                    return Err(StatementTreeError::InvalidReference(
                        "category line needs at least one category".to_string(),
                    ));
                }

                Ok(AccountPayload::Category {
                    category_ids,
                    entry_type,
                })
            }
            AccountPayload::Indicator { indicator_id } => {
                if self.registry.get_indicator(&indicator_id).is_none() {
                    return Err(StatementTreeError::InvalidReference(format!(
                        "indicator '{}' does not exist",
                        indicator_id
                    )));
                }
                Ok(AccountPayload::Indicator { indicator_id })
            }
            AccountPayload::Total {
                selected_account_ids,
            } => {
                if complete && selected_account_ids.is_empty() {
                    return Err(StatementTreeError::InvalidReference(
                        "totalizer needs at least one selected account".to_string(),
                    ));
                }
                for source in &selected_account_ids {
                    self.check_total_source(company_id, owner, *source)?;
                }
                Ok(AccountPayload::Total {
                    selected_account_ids,
                })
            }
            flex @ AccountPayload::Flex { .. } => Ok(flex),
        }
    }

    /// Replaces the payload of a node with one of the same kind.
    pub fn update_payload(&mut self, id: NodeId, payload: AccountPayload) -> Result<AccountNode> {
        let mut node = self.get(id)?.clone();
        if payload.kind() != node.kind() {
            return Err(StatementTreeError::KindMismatch {
                node: id,
                expected: payload.kind(),
                found: node.kind(),
            });
        }

        node.payload =
            self.resolve_payload(&node.company_id, Some(id), payload, node.is_committed())?;
        node.touch();
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    /// Moves a committed node and its subtree under `new_parent` (or to the
    /// root), appending it after the new siblings. Its code is kept.
    pub fn reparent(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<AccountNode> {
        let node = self.get(id)?;
        if !node.is_committed() {
            return Err(StatementTreeError::Uncommitted(id));
        }
        if node.parent_id == new_parent {
            return Ok(node.clone());
        }
        let company_id = node.company_id.clone();
        let company = self.company(&company_id)?;

        let new_depth = match new_parent {
            Some(pid) => {
                let parent = self.get(pid)?;
                if parent.company_id != company_id {
                    return Err(StatementTreeError::CrossTenantReference {
                        node: pid,
                        node_company: parent.company_id.clone(),
                        other_company: company_id,
                    });
                }
                if !parent.is_committed() {
                    return Err(StatementTreeError::Uncommitted(pid));
                }
                if pid == id || self.find_descendant(&company_id, &[id], pid)?.is_some() {
                    return Err(StatementTreeError::CyclicStructure(pid));
                }
                self.depth(pid)? + 1
            }
            None => 0,
        };

        let height = self
            .preorder(&company_id, &[id])?
            .into_iter()
            .map(|(_, relative)| relative)
            .max()
            .unwrap_or(0);

        let deepest = new_depth + height;
        if deepest >= usize::from(company.category_levels) {
            return Err(StatementTreeError::DepthExceeded {
                depth: deepest,
                max_levels: company.category_levels,
            });
        }

        let display_order = next_display_order(&self.store.children(&company_id, new_parent))?;
        let mut node = self.get(id)?.clone();
        node.parent_id = new_parent;
        node.display_order = display_order;
        node.touch();
        info!("Moved account {} to parent {:?}", id, new_parent);
        self.store.upsert(node.clone())?;
        Ok(node)
    }

    pub fn set_company_visibility(
        &mut self,
        id: NodeId,
        company_id: &str,
        enabled: bool,
    ) -> Result<AccountNode> {
        self.company(company_id)?;
        let mut node = self.get(id)?.clone();
        let changed = if enabled {
            node.company_visibility.insert(company_id.to_string())
        } else {
            node.company_visibility.remove(company_id)
        };
        if changed {
            node.touch();
            self.store.upsert(node.clone())?;
        }
        Ok(node)
    }

    /// Depth-first search for `target` below any of `roots` within one
    /// company.
    ///
    /// Overlapping roots are searched once. A node that shows up again on its
    /// own path reports `CyclicStructure` instead of looping.
    pub fn find_descendant(
        &self,
        company_id: &str,
        roots: &[NodeId],
        target: NodeId,
    ) -> Result<Option<&AccountNode>> {
        let mut visited = HashSet::new();
        let mut path: Vec<NodeId> = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((current, depth)) = stack.pop() {
            path.truncate(depth);
            if path.contains(&current) {
                warn!("Cycle detected at {} while searching for {}", current, target);
                return Err(StatementTreeError::CyclicStructure(current));
            }
            path.push(current);
            if !visited.insert(current) {
                continue;
            }
            let Some(node) = self.store.get(current) else {
                continue;
            };
            if node.company_id != company_id {
                continue;
            }
            if current == target {
                return Ok(Some(node));
            }
            for child in self.store.children(company_id, Some(current)).iter().rev() {
                stack.push((child.id, depth + 1));
            }
        }

        Ok(None)
    }

    /// Pre-order walk from `starts` returning each id with its depth relative
    /// to the start it was reached from.
    fn preorder(&self, company_id: &str, starts: &[NodeId]) -> Result<Vec<(NodeId, usize)>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<(NodeId, usize)> = starts.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((current, depth)) = stack.pop() {
            if !visited.insert(current) {
                warn!("Cycle detected at {} during traversal", current);
                return Err(StatementTreeError::CyclicStructure(current));
            }
            order.push((current, depth));
            for child in self.store.children(company_id, Some(current)).iter().rev() {
                stack.push((child.id, depth + 1));
            }
        }

        Ok(order)
    }

    /// The company's forest flattened in display order.
    pub fn outline(&self, company_id: &str) -> Result<Vec<OutlineRow<'_>>> {
        let roots: Vec<NodeId> = self.store.roots(company_id).iter().map(|n| n.id).collect();
        self.preorder(company_id, &roots)?
            .into_iter()
            .map(|(id, depth)| {
                Ok(OutlineRow {
                    depth,
                    node: self.get(id)?,
                })
            })
            .collect()
    }

    /// Committed lines whose name or code contains `query`, case-insensitive,
    /// in outline order.
    pub fn search(&self, company_id: &str, query: &str) -> Result<Vec<&AccountNode>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .outline(company_id)?
            .into_iter()
            .map(|row| row.node)
            .filter(|n| n.is_committed())
            .filter(|n| {
                needle.is_empty()
                    || n.name.to_lowercase().contains(&needle)
                    || n.code.to_lowercase().contains(&needle)
            })
            .collect())
    }

    /// Re-checks every structural and reference invariant of one company,
    /// reporting the first violation. Intended after loading a store.
    pub fn verify_forest(&self, company_id: &str) -> Result<()> {
        let company = self.company(company_id)?;
        let nodes = self.store.company_nodes(company_id);
        let mut sibling_orders: BTreeMap<Option<NodeId>, HashSet<i32>> = BTreeMap::new();

        for node in &nodes {
            if let Some(pid) = node.parent_id {
                let parent = self.store.get(pid).ok_or_else(|| {
                    StatementTreeError::InvalidReference(format!(
                        "account {} points to missing parent {}",
                        node.id, pid
                    ))
                })?;
                if parent.company_id != node.company_id {
                    return Err(StatementTreeError::CrossTenantReference {
                        node: pid,
                        node_company: parent.company_id.clone(),
                        other_company: node.company_id.clone(),
                    });
                }
            }

            let depth = self.depth(node.id)?;
            if depth >= usize::from(company.category_levels) {
                return Err(StatementTreeError::DepthExceeded {
                    depth,
                    max_levels: company.category_levels,
                });
            }

            if !sibling_orders
                .entry(node.parent_id)
                .or_default()
                .insert(node.display_order)
            {
                return Err(StatementTreeError::InvalidReference(format!(
                    "display order {} is used twice under parent {:?}",
                    node.display_order, node.parent_id
                )));
            }

            if !node.is_committed() {
                continue;
            }
            if node.name.trim().is_empty() {
                return Err(StatementTreeError::EmptyName(node.id));
            }
            match &node.payload {
                // Deletions may have emptied the list; only the remaining
                // sources are checked.
                AccountPayload::Total {
                    selected_account_ids,
                } => {
                    for source in selected_account_ids {
                        self.check_total_source(company_id, Some(node.id), *source)?;
                    }
                }
                AccountPayload::Category { .. } | AccountPayload::Indicator { .. } => {
                    self.resolve_payload(company_id, Some(node.id), node.payload.clone(), true)?;
                }
                AccountPayload::Flex { .. } => {}
            }
        }

        debug!(
            "Verified {} accounts of company '{}'",
            nodes.len(),
            company_id
        );
        Ok(())
    }

    /// Copies every committed node of `source_company` into `target_company`
    /// with fresh ids, as a single all-or-nothing batch.
    pub fn clone_company(
        &mut self,
        source_company: &str,
        target_company: &str,
    ) -> Result<CloneReport> {
        let plan = TenantCloner::new(&self.store, &self.registry)
            .plan(source_company, target_company)?;
        let report = plan.report();
        self.store.insert_batch(plan.into_nodes())?;

        info!(
            "Cloned {} accounts from company '{}' into '{}' ({} dangling references dropped)",
            report.id_map.len(),
            source_company,
            target_company,
            report.dropped_references
        );
        Ok(report)
    }
}

fn next_display_order(siblings: &[&AccountNode]) -> Result<i32> {
    match siblings.iter().max_by_key(|s| s.display_order) {
        Some(last) => last
            .display_order
            .checked_add(1)
            .ok_or(StatementTreeError::DisplayOrderOverflow(last.id)),
        None => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::schema::{EntryType, Sign};

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new()
            .with_company("c1", 3)
            .unwrap()
            .with_company("c2", 5)
            .unwrap()
            .with_category("vendas", "Vendas", EntryType::Revenue)
            .with_category("servicos", "Serviços", EntryType::Revenue)
            .with_category("aluguel", "Aluguel", EntryType::Expense)
            .with_indicator("ebitda", "EBITDA")
    }

    fn revenue() -> AccountPayload {
        AccountPayload::category(["vendas"])
    }

    fn indicator() -> AccountPayload {
        AccountPayload::indicator("ebitda")
    }

    fn manual() -> AccountPayload {
        AccountPayload::flex(Sign::Positive)
    }

    fn committed(
        engine: &mut TreeEngine<InMemoryRegistry>,
        company: &str,
        parent: Option<NodeId>,
        payload: AccountPayload,
        name: &str,
    ) -> NodeId {
        let id = engine.insert(company, parent, payload).unwrap().id();
        engine.rename(id, name).unwrap();
        id
    }

    #[test]
    fn test_insert_generates_codes_and_orders() {
        let mut engine = TreeEngine::new(registry());
        let vendas = engine
            .insert("c1", None, revenue())
            .unwrap();
        assert_eq!(vendas.code, "R01");
        assert_eq!(vendas.display_order, 1);
        assert_eq!(vendas.status(), NodeStatus::New);
        assert_eq!(vendas.entry_type(), Some(EntryType::Revenue));
        engine.rename(vendas.id(), "Vendas").unwrap();

        let aluguel = engine
            .insert("c1", None, AccountPayload::category(["aluguel"]))
            .unwrap();
        assert_eq!(aluguel.code, "D01");
        assert_eq!(aluguel.display_order, 2);

        let child = engine
            .insert("c1", Some(vendas.id()), AccountPayload::category(["servicos"]))
            .unwrap();
        assert_eq!(child.code, "R01.01");
        let second = engine
            .insert("c1", Some(vendas.id()), AccountPayload::flex(Sign::Negative))
            .unwrap();
        assert_eq!(second.code, "R01.02");
        assert_eq!(second.display_order, 2);
    }

    #[test]
    fn test_insert_enforces_depth_limit() {
        let mut engine = TreeEngine::new(registry());
        let root = committed(&mut engine, "c1", None, revenue(), "A");
        let level1 = committed(&mut engine, "c1", Some(root), revenue(), "B");
        let level2 = committed(&mut engine, "c1", Some(level1), revenue(), "C");
        assert_eq!(engine.depth(level2).unwrap(), 2);

        let err = engine
            .insert("c1", Some(level2), revenue())
            .unwrap_err();
        assert!(matches!(
            err,
            StatementTreeError::DepthExceeded {
                depth: 3,
                max_levels: 3
            }
        ));
    }

    #[test]
    fn test_insert_rejects_uncommitted_or_foreign_parent() {
        let mut engine = TreeEngine::new(registry());
        let pending = engine
            .insert("c1", None, manual())
            .unwrap()
            .id();
        assert!(matches!(
            engine.insert("c1", Some(pending), manual()),
            Err(StatementTreeError::Uncommitted(_))
        ));

        engine.rename(pending, "Ajustes").unwrap();
        assert!(matches!(
            engine.insert("c2", Some(pending), manual()),
            Err(StatementTreeError::CrossTenantReference { .. })
        ));
        assert!(matches!(
            engine.insert("nope", None, manual()),
            Err(StatementTreeError::NotFound(_))
        ));
    }

    #[test]
    fn test_category_payload_validation() {
        let mut engine = TreeEngine::new(registry());
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::category(["vendas", "aluguel"])),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::category(["missing"])),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::category(Vec::<String>::new())),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::indicator("missing")),
            Err(StatementTreeError::InvalidReference(_))
        ));

        let node = engine
            .insert("c1", None, AccountPayload::category(["vendas", "servicos", "vendas"]))
            .unwrap();
        assert_eq!(
            node.payload,
            AccountPayload::Category {
                category_ids: vec!["vendas".to_string(), "servicos".to_string()],
                entry_type: Some(EntryType::Revenue),
            }
        );
    }

    #[test]
    fn test_rename_and_edit_lifecycle() {
        let mut engine = TreeEngine::new(registry());
        let id = engine
            .insert("c1", None, indicator())
            .unwrap()
            .id();
        assert!(matches!(
            engine.rename(id, "   "),
            Err(StatementTreeError::EmptyName(_))
        ));
        assert_eq!(engine.get(id).unwrap().status(), NodeStatus::New);

        let node = engine.rename(id, "  EBITDA ").unwrap();
        assert_eq!(node.name, "EBITDA");
        assert_eq!(node.status(), NodeStatus::Committed);

        engine.begin_edit(id).unwrap();
        let editing = engine.edit_name(id, "EBITDA ajustado").unwrap();
        assert_eq!(editing.status(), NodeStatus::Editing);
        assert_eq!(editing.display_name(), "EBITDA ajustado");
        assert_eq!(editing.name, "EBITDA");

        match engine.cancel_edit(id).unwrap() {
            CancelOutcome::Reverted(node) => {
                assert_eq!(node.name, "EBITDA");
                assert_eq!(node.display_name(), "EBITDA");
                assert_eq!(node.status(), NodeStatus::Committed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_cancel_new_node_discards_it() {
        let mut engine = TreeEngine::new(registry());
        let id = engine
            .insert("c1", None, manual())
            .unwrap()
            .id();
        match engine.cancel_edit(id).unwrap() {
            CancelOutcome::Discarded(outcome) => assert_eq!(outcome.removed, vec![id]),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_commit_requires_total_selection() {
        let mut engine = TreeEngine::new(registry());
        let total = engine
            .insert("c1", None, AccountPayload::total([]))
            .unwrap()
            .id();
        assert!(matches!(
            engine.rename(total, "Resultado"),
            Err(StatementTreeError::InvalidReference(_))
        ));

        let vendas = committed(&mut engine, "c1", None, revenue(), "Vendas");
        engine
            .update_payload(total, AccountPayload::total([vendas]))
            .unwrap();
        let node = engine.rename(total, "Resultado").unwrap();
        assert_eq!(node.selected_account_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_validate_total_rejects_bad_sources() {
        let mut engine = TreeEngine::new(registry());
        let vendas = committed(&mut engine, "c1", None, revenue(), "Vendas");
        let flex = committed(&mut engine, "c1", None, manual(), "Ajuste");
        let other = committed(&mut engine, "c2", None, indicator(), "EBITDA");
        let total = committed(
            &mut engine,
            "c1",
            None,
            AccountPayload::total([vendas]),
            "Total",
        );

        assert!(engine.validate_total(engine.get(total).unwrap()).is_ok());

        assert!(matches!(
            engine.insert("c1", None, AccountPayload::total([flex])),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::total([total])),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::total([other])),
            Err(StatementTreeError::CrossTenantReference { .. })
        ));
        assert!(matches!(
            engine.update_payload(total, AccountPayload::total([total])),
            Err(StatementTreeError::InvalidReference(_))
        ));
        assert!(matches!(
            engine.validate_total(engine.get(vendas).unwrap()),
            Err(StatementTreeError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_update_payload_cannot_change_kind() {
        let mut engine = TreeEngine::new(registry());
        let id = committed(&mut engine, "c1", None, indicator(), "EBITDA");
        assert!(matches!(
            engine.update_payload(id, AccountPayload::flex(Sign::Negative)),
            Err(StatementTreeError::KindMismatch {
                expected: NodeKind::Flex,
                found: NodeKind::Indicator,
                ..
            })
        ));
    }

    #[test]
    fn test_toggle_active_does_not_cascade() {
        let mut engine = TreeEngine::new(registry());
        let root = committed(&mut engine, "c1", None, revenue(), "Vendas");
        let child = committed(&mut engine, "c1", Some(root), revenue(), "Loja");

        assert!(!engine.toggle_active(root).unwrap().is_active);
        assert!(engine.get(child).unwrap().is_active);
        assert!(engine.toggle_active(root).unwrap().is_active);
    }

    #[test]
    fn test_move_swaps_adjacent_display_orders_only() {
        let mut engine = TreeEngine::new(registry());
        let a = committed(&mut engine, "c1", None, manual(), "A");
        let b = committed(&mut engine, "c1", None, manual(), "B");
        let c = committed(&mut engine, "c1", None, manual(), "C");

        assert!(engine.move_node(c, MoveDirection::Up).unwrap());
        assert_eq!(engine.get(a).unwrap().display_order, 1);
        assert_eq!(engine.get(b).unwrap().display_order, 3);
        assert_eq!(engine.get(c).unwrap().display_order, 2);

        assert!(!engine.move_node(a, MoveDirection::Up).unwrap());
        assert!(!engine.move_node(b, MoveDirection::Down).unwrap());

        assert!(engine.move_node(c, MoveDirection::Down).unwrap());
        assert_eq!(engine.get(b).unwrap().display_order, 2);
        assert_eq!(engine.get(c).unwrap().display_order, 3);
    }

    #[test]
    fn test_delete_removes_subtree_and_total_references() {
        let mut engine = TreeEngine::new(registry());
        let root = committed(&mut engine, "c1", None, revenue(), "Vendas");
        let child = committed(&mut engine, "c1", Some(root), revenue(), "Loja");
        let grandchild = committed(&mut engine, "c1", Some(child), revenue(), "Online");
        let keep = committed(&mut engine, "c1", None, indicator(), "EBITDA");
        let sources = AccountPayload::total([grandchild, keep]);
        let total = committed(&mut engine, "c1", None, sources, "Total");

        let outcome = engine.delete(root).unwrap();
        assert_eq!(outcome.removed, vec![root, child, grandchild]);
        assert_eq!(outcome.updated_totals, vec![total]);
        assert_eq!(engine.store().len(), 2);
        assert_eq!(
            engine.get(total).unwrap().selected_account_ids().unwrap(),
            &BTreeSet::from([keep])
        );
        assert!(matches!(
            engine.delete(root),
            Err(StatementTreeError::NotFound(_))
        ));
    }

    #[test]
    fn test_reparent_checks_cycles_and_depth() {
        let mut engine = TreeEngine::new(registry());
        let a = committed(&mut engine, "c1", None, revenue(), "A");
        let b = committed(&mut engine, "c1", Some(a), revenue(), "B");
        let c = committed(&mut engine, "c1", None, revenue(), "C");
        let d = committed(&mut engine, "c1", Some(c), revenue(), "D");

        assert!(matches!(
            engine.reparent(a, Some(b)),
            Err(StatementTreeError::CyclicStructure(_))
        ));
        assert!(matches!(
            engine.reparent(a, Some(a)),
            Err(StatementTreeError::CyclicStructure(_))
        ));
        // a has height 1, so under d it would reach depth 3.
        assert!(matches!(
            engine.reparent(a, Some(d)),
            Err(StatementTreeError::DepthExceeded { depth: 3, .. })
        ));

        let moved = engine.reparent(b, Some(c)).unwrap();
        assert_eq!(moved.parent_id, Some(c));
        assert_eq!(moved.display_order, 2);
        assert_eq!(moved.code, "R01.01");
        assert!(engine.store().children("c1", Some(a)).is_empty());

        let root = engine.reparent(d, None).unwrap();
        assert!(root.is_root());
        assert_eq!(root.display_order, 3);
    }

    #[test]
    fn test_company_visibility() {
        let mut engine = TreeEngine::new(registry());
        let id = committed(&mut engine, "c1", None, manual(), "Ajuste");

        let node = engine.set_company_visibility(id, "c2", true).unwrap();
        assert!(node.is_visible_for("c2"));
        let node = engine.set_company_visibility(id, "c2", false).unwrap();
        assert!(!node.is_visible_for("c2"));
        assert!(matches!(
            engine.set_company_visibility(id, "missing", true),
            Err(StatementTreeError::NotFound(_))
        ));
    }

    #[test]
    fn test_search_and_outline_follow_tree_order() {
        let mut engine = TreeEngine::new(registry());
        let vendas = committed(&mut engine, "c1", None, revenue(), "Vendas");
        committed(&mut engine, "c1", Some(vendas), revenue(), "Vendas online");
        committed(
            &mut engine,
            "c1",
            None,
            AccountPayload::category(["aluguel"]),
            "Aluguel",
        );

        let outline = engine.outline("c1").unwrap();
        let names: Vec<(&str, usize)> = outline
            .iter()
            .map(|row| (row.node.name.as_str(), row.depth))
            .collect();
        assert_eq!(
            names,
            vec![("Vendas", 0), ("Vendas online", 1), ("Aluguel", 0)]
        );

        let hits: Vec<&str> = engine
            .search("c1", "VENDAS")
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(hits, vec!["Vendas", "Vendas online"]);
        assert_eq!(engine.search("c1", "d01").unwrap().len(), 1);
    }

    #[test]
    fn test_traversal_terminates_on_cyclic_store() {
        let mut engine = TreeEngine::new(registry());
        let a = committed(&mut engine, "c1", None, manual(), "A");
        let b = committed(&mut engine, "c1", Some(a), manual(), "B");

        let mut corrupted = engine.get(a).unwrap().clone();
        corrupted.parent_id = Some(b);
        engine.store.upsert(corrupted).unwrap();

        assert!(matches!(
            engine.depth(b),
            Err(StatementTreeError::CyclicStructure(_))
        ));
        assert!(matches!(
            engine.find_descendant("c1", &[a], NodeId::nil()),
            Err(StatementTreeError::CyclicStructure(_))
        ));
        assert!(matches!(
            engine.delete(a),
            Err(StatementTreeError::CyclicStructure(_))
        ));
        assert!(engine.verify_forest("c1").is_err());
    }

    #[test]
    fn test_find_descendant() {
        let mut engine = TreeEngine::new(registry());
        let a = committed(&mut engine, "c1", None, manual(), "A");
        let b = committed(&mut engine, "c1", Some(a), manual(), "B");
        let c = committed(&mut engine, "c1", None, manual(), "C");

        assert_eq!(engine.find_descendant("c1", &[a], b).unwrap().unwrap().id(), b);
        assert!(engine.find_descendant("c1", &[a], c).unwrap().is_none());
        assert!(engine.find_descendant("c1", &[a, a, c], c).unwrap().is_some());
        assert!(engine.find_descendant("c2", &[a], b).unwrap().is_none());
    }

    #[test]
    fn test_find_descendant_with_overlapping_roots() {
        let mut engine = TreeEngine::new(registry());
        let a = committed(&mut engine, "c1", None, manual(), "A");
        let b = committed(&mut engine, "c1", Some(a), manual(), "B");
        let c = committed(&mut engine, "c1", None, manual(), "C");

        let found = engine.find_descendant("c1", &[a, b, c], c).unwrap();
        assert_eq!(found.map(|n| n.id()), Some(c));
        let missing = engine.find_descendant("c1", &[b, a], NodeId::nil()).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_total_sources_must_be_committed() {
        let mut engine = TreeEngine::new(registry());
        let pending = engine.insert("c1", None, revenue()).unwrap().id();
        assert!(matches!(
            engine.insert("c1", None, AccountPayload::total([pending])),
            Err(StatementTreeError::Uncommitted(id)) if id == pending
        ));

        let total = engine
            .insert("c1", None, AccountPayload::total([]))
            .unwrap()
            .id();
        assert!(matches!(
            engine.update_payload(total, AccountPayload::total([pending])),
            Err(StatementTreeError::Uncommitted(_))
        ));

        engine.rename(pending, "Vendas").unwrap();
        engine
            .update_payload(total, AccountPayload::total([pending]))
            .unwrap();
        engine.rename(total, "Resultado").unwrap();
        assert!(engine.verify_forest("c1").is_ok());
    }

    #[test]
    fn test_verify_forest_accepts_total_emptied_by_delete() {
        let mut engine = TreeEngine::new(registry());
        let source = committed(&mut engine, "c1", None, revenue(), "Vendas");
        let sources = AccountPayload::total([source]);
        let total = committed(&mut engine, "c1", None, sources, "Total");

        engine.delete(source).unwrap();

        let emptied = engine.get(total).unwrap();
        assert!(emptied.selected_account_ids().unwrap().is_empty());
        assert!(engine.verify_forest("c1").is_ok());
        assert!(matches!(
            engine.validate_total(emptied),
            Err(StatementTreeError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_exhausted_display_order_is_an_error() {
        let mut engine = TreeEngine::new(registry());
        let last = committed(&mut engine, "c1", None, manual(), "A");
        let child = committed(&mut engine, "c1", Some(last), manual(), "B");
        let mut node = engine.get(last).unwrap().clone();
        node.display_order = i32::MAX;
        engine.store.upsert(node).unwrap();

        assert!(matches!(
            engine.insert("c1", None, manual()),
            Err(StatementTreeError::DisplayOrderOverflow(id)) if id == last
        ));
        assert!(matches!(
            engine.reparent(child, None),
            Err(StatementTreeError::DisplayOrderOverflow(_))
        ));
        assert_eq!(engine.store().len(), 2);
        assert_eq!(engine.get(child).unwrap().parent_id, Some(last));
    }

    #[test]
    fn test_verify_forest_accepts_valid_tree() {
        let mut engine = TreeEngine::new(registry());
        let vendas = committed(&mut engine, "c1", None, revenue(), "Vendas");
        committed(
            &mut engine,
            "c1",
            None,
            AccountPayload::total([vendas]),
            "Total",
        );
        engine
            .insert("c1", None, AccountPayload::total([]))
            .unwrap();
        assert!(engine.verify_forest("c1").is_ok());
        assert!(matches!(
            engine.verify_forest("missing"),
            Err(StatementTreeError::NotFound(_))
        ));
    }
}
