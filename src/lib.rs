//! # Statement Tree Builder
//!
//! A library for configuring per-company income-statement (DRE) account trees:
//! hierarchical report lines linked to categories, indicators, totalizers and
//! manual "flex" lines, with depth limits, ordered siblings and cross-company
//! cloning.
//!
//! ## Core Concepts
//!
//! - **Account Node**: one report line, owned by a company, with a kind-specific payload
//! - **Node Store**: flat table of nodes keyed by id, indexed by `(company, parent)`
//! - **Tree Engine**: validated mutations (insert, rename, move, delete, reparent, ...)
//! - **Cloning**: copies a company's whole forest into another with fresh ids
//! - **Codes**: short display codes such as `R01` or `R01.02`, derived once at insertion
//!
//! ## Example
//!
//! ```rust
//! use statement_tree_builder::*;
//!
//! let registry = InMemoryRegistry::new()
//!     .with_company("acme", 3)
//!     .unwrap()
//!     .with_category("sales", "Sales", EntryType::Revenue);
//! let mut engine = TreeEngine::new(registry);
//!
//! let sales = engine
//!     .insert("acme", None, AccountPayload::category(["sales"]))
//!     .unwrap();
//! let sales = engine.rename(sales.id(), "Vendas").unwrap();
//! assert_eq!(sales.code, "R01");
//!
//! let child = engine
//!     .insert("acme", Some(sales.id()), AccountPayload::flex(Sign::Negative))
//!     .unwrap();
//! assert_eq!(child.code, "R01.01");
//! ```

pub mod chart_of_accounts;
pub mod cloning;
pub mod codes;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schema;
pub mod store;

pub use chart_of_accounts::{AccountEntry, ChartOfAccounts};
pub use cloning::{ClonePlan, CloneReport, TenantCloner};
pub use commands::{apply_commands, CommandOutcome, TreeCommand};
pub use config::{CodePrefixes, EngineConfig};
pub use engine::{CancelOutcome, DeleteOutcome, MoveDirection, OutlineRow, TreeEngine};
pub use error::{Result, StatementTreeError};
pub use registry::{Category, Company, EntityRegistry, InMemoryRegistry, Indicator};
pub use schema::*;
pub use store::NodeStore;

use log::info;

/// Loads a persisted store, checks every company it contains against the
/// registry, and hands back an engine ready for edits.
pub fn open_engine<R: EntityRegistry>(
    registry: R,
    store_json: &str,
    config: EngineConfig,
) -> Result<TreeEngine<R>> {
    let store = NodeStore::from_json(store_json)?;
    let companies = store.company_ids();
    let engine = TreeEngine::with_store(registry, store, config);

    for company_id in &companies {
        engine.verify_forest(company_id)?;
    }

    info!(
        "Opened account store with {} accounts across {} companies",
        engine.store().len(),
        companies.len()
    );
    Ok(engine)
}
