//! Read-only reference data the account tree links to.

use crate::error::{Result, StatementTreeError};
use crate::schema::{CategoryId, CompanyId, EntryType, IndicatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: CategoryId,
    pub label: String,
    pub revenue_or_expense: EntryType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub id: IndicatorId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    /// Maximum tree depth for this tenant's statement (3, 4 or 5).
    pub category_levels: u8,
}

impl Company {
    pub fn new(id: impl Into<CompanyId>, category_levels: u8) -> Result<Self> {
        validate_category_levels(category_levels)?;
        Ok(Self {
            id: id.into(),
            category_levels,
        })
    }
}

pub fn validate_category_levels(levels: u8) -> Result<()> {
    if !(3..=5).contains(&levels) {
        return Err(StatementTreeError::InvalidCategoryLevels(levels));
    }
    Ok(())
}

/// Lookup contract for categories, indicators and companies.
///
/// The tree only reads ids and the few attributes it validates against; it
/// never writes back to the registry.
pub trait EntityRegistry {
    fn get_category(&self, id: &str) -> Option<Category>;
    fn get_indicator(&self, id: &str) -> Option<Indicator>;
    fn get_company(&self, id: &str) -> Option<Company>;
}

impl<T: EntityRegistry + ?Sized> EntityRegistry for &T {
    fn get_category(&self, id: &str) -> Option<Category> {
        (**self).get_category(id)
    }

    fn get_indicator(&self, id: &str) -> Option<Indicator> {
        (**self).get_indicator(id)
    }

    fn get_company(&self, id: &str) -> Option<Company> {
        (**self).get_company(id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryRegistry {
    #[serde(default)]
    categories: BTreeMap<CategoryId, Category>,
    #[serde(default)]
    indicators: BTreeMap<IndicatorId, Indicator>,
    #[serde(default)]
    companies: BTreeMap<CompanyId, Company>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, id: impl Into<CompanyId>, category_levels: u8) -> Result<Self> {
        self.add_company(Company::new(id, category_levels)?)?;
        Ok(self)
    }

    pub fn with_category(
        mut self,
        id: impl Into<CategoryId>,
        label: impl Into<String>,
        revenue_or_expense: EntryType,
    ) -> Self {
        self.add_category(Category {
            id: id.into(),
            label: label.into(),
            revenue_or_expense,
        });
        self
    }

    pub fn with_indicator(mut self, id: impl Into<IndicatorId>, label: impl Into<String>) -> Self {
        self.add_indicator(Indicator {
            id: id.into(),
            label: label.into(),
        });
        self
    }

    pub fn add_company(&mut self, company: Company) -> Result<()> {
        validate_category_levels(company.category_levels)?;
        self.companies.insert(company.id.clone(), company);
        Ok(())
    }

    pub fn add_category(&mut self, category: Category) {
        self.categories.insert(category.id.clone(), category);
    }

    pub fn add_indicator(&mut self, indicator: Indicator) {
        self.indicators.insert(indicator.id.clone(), indicator);
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let registry: Self = serde_json::from_str(json)?;
        for company in registry.companies.values() {
            validate_category_levels(company.category_levels)?;
        }
        Ok(registry)
    }
}

impl EntityRegistry for InMemoryRegistry {
    fn get_category(&self, id: &str) -> Option<Category> {
        self.categories.get(id).cloned()
    }

    fn get_indicator(&self, id: &str) -> Option<Indicator> {
        self.indicators.get(id).cloned()
    }

    fn get_company(&self, id: &str) -> Option<Company> {
        self.companies.get(id).cloned()
    }
}
