use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodePrefixes {
    #[serde(default = "default_revenue_prefix")]
    #[schemars(description = "Prefix for root Category lines whose categories are revenue (e.g. 'R' gives R01, R02)")]
    pub revenue: char,

    #[serde(default = "default_expense_prefix")]
    #[schemars(description = "Prefix for root Category lines whose categories are expenses")]
    pub expense: char,

    #[serde(default = "default_indicator_prefix")]
    pub indicator: char,

    #[serde(default = "default_total_prefix")]
    pub total: char,

    #[serde(default = "default_flex_prefix")]
    pub flex: char,
}

fn default_revenue_prefix() -> char {
    'R'
}

fn default_expense_prefix() -> char {
    'D'
}

fn default_indicator_prefix() -> char {
    'I'
}

fn default_total_prefix() -> char {
    'T'
}

fn default_flex_prefix() -> char {
    'F'
}

impl Default for CodePrefixes {
    fn default() -> Self {
        Self {
            revenue: default_revenue_prefix(),
            expense: default_expense_prefix(),
            indicator: default_indicator_prefix(),
            total: default_total_prefix(),
            flex: default_flex_prefix(),
        }
    }
}

/// Settings shared by every tenant handled by a [`crate::TreeEngine`].
///
/// Tree depth is per company and comes from the registry, not from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub code_prefixes: CodePrefixes,

    #[serde(default = "default_code_width")]
    #[schemars(description = "Zero-padded width of each generated code segment. Defaults to 2 (R01, R01.01).")]
    pub code_width: usize,
}

fn default_code_width() -> usize {
    2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            code_prefixes: CodePrefixes::default(),
            code_width: default_code_width(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(EngineConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        let schema = Self::generate_json_schema();
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}
