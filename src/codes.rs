//! Short display codes for new account lines.
//!
//! Codes are a presentation aid: they are computed once from the sibling count
//! at insertion time and never rewritten, so gaps and repeats after deletions
//! are expected.

use crate::config::CodePrefixes;
use crate::schema::{AccountPayload, EntryType};

/// Letter used for a root line of the given payload.
///
/// Category roots without a resolved entry type fall back to the revenue
/// prefix.
pub fn root_prefix(prefixes: &CodePrefixes, payload: &AccountPayload) -> char {
    match payload {
        AccountPayload::Category { entry_type, .. } => match entry_type {
            Some(EntryType::Expense) => prefixes.expense,
            Some(EntryType::Revenue) | None => prefixes.revenue,
        },
        AccountPayload::Indicator { .. } => prefixes.indicator,
        AccountPayload::Total { .. } => prefixes.total,
        AccountPayload::Flex { .. } => prefixes.flex,
    }
}

pub fn zero_padded(value: usize, width: usize) -> String {
    format!("{:0width$}", value, width = width)
}

/// Code for a new root line.
///
/// `sibling_count` is the number of existing roots carrying the same
/// `prefix`, not all roots of the company, so revenue and expense lines
/// number independently (`R01`, `D01`, `R02`). Child codes count every
/// sibling.
pub fn root_code(prefix: char, sibling_count: usize, width: usize) -> String {
    format!("{}{}", prefix, zero_padded(sibling_count + 1, width))
}

pub fn child_code(parent_code: &str, sibling_count: usize, width: usize) -> String {
    format!("{}.{}", parent_code, zero_padded(sibling_count + 1, width))
}

/// Whether `code` is a root code carrying `prefix`, used to count same-prefix
/// root siblings.
pub fn has_root_prefix(code: &str, prefix: char) -> bool {
    code.starts_with(prefix) && !code.contains('.')
}
