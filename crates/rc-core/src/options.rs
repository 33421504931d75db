//! Option store contents
//!
//! The option store owns the rules and the disabled flag; the engine reads a
//! snapshot of them whenever they change.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::Rule;

/// Error type for option parsing.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Invalid options JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub disabled: bool,
}

impl Options {
    pub fn from_json(text: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, OptionsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Freeze rules in declaration order, stamping each with its index.
pub fn index_rules(rules: &[Rule]) -> Vec<Arc<Rule>> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let mut rule = rule.clone();
            rule.priority = index;
            Arc::new(rule)
        })
        .collect()
}
