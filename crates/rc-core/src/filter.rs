//! Rule to filter compilation
//!
//! A filter is what the host registers a non-blocking listener for: a set of
//! URL patterns, a resource type mask and an incognito scope. The host does a
//! coarse match on those; the filter's [`RuleMatcher`] then gives the exact
//! answer before the rule is marked against the request.

use std::sync::Arc;

use serde::Serialize;

use crate::pattern::{MatchPattern, PatternError};
use crate::target::{TargetError, TargetTemplate};
use crate::types::{IncognitoScope, RequestDetails, ResourceType, Rule};

/// Error type for rule compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Rule '{rule_id}' has no URL patterns")]
    NoPatterns { rule_id: String },
    #[error("Rule '{rule_id}': {source}")]
    Pattern { rule_id: String, source: PatternError },
    #[error("Rule '{rule_id}' requires a redirect target")]
    MissingTarget { rule_id: String },
    #[error("Rule '{rule_id}': {source}")]
    Target { rule_id: String, source: TargetError },
    #[error("Rule '{rule_id}' has unknown resource type '{name}'")]
    UnknownResourceType { rule_id: String, name: String },
}

/// Exact match predicate for one filter.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    patterns: Vec<MatchPattern>,
    resource_types: ResourceType,
    incognito: IncognitoScope,
}

impl RuleMatcher {
    /// Pure function of the request's URL, type and incognito flag.
    pub fn test(&self, request: &RequestDetails) -> bool {
        self.resource_types.admits(request.resource_type)
            && self.incognito.admits(request.incognito)
            && self.patterns.iter().any(|p| p.test(&request.url))
    }

    pub fn patterns(&self) -> &[MatchPattern] {
        &self.patterns
    }
}

/// Host-registrable compiled form of a rule.
#[derive(Debug, Clone)]
pub struct Filter {
    pub rule: Arc<Rule>,
    pub matcher: RuleMatcher,
    /// What the host is asked to listen for.
    pub registration: Vec<MatchPattern>,
    pub resource_types: ResourceType,
    pub incognito: IncognitoScope,
    /// Parsed redirect target, shared by every filter of the rule.
    pub target: Option<Arc<TargetTemplate>>,
}

/// Listener registration as the host API expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterRegistration {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incognito: Option<bool>,
}

impl Filter {
    pub fn url_patterns(&self) -> Vec<String> {
        self.registration.iter().map(|p| p.as_str().to_string()).collect()
    }

    pub fn to_registration(&self) -> FilterRegistration {
        FilterRegistration {
            urls: self.url_patterns(),
            types: if self.resource_types.is_empty() {
                None
            } else {
                Some(self.resource_types.names())
            },
            incognito: self.incognito.as_filter(),
        }
    }

    /// Whether the host would deliver `request` to this filter's listener.
    pub fn covers(&self, request: &RequestDetails) -> bool {
        self.resource_types.admits(request.resource_type)
            && self.incognito.admits(request.incognito)
            && self.registration.iter().any(|p| p.test(&request.url))
    }
}

/// Compile a rule into its filters.
///
/// Patterns the host can register natively share one filter. Top-level-domain
/// wildcards go into a second filter registered under widened patterns, whose
/// matcher only tests those wildcard patterns.
pub fn compile(rule: &Arc<Rule>) -> Result<Vec<Filter>, CompileError> {
    if rule.url_patterns.is_empty() {
        return Err(CompileError::NoPatterns { rule_id: rule.id.clone() });
    }

    let target = if rule.kind.info().needs_target {
        let template = rule
            .target
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CompileError::MissingTarget { rule_id: rule.id.clone() })?;
        let template = TargetTemplate::parse(template).map_err(|source| CompileError::Target {
            rule_id: rule.id.clone(),
            source,
        })?;
        Some(Arc::new(template))
    } else {
        None
    };

    let mut resource_types = ResourceType::empty();
    for name in &rule.resource_types {
        resource_types |= ResourceType::from_browser_name(name).ok_or_else(|| {
            CompileError::UnknownResourceType {
                rule_id: rule.id.clone(),
                name: name.clone(),
            }
        })?;
    }

    let mut native = Vec::new();
    let mut widened = Vec::new();
    for raw in &rule.url_patterns {
        let pattern = MatchPattern::parse(raw).map_err(|source| CompileError::Pattern {
            rule_id: rule.id.clone(),
            source,
        })?;
        if pattern.is_native() {
            native.push(pattern);
        } else {
            widened.push(pattern);
        }
    }

    let mut filters = Vec::with_capacity(2);
    if !native.is_empty() {
        filters.push(Filter {
            rule: Arc::clone(rule),
            registration: native.clone(),
            matcher: matcher_for(rule, native, resource_types),
            resource_types,
            incognito: rule.incognito,
            target: target.clone(),
        });
    }
    if !widened.is_empty() {
        let mut registration: Vec<MatchPattern> = Vec::with_capacity(widened.len());
        for pattern in &widened {
            let wide = MatchPattern::parse(&pattern.registration()).map_err(|source| {
                CompileError::Pattern {
                    rule_id: rule.id.clone(),
                    source,
                }
            })?;
            if !registration.contains(&wide) {
                registration.push(wide);
            }
        }
        filters.push(Filter {
            rule: Arc::clone(rule),
            registration,
            matcher: matcher_for(rule, widened, resource_types),
            resource_types,
            incognito: rule.incognito,
            target,
        });
    }

    log::debug!("Compiled rule '{}' into {} filter(s)", rule.id, filters.len());
    Ok(filters)
}

fn matcher_for(rule: &Rule, patterns: Vec<MatchPattern>, resource_types: ResourceType) -> RuleMatcher {
    RuleMatcher {
        patterns,
        resource_types,
        incognito: rule.incognito,
    }
}
