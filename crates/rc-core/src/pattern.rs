//! Host-permission style URL match patterns
//!
//! A pattern is `<all_urls>` or `<scheme>://<host><path>`:
//!
//! - scheme: `*` (http, https, ws, wss), or one of `http`, `https`, `ws`,
//!   `wss`, `ftp`, `file`
//! - host: `*`, `*.<name>` (name and its subdomains), an exact name, or a name
//!   ending in `.*` to match any top-level domain. `file` patterns have an
//!   empty host.
//! - path: starts with `/`; `*` matches any run of characters. It is tested
//!   against the URL's path and query.
//!
//! Top-level-domain wildcards cannot be handed to the host as-is; see
//! [`MatchPattern::registration`].

use std::fmt;

use crate::types::SchemeMask;
use crate::url::{extract_host, extract_scheme, path_and_query, scheme_from_name};

pub const ALL_URLS: &str = "<all_urls>";

/// Error type for pattern parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    Empty,
    #[error("Missing scheme separator in '{0}'")]
    MissingSchemeSeparator(String),
    #[error("Unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("Invalid host '{0}'")]
    InvalidHost(String),
    #[error("Missing path in '{0}'")]
    MissingPath(String),
}

/// Host part of a match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `*`
    Any,
    /// `example.com`
    Exact(String),
    /// `*.example.com`
    Subdomains(String),
    /// `example.*` or `*.example.*`
    AnyTld { name: String, subdomains: bool },
}

impl HostPattern {
    fn parse(host: &str) -> Option<Self> {
        if host == "*" {
            return Some(Self::Any);
        }

        let (subdomains, rest) = match host.strip_prefix("*.") {
            Some(rest) => (true, rest),
            None => (false, host),
        };
        let (any_tld, name) = match rest.strip_suffix(".*") {
            Some(name) => (true, name),
            None => (false, rest),
        };

        let name = normalize_host_name(name)?;
        Some(match (subdomains, any_tld) {
            (_, true) => Self::AnyTld { name, subdomains },
            (true, false) => Self::Subdomains(name),
            (false, false) => Self::Exact(name),
        })
    }

    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(name) => host.eq_ignore_ascii_case(name),
            Self::Subdomains(name) => host.eq_ignore_ascii_case(name) || has_label_suffix(host, name),
            Self::AnyTld { name, subdomains } => {
                if label_prefix_with_tld(host, name) {
                    return true;
                }
                if !subdomains {
                    return false;
                }
                host.bytes()
                    .enumerate()
                    .filter(|&(_, b)| b == b'.')
                    .any(|(i, _)| label_prefix_with_tld(&host[i + 1..], name))
            }
        }
    }
}

fn normalize_host_name(name: &str) -> Option<String> {
    if name.is_empty() || name.starts_with('.') || name.ends_with('.') {
        return None;
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return None;
    }
    Some(name.to_ascii_lowercase())
}

/// `host` is `<something>.<name>`.
#[inline]
fn has_label_suffix(host: &str, name: &str) -> bool {
    host.len() > name.len()
        && host.as_bytes()[host.len() - name.len() - 1] == b'.'
        && host[host.len() - name.len()..].eq_ignore_ascii_case(name)
}

/// `host` is `<name>.<tld>` with a non-empty tld.
#[inline]
fn label_prefix_with_tld(host: &str, name: &str) -> bool {
    host.len() > name.len() + 1
        && host.as_bytes()[name.len()] == b'.'
        && host[..name.len()].eq_ignore_ascii_case(name)
        && !host.ends_with('.')
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternKind {
    AllUrls,
    Parts {
        scheme: String,
        schemes: SchemeMask,
        host: HostPattern,
        path: String,
    },
}

/// A parsed match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    source: String,
    kind: PatternKind,
}

impl MatchPattern {
    /// Parse a host-permission style pattern.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        if pattern == ALL_URLS {
            return Ok(Self {
                source: pattern.to_string(),
                kind: PatternKind::AllUrls,
            });
        }

        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| PatternError::MissingSchemeSeparator(pattern.to_string()))?;

        let schemes = scheme_from_name(scheme)
            .ok_or_else(|| PatternError::UnsupportedScheme(scheme.to_string()))?;

        let slash = rest
            .find('/')
            .ok_or_else(|| PatternError::MissingPath(pattern.to_string()))?;
        let (host_part, path) = rest.split_at(slash);

        let host = if schemes == SchemeMask::FILE {
            if !host_part.is_empty() {
                return Err(PatternError::InvalidHost(host_part.to_string()));
            }
            HostPattern::Any
        } else {
            HostPattern::parse(host_part)
                .ok_or_else(|| PatternError::InvalidHost(host_part.to_string()))?
        };

        Ok(Self {
            source: pattern.to_string(),
            kind: PatternKind::Parts {
                scheme: scheme.to_string(),
                schemes,
                host,
                path: path.to_string(),
            },
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the host can register this pattern verbatim.
    pub fn is_native(&self) -> bool {
        !matches!(
            self.kind,
            PatternKind::Parts { host: HostPattern::AnyTld { .. }, .. }
        )
    }

    /// Pattern to hand to the host's listener registration. Top-level-domain
    /// wildcards widen to any host; the matcher narrows them again.
    pub fn registration(&self) -> String {
        match &self.kind {
            PatternKind::Parts {
                scheme,
                host: HostPattern::AnyTld { .. },
                path,
                ..
            } => format!("{}://*{}", scheme, path),
            _ => self.source.clone(),
        }
    }

    /// Test a URL against the pattern.
    pub fn test(&self, url: &str) -> bool {
        let scheme = match extract_scheme(url) {
            Some(scheme) => scheme,
            None => return false,
        };

        match &self.kind {
            PatternKind::AllUrls => SchemeMask::ALL_URLS.contains(scheme),
            PatternKind::Parts { schemes, host, path, .. } => {
                if !schemes.contains(scheme) {
                    return false;
                }
                let url_host = extract_host(url).unwrap_or("");
                if scheme != SchemeMask::FILE && !host.matches(url_host) {
                    return false;
                }
                glob_match(path.as_bytes(), path_and_query(url).as_bytes())
            }
        }
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Glob match where `*` matches any run of bytes (including none).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_t = 0usize;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some(sp) = star {
            // Backtrack: let the last star swallow one more byte
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
