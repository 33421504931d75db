//! Redirect target resolution
//!
//! A target is a URL template. Placeholders in braces are replaced with parts
//! of the request URL, then the result is resolved against the request URL,
//! so relative targets work too.
//!
//! | placeholder  | value for `https://a.test:8443/p?q=1#h` |
//! |--------------|------------------------------------------|
//! | `{href}`     | the whole URL                            |
//! | `{origin}`   | `https://a.test:8443`                    |
//! | `{protocol}` | `https:`                                 |
//! | `{host}`     | `a.test:8443`                            |
//! | `{hostname}` | `a.test`                                 |
//! | `{port}`     | `8443`                                   |
//! | `{pathname}` | `/p`                                     |
//! | `{search}`   | `?q=1`                                   |
//! | `{hash}`     | `#h`                                     |

use ::url::Url;

/// Error type for target templates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("Unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
    #[error("Unterminated placeholder in '{0}'")]
    Unterminated(String),
    #[error("Invalid request URL: {0}")]
    InvalidRequestUrl(::url::ParseError),
    #[error("Invalid target URL: {0}")]
    InvalidTarget(::url::ParseError),
}

const PLACEHOLDERS: [&str; 9] = [
    "href", "origin", "protocol", "host", "hostname", "port", "pathname", "search", "hash",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Placeholder(&'static str),
}

fn parse_parts(template: &str) -> Result<Vec<Part>, TargetError> {
    let mut parts = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            parts.push(Part::Literal(rest[..open].to_string()));
        }
        let close = rest[open..]
            .find('}')
            .ok_or_else(|| TargetError::Unterminated(template.to_string()))?;
        let name = &rest[open + 1..open + close];
        let placeholder = PLACEHOLDERS
            .iter()
            .find(|p| **p == name)
            .copied()
            .ok_or_else(|| TargetError::UnknownPlaceholder(name.to_string()))?;
        parts.push(Part::Placeholder(placeholder));
        rest = &rest[open + close + 1..];
    }

    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn placeholder_value(url: &Url, name: &str) -> String {
    match name {
        "href" => url.as_str().to_string(),
        "origin" => url.origin().ascii_serialization(),
        "protocol" => format!("{}:", url.scheme()),
        "host" => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        },
        "hostname" => url.host_str().unwrap_or("").to_string(),
        "port" => url.port().map(|p| p.to_string()).unwrap_or_default(),
        "pathname" => url.path().to_string(),
        "search" => url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        "hash" => url.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
        _ => String::new(),
    }
}

/// A parsed target template, ready to expand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTemplate {
    source: String,
    parts: Vec<Part>,
}

impl TargetTemplate {
    /// Check placeholder syntax and split the template once. URL validity is
    /// only known once the template is expanded against a request.
    pub fn parse(template: &str) -> Result<Self, TargetError> {
        Ok(Self {
            source: template.to_string(),
            parts: parse_parts(template)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Expand against `request_url` and return the absolute target.
    pub fn resolve(&self, request_url: &str) -> Result<String, TargetError> {
        let base = Url::parse(request_url).map_err(TargetError::InvalidRequestUrl)?;

        let mut expanded = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => expanded.push_str(text),
                Part::Placeholder(name) => expanded.push_str(&placeholder_value(&base, name)),
            }
        }

        let target = base.join(&expanded).map_err(TargetError::InvalidTarget)?;
        Ok(target.into())
    }
}

/// Secure upgrade of a request URL: `http` → `https`, `ws` → `wss`.
/// Returns `None` when the URL is already secure or has another scheme.
pub fn upgrade_scheme(request_url: &str) -> Result<Option<String>, TargetError> {
    let mut url = Url::parse(request_url).map_err(TargetError::InvalidRequestUrl)?;
    let secure = match url.scheme() {
        "http" => "https",
        "ws" => "wss",
        _ => return Ok(None),
    };
    if url.set_scheme(secure).is_err() {
        return Ok(None);
    }
    Ok(Some(url.into()))
}

/// Whether two URLs only differ in their fragment.
pub fn is_same_document(a: &str, b: &str) -> bool {
    crate::url::strip_fragment(a) == crate::url::strip_fragment(b)
}
