//! Core type definitions for Request Control
//!
//! Rules are owned by the option store and only read here. Everything the
//! engine derives from them (filters, pending marks, tab records) refers back
//! to the rule through an `Arc<Rule>`.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Browser tab identifier. Requests that do not belong to a tab carry `-1`.
pub type TabId = i32;

/// Host-assigned identifier of an in-flight request.
pub type RequestId = String;

// =============================================================================
// Rule Kinds
// =============================================================================

/// Action class of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RuleKind {
    /// Cancel the request
    Block = 0,
    /// Let the request through untouched, overriding redirects
    Whitelist = 1,
    /// Redirect to the rule's target
    Redirect = 2,
    /// Upgrade http/ws requests to https/wss
    Secure = 3,
}

/// Shape of the blocking response a kind produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionShape {
    Cancel,
    Redirect,
    Allow,
}

/// Static per-kind metadata.
#[derive(Debug)]
pub struct KindInfo {
    /// Lower wins when several kinds are marked against one request. Kinds
    /// sharing a value fall back to declaration order.
    pub precedence: u8,
    /// Icon class handed to the badge subsystem.
    pub icon: &'static str,
    pub decision: DecisionShape,
    /// Whether a rule of this kind needs a `target`.
    pub needs_target: bool,
}

// Indexed by `RuleKind as usize`.
static KIND_TABLE: [KindInfo; 4] = [
    KindInfo { precedence: 0, icon: "block", decision: DecisionShape::Cancel, needs_target: false },
    KindInfo { precedence: 1, icon: "whitelist", decision: DecisionShape::Allow, needs_target: false },
    KindInfo { precedence: 1, icon: "redirect", decision: DecisionShape::Redirect, needs_target: true },
    KindInfo { precedence: 1, icon: "secure", decision: DecisionShape::Redirect, needs_target: false },
];

impl RuleKind {
    #[inline]
    pub fn info(self) -> &'static KindInfo {
        &KIND_TABLE[self as usize]
    }

    #[inline]
    pub fn precedence(self) -> u8 {
        self.info().precedence
    }

    #[inline]
    pub fn icon(self) -> &'static str {
        self.info().icon
    }

    #[inline]
    pub fn decision_shape(self) -> DecisionShape {
        self.info().decision
    }
}

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask. An empty mask on a rule means "all types".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUB_FRAME = 1 << 5;
        const MAIN_FRAME = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const IMAGESET = 1 << 14;
        const SPECULATIVE = 1 << 15;

        const ALL = 0xFFFF;
        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

const RESOURCE_TYPE_NAMES: [(ResourceType, &str); 16] = [
    (ResourceType::OTHER, "other"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::FONT, "font"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::PING, "ping"),
    (ResourceType::CSP_REPORT, "csp_report"),
    (ResourceType::BEACON, "beacon"),
    (ResourceType::IMAGESET, "imageset"),
    (ResourceType::SPECULATIVE, "speculative"),
];

impl ResourceType {
    /// Parse a browser resource type name. Unknown names give `None`.
    pub fn from_browser_name(s: &str) -> Option<Self> {
        Some(match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUB_FRAME,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "imageset" => Self::IMAGESET,
            "font" => Self::FONT,
            "object" | "object_subrequest" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            "speculative" => Self::SPECULATIVE,
            "other" => Self::OTHER,
            _ => return None,
        })
    }

    /// Browser names of every type in the mask, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }

    /// True if `self` is empty (any type) or shares a bit with `other`.
    #[inline]
    pub fn admits(self, other: ResourceType) -> bool {
        self.is_empty() || self.intersects(other)
    }
}

impl Default for ResourceType {
    fn default() -> Self {
        Self::empty()
    }
}

// A single type serializes as its name, a mask as a list of names. Names the
// host reports that are not known here read as `OTHER`.
impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        if names.len() == 1 {
            serializer.serialize_str(names[0])
        } else {
            names.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TypeVisitor;

        impl<'de> Visitor<'de> for TypeVisitor {
            type Value = ResourceType;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a resource type name or a list of them")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(ResourceType::from_browser_name(v).unwrap_or(ResourceType::OTHER))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut mask = ResourceType::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    mask |= ResourceType::from_browser_name(&name).unwrap_or(ResourceType::OTHER);
                }
                Ok(mask)
            }
        }

        deserializer.deserialize_any(TypeVisitor)
    }
}

// =============================================================================
// Scheme Masks
// =============================================================================

bitflags::bitflags! {
    /// URL scheme mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SchemeMask: u8 {
        const HTTP = 1 << 0;
        const HTTPS = 1 << 1;
        const WS = 1 << 2;
        const WSS = 1 << 3;
        const DATA = 1 << 4;
        const FTP = 1 << 5;
        const FILE = 1 << 6;
        /// What a `*` scheme in a match pattern stands for
        const WEB = Self::HTTP.bits() | Self::HTTPS.bits() | Self::WS.bits() | Self::WSS.bits();
        /// What `<all_urls>` stands for
        const ALL_URLS = Self::WEB.bits() | Self::FTP.bits() | Self::FILE.bits();
    }
}

// =============================================================================
// Incognito Scope
// =============================================================================

/// Which browsing contexts a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncognitoScope {
    #[default]
    Any,
    Only,
    Never,
}

impl IncognitoScope {
    #[inline]
    pub fn admits(self, incognito: bool) -> bool {
        match self {
            Self::Any => true,
            Self::Only => incognito,
            Self::Never => !incognito,
        }
    }

    /// Value of the host listener's `incognito` filter key; `None` omits it.
    pub fn as_filter(self) -> Option<bool> {
        match self {
            Self::Any => None,
            Self::Only => Some(true),
            Self::Never => Some(false),
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A user-authored rule as stored in the options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(alias = "action")]
    pub kind: RuleKind,
    #[serde(rename = "urlPattern", alias = "urlPatterns", deserialize_with = "one_or_many")]
    pub url_patterns: Vec<String>,
    /// Browser resource type names; empty means every type.
    #[serde(default, alias = "types", deserialize_with = "one_or_many")]
    pub resource_types: Vec<String>,
    #[serde(default, alias = "incognitoScope")]
    pub incognito: IncognitoScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Declaration index, assigned when the rule set is loaded.
    #[serde(skip)]
    pub priority: usize,
}

fn default_active() -> bool {
    true
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(pattern) => vec![pattern],
        OneOrMany::Many(patterns) => patterns,
    })
}

impl Rule {
    /// Convenience constructor used by tests and tools.
    pub fn new(id: impl Into<String>, kind: RuleKind, pattern: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active: true,
            kind,
            url_patterns: vec![pattern.into()],
            resource_types: Vec::new(),
            incognito: IncognitoScope::Any,
            target: None,
            priority: 0,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_types(mut self, types: ResourceType) -> Self {
        self.resource_types = types.names().into_iter().map(String::from).collect();
        self
    }

    pub fn with_incognito(mut self, scope: IncognitoScope) -> Self {
        self.incognito = scope;
        self
    }
}

// =============================================================================
// Request / Navigation Details
// =============================================================================

/// Pre-request event details delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub request_id: RequestId,
    pub url: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default = "no_tab")]
    pub tab_id: TabId,
    #[serde(default)]
    pub frame_id: i32,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default, rename = "timeStamp")]
    pub timestamp: f64,
}

fn no_tab() -> TabId {
    -1
}

/// Navigation-commit event details delivered by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    pub tab_id: TabId,
    #[serde(default)]
    pub frame_id: i32,
    pub url: String,
    #[serde(default)]
    pub transition_qualifiers: Vec<String>,
}

impl NavigationDetails {
    pub fn is_server_redirect(&self) -> bool {
        self.transition_qualifiers.iter().any(|q| q == "server_redirect")
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Final decision for a request, returned from the blocking listener.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    /// No directive; the request proceeds unmodified
    #[default]
    Allow,
    /// `{ cancel: true }`
    Cancel,
    /// `{ redirectUrl }`
    Redirect(String),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            Self::Redirect(url) => Some(url),
            _ => None,
        }
    }
}

// Serializes to the blocking-response object the host understands.
impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Allow => serializer.serialize_map(Some(0))?.end(),
            Self::Cancel => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("cancel", &true)?;
                map.end()
            }
            Self::Redirect(url) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("redirectUrl", url)?;
                map.end()
            }
        }
    }
}

// =============================================================================
// Tab Record
// =============================================================================

/// One matched-action event in a tab's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
    pub action: RuleKind,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub url: String,
    pub target: Option<String>,
    pub timestamp: f64,
    pub rule: Arc<Rule>,
}
