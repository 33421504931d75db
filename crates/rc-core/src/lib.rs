//! Request Control Core Library
//!
//! This crate holds the decision engine behind Request Control: user rules are
//! compiled into host-registrable filters, matching rules are marked against
//! in-flight requests, and a single blocking pass resolves each request into
//! one decision.
//!
//! # Architecture
//!
//! The host calls one non-blocking listener per filter before it calls the
//! blocking listener, for the same request. Listeners only mark; resolution
//! picks the governing rule by kind precedence and declaration order, so the
//! outcome does not depend on the order listeners ran in. Every applied action
//! is appended to the tab's history, which is compacted when a top-frame
//! navigation commits.
//!
//! # Modules
//!
//! - `types`: Rules, request details, decisions and tab records
//! - `pattern`: Match pattern parsing and testing
//! - `target`: Redirect target templates and scheme upgrades
//! - `filter`: Rule to filter compilation
//! - `controller`: Mark/resolve protocol
//! - `records`: Per-tab record store and navigation compaction
//! - `host`: Side effects requested of the embedding environment
//! - `options`: Option store contents
//! - `session`: Lifecycle and event entry points
//! - `url`: Allocation-free URL slicing helpers

pub mod controller;
pub mod filter;
pub mod host;
pub mod options;
pub mod pattern;
pub mod records;
pub mod session;
pub mod target;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use controller::RequestController;
pub use filter::{compile, CompileError, Filter, FilterRegistration, RuleMatcher};
pub use host::{Host, HostEvent, NoopHost, RecordingHost};
pub use options::{Options, OptionsError};
pub use pattern::{MatchPattern, PatternError};
pub use records::TabRecordStore;
pub use session::Session;
pub use types::{
    Decision, NavigationDetails, RequestDetails, ResourceType, Rule, RuleKind, TabId, TabRecord,
};
