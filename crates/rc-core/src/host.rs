//! Side effects the engine asks of its surroundings
//!
//! The badge subsystem, tab navigation and user-visible error signalling live
//! outside the engine. [`Host`] is the seam; calls are fire-and-forget.

use crate::filter::CompileError;
use crate::types::{Rule, RuleKind, TabId};

pub trait Host {
    /// A tab's visible history changed: `action` is the newest record's kind,
    /// `count` the tab's record count.
    fn notify(&mut self, tab_id: TabId, action: RuleKind, count: usize);

    /// A tab no longer has visible history.
    fn clear(&mut self, tab_id: TabId);

    /// Navigate a tab directly; used for redirects a blocking response
    /// cannot express.
    fn update_tab(&mut self, tab_id: TabId, url: &str);

    /// A rule failed to activate and contributes no filters.
    fn rule_error(&mut self, rule: &Rule, error: &CompileError);

    fn enabled_state(&mut self) {}

    fn disabled_state(&mut self) {}
}

/// Host that ignores every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl Host for NoopHost {
    fn notify(&mut self, _tab_id: TabId, _action: RuleKind, _count: usize) {}
    fn clear(&mut self, _tab_id: TabId) {}
    fn update_tab(&mut self, _tab_id: TabId, _url: &str) {}
    fn rule_error(&mut self, _rule: &Rule, _error: &CompileError) {}
}

/// A call made on a [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Notify { tab_id: TabId, action: RuleKind, count: usize },
    Clear { tab_id: TabId },
    UpdateTab { tab_id: TabId, url: String },
    RuleError { rule_id: String, message: String },
    Enabled,
    Disabled,
}

/// Host that keeps every call, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingHost {
    pub events: Vec<HostEvent>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the events recorded so far.
    pub fn drain(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Host for RecordingHost {
    fn notify(&mut self, tab_id: TabId, action: RuleKind, count: usize) {
        self.events.push(HostEvent::Notify { tab_id, action, count });
    }

    fn clear(&mut self, tab_id: TabId) {
        self.events.push(HostEvent::Clear { tab_id });
    }

    fn update_tab(&mut self, tab_id: TabId, url: &str) {
        self.events.push(HostEvent::UpdateTab { tab_id, url: url.to_string() });
    }

    fn rule_error(&mut self, rule: &Rule, error: &CompileError) {
        self.events.push(HostEvent::RuleError {
            rule_id: rule.id.clone(),
            message: error.to_string(),
        });
    }

    fn enabled_state(&mut self) {
        self.events.push(HostEvent::Enabled);
    }

    fn disabled_state(&mut self) {
        self.events.push(HostEvent::Disabled);
    }
}
