//! Mark/resolve request controller
//!
//! Rule listeners run first and only [`mark`](RequestController::mark) the
//! rules that matched a request. The single blocking listener then calls
//! [`resolve`](RequestController::resolve), which picks the governing rule,
//! produces the decision and logs it to the tab's history.
//!
//! Precedence: a marked block rule always wins. Otherwise the matching rule
//! declared first wins, whatever its kind. The order in which marks arrived
//! plays no part.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::filter::Filter;
use crate::host::Host;
use crate::records::TabRecordStore;
use crate::target::{is_same_document, upgrade_scheme, TargetError, TargetTemplate};
use crate::types::{
    Decision, DecisionShape, RequestDetails, RequestId, ResourceType, Rule, RuleKind, TabRecord,
};

/// Marks kept for requests that were never resolved before the oldest is
/// dropped.
pub const DEFAULT_PENDING_CAPACITY: usize = 1024;

/// A rule marked against a request, with the target compiled for it.
#[derive(Debug, Clone)]
pub struct Mark {
    pub rule: Arc<Rule>,
    pub target: Option<Arc<TargetTemplate>>,
}

/// Rules marked against one in-flight request.
#[derive(Debug, Default, Clone)]
pub struct PendingRequest {
    matched: Vec<Mark>,
}

impl PendingRequest {
    pub fn matched(&self) -> &[Mark] {
        &self.matched
    }

    fn mark(&mut self, filter: &Filter) {
        // A rule split into several filters may match twice
        if !self.matched.iter().any(|m| Arc::ptr_eq(&m.rule, &filter.rule)) {
            self.matched.push(Mark {
                rule: Arc::clone(&filter.rule),
                target: filter.target.clone(),
            });
        }
    }

    /// The mark whose action applies.
    pub fn governing(&self) -> Option<&Mark> {
        self.matched
            .iter()
            .min_by_key(|mark| (mark.rule.kind.precedence(), mark.rule.priority))
    }
}

/// Owner of all pending-request state.
#[derive(Debug)]
pub struct RequestController {
    requests: HashMap<RequestId, PendingRequest>,
    // Insertion order of request ids, oldest first. May hold ids that were
    // already resolved; those are skipped on eviction.
    order: VecDeque<RequestId>,
    capacity: usize,
}

impl Default for RequestController {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestController {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PENDING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            requests: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Record that the rule behind `filter` matched `request`.
    pub fn mark(&mut self, request: &RequestDetails, filter: &Filter) {
        if !self.requests.contains_key(&request.request_id) {
            self.make_room();
            self.order.push_back(request.request_id.clone());
        }
        self.requests
            .entry(request.request_id.clone())
            .or_default()
            .mark(filter);
        log::debug!("Marked rule '{}' for request {}", filter.rule.id, request.request_id);
    }

    /// Decide what happens to `request` and forget its marks.
    pub fn resolve<H: Host + ?Sized>(
        &mut self,
        request: &RequestDetails,
        records: &mut TabRecordStore,
        host: &mut H,
    ) -> Decision {
        let pending = match self.requests.remove(&request.request_id) {
            Some(pending) => pending,
            None => return Decision::Allow,
        };
        let (rule, template) = match pending.governing() {
            Some(mark) => (&mark.rule, mark.target.as_deref()),
            None => return Decision::Allow,
        };

        let (decision, target) = match rule.kind.decision_shape() {
            DecisionShape::Cancel => (Decision::Cancel, None),
            DecisionShape::Allow => (Decision::Allow, None),
            DecisionShape::Redirect => match redirect_target(rule.kind, template, &request.url) {
                Ok(Some(target)) if target != request.url => {
                    if request.resource_type == ResourceType::MAIN_FRAME
                        && is_same_document(&request.url, &target)
                    {
                        // A blocking redirect cannot change only the fragment
                        host.update_tab(request.tab_id, &target);
                        (Decision::Allow, Some(target))
                    } else {
                        (Decision::Redirect(target.clone()), Some(target))
                    }
                }
                Ok(_) => return Decision::Allow,
                Err(err) => {
                    log::warn!(
                        "Rule '{}' produced no usable target for {}: {}",
                        rule.id,
                        request.url,
                        err
                    );
                    return Decision::Allow;
                }
            },
        };

        log::debug!(
            "Resolved request {} by rule '{}': {:?}",
            request.request_id,
            rule.id,
            decision
        );

        if request.tab_id >= 0 {
            let count = records.add(
                request.tab_id,
                TabRecord {
                    action: rule.kind,
                    resource_type: request.resource_type,
                    url: request.url.clone(),
                    target,
                    timestamp: request.timestamp,
                    rule: Arc::clone(rule),
                },
            );
            host.notify(request.tab_id, rule.kind, count);
        }

        decision
    }

    pub fn pending(&self, request_id: &str) -> Option<&PendingRequest> {
        self.requests.get(request_id)
    }

    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// Forget every mark. Used when the listener set is rebuilt.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.order.clear();
    }

    fn make_room(&mut self) {
        while self.requests.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    if self.requests.remove(&oldest).is_some() {
                        log::debug!("Dropped unresolved marks for request {}", oldest);
                    }
                }
                None => break,
            }
        }
        if self.order.len() > self.capacity * 2 {
            let requests = &self.requests;
            self.order.retain(|id| requests.contains_key(id));
        }
    }
}

fn redirect_target(
    kind: RuleKind,
    template: Option<&TargetTemplate>,
    url: &str,
) -> Result<Option<String>, TargetError> {
    match kind {
        RuleKind::Secure => upgrade_scheme(url),
        _ => template.map(|t| t.resolve(url)).transpose(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::compile;
    use crate::host::{HostEvent, RecordingHost};

    fn request(id: &str, url: &str) -> RequestDetails {
        RequestDetails {
            request_id: id.into(),
            url: url.into(),
            resource_type: ResourceType::SCRIPT,
            tab_id: 1,
            frame_id: 0,
            incognito: false,
            timestamp: 10.0,
        }
    }

    fn filter_of(rule: Rule) -> Filter {
        compile(&Arc::new(rule)).expect("rule should compile").remove(0)
    }

    fn filter(id: &str, kind: RuleKind, priority: usize) -> Filter {
        let mut rule = Rule::new(id, kind, "*://*/*");
        if kind == RuleKind::Redirect {
            rule.target = Some(format!("https://{}.invalid/", id));
        }
        rule.priority = priority;
        filter_of(rule)
    }

    #[test]
    fn unmarked_request_is_allowed() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert!(records.is_empty());
        assert!(host.events.is_empty());
    }

    #[test]
    fn block_wins_regardless_of_order() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let redirect = filter("redirect", RuleKind::Redirect, 0);
        let block = filter("block", RuleKind::Block, 1);
        let req = request("1", "https://a.test/");
        controller.mark(&req, &redirect);
        controller.mark(&req, &block);

        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Cancel);
        assert_eq!(records.get(1)[0].action, RuleKind::Block);
    }

    #[test]
    fn earliest_declared_wins_within_kind() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let late = filter("late", RuleKind::Redirect, 5);
        let early = filter("early", RuleKind::Redirect, 2);
        let req = request("1", "https://a.test/");
        controller.mark(&req, &late);
        controller.mark(&req, &early);

        assert_eq!(
            controller.resolve(&req, &mut records, &mut host),
            Decision::Redirect("https://early.invalid/".into())
        );
    }

    #[test]
    fn earlier_redirect_beats_later_whitelist() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter("whitelist", RuleKind::Whitelist, 1));
        controller.mark(&req, &filter("r", RuleKind::Redirect, 0));

        assert_eq!(
            controller.resolve(&req, &mut records, &mut host),
            Decision::Redirect("https://r.invalid/".into())
        );
        assert_eq!(records.get(1)[0].action, RuleKind::Redirect);
    }

    #[test]
    fn earlier_whitelist_beats_later_redirect() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter("r", RuleKind::Redirect, 3));
        controller.mark(&req, &filter("whitelist", RuleKind::Whitelist, 2));

        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert_eq!(records.get(1)[0].action, RuleKind::Whitelist);
        assert_eq!(
            host.events,
            vec![HostEvent::Notify { tab_id: 1, action: RuleKind::Whitelist, count: 1 }]
        );
    }

    #[test]
    fn later_block_beats_earlier_whitelist() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter("whitelist", RuleKind::Whitelist, 0));
        controller.mark(&req, &filter("block", RuleKind::Block, 7));

        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Cancel);
    }

    #[test]
    fn resolve_consumes_marks() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter("block", RuleKind::Block, 0));
        assert_eq!(controller.pending_count(), 1);
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Cancel);
        assert!(controller.pending("1").is_none());
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert_eq!(records.count(1), 1);
    }

    #[test]
    fn duplicate_marks_collapse() {
        let mut controller = RequestController::new();
        let req = request("1", "https://a.test/");
        let block = filter("block", RuleKind::Block, 0);
        controller.mark(&req, &block);
        controller.mark(&req, &block);
        assert_eq!(controller.pending("1").map(|p| p.matched().len()), Some(1));
    }

    #[test]
    fn orphaned_marks_are_bounded() {
        let mut controller = RequestController::with_capacity(4);
        let block = filter("block", RuleKind::Block, 0);
        for i in 0..100 {
            controller.mark(&request(&i.to_string(), "https://a.test/"), &block);
        }
        assert_eq!(controller.pending_count(), 4);
        assert!(controller.pending("99").is_some());
        assert!(controller.pending("0").is_none());
        assert!(controller.order.len() <= 8);
    }

    #[test]
    fn bad_target_degrades_to_allow() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let mut broken = Rule::new("broken", RuleKind::Redirect, "*://*/*");
        broken.target = Some("http://[broken/".into());
        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter_of(broken));

        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert!(records.is_empty());
        assert!(controller.pending("1").is_none());
    }

    #[test]
    fn redirect_to_self_is_silent() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "https://a.test/");
        controller.mark(&req, &filter("secure", RuleKind::Secure, 0));
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert!(records.is_empty());
        assert!(host.events.is_empty());
    }

    #[test]
    fn secure_upgrades_http() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let req = request("1", "http://a.test/x");
        controller.mark(&req, &filter("secure", RuleKind::Secure, 0));
        assert_eq!(
            controller.resolve(&req, &mut records, &mut host),
            Decision::Redirect("https://a.test/x".into())
        );
        assert_eq!(records.get(1)[0].target.as_deref(), Some("https://a.test/x"));
    }

    #[test]
    fn same_document_redirect_updates_tab() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let mut anchor = Rule::new("anchor", RuleKind::Redirect, "*://*/*");
        anchor.target = Some("{href}#main".into());
        let mut req = request("1", "https://a.test/page");
        req.resource_type = ResourceType::MAIN_FRAME;
        controller.mark(&req, &filter_of(anchor));

        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Allow);
        assert_eq!(
            host.events,
            vec![
                HostEvent::UpdateTab { tab_id: 1, url: "https://a.test/page#main".into() },
                HostEvent::Notify { tab_id: 1, action: RuleKind::Redirect, count: 1 },
            ]
        );
    }

    #[test]
    fn requests_outside_tabs_are_not_recorded() {
        let mut controller = RequestController::new();
        let mut records = TabRecordStore::new();
        let mut host = RecordingHost::new();

        let mut req = request("1", "https://a.test/");
        req.tab_id = -1;
        controller.mark(&req, &filter("block", RuleKind::Block, 0));
        assert_eq!(controller.resolve(&req, &mut records, &mut host), Decision::Cancel);
        assert!(records.is_empty());
        assert!(host.events.is_empty());
    }
}
