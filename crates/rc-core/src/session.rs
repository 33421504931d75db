//! Session lifecycle and host event entry points
//!
//! A [`Session`] owns everything the engine mutates: the compiled filters,
//! the pending marks and the tab records. `start` installs a rule set,
//! `stop` tears it down; both leave no pending marks or records behind.
//!
//! While stopped, every event entry point is a no-op and requests are allowed.

use crate::controller::RequestController;
use crate::filter::{compile, Filter, FilterRegistration};
use crate::host::Host;
use crate::options::{index_rules, Options};
use crate::records::TabRecordStore;
use crate::types::{Decision, NavigationDetails, RequestDetails, Rule, TabId, TabRecord};

pub struct Session<H: Host> {
    host: H,
    filters: Vec<Filter>,
    controller: RequestController,
    records: TabRecordStore,
    running: bool,
}

impl<H: Host> Session<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            filters: Vec::new(),
            controller: RequestController::new(),
            records: TabRecordStore::new(),
            running: false,
        }
    }

    /// Compile and install the active rules. Rules that fail to compile are
    /// reported to the host and skipped. Returns the number of filters.
    pub fn start(&mut self, rules: &[Rule]) -> usize {
        self.teardown();

        for rule in index_rules(rules).iter().filter(|rule| rule.active) {
            match compile(rule) {
                Ok(filters) => self.filters.extend(filters),
                Err(err) => {
                    log::warn!("Rule '{}' failed to activate: {}", rule.id, err);
                    self.host.rule_error(rule, &err);
                }
            }
        }

        self.running = true;
        self.host.enabled_state();
        log::debug!("Session started with {} filter(s)", self.filters.len());
        self.filters.len()
    }

    /// Remove all filters and forget pending marks and tab records.
    pub fn stop(&mut self) {
        self.teardown();
        self.host.disabled_state();
        log::debug!("Session stopped");
    }

    /// React to an option store change: rebuild from scratch, or stay
    /// stopped when disabled.
    pub fn apply_options(&mut self, options: &Options) {
        if options.disabled {
            self.stop();
        } else {
            self.start(&options.rules);
        }
    }

    fn teardown(&mut self) {
        self.filters.clear();
        self.controller.clear();
        self.records.clear();
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Listener registrations, one per filter, in filter order.
    pub fn registrations(&self) -> Vec<FilterRegistration> {
        self.filters.iter().map(Filter::to_registration).collect()
    }

    /// Non-blocking listener of filter `filter_index`. Returns whether the
    /// filter's rule was marked.
    pub fn mark(&mut self, filter_index: usize, request: &RequestDetails) -> bool {
        if !self.running {
            return false;
        }
        let filter = match self.filters.get(filter_index) {
            Some(filter) => filter,
            None => return false,
        };
        if !filter.matcher.test(request) {
            return false;
        }
        self.controller.mark(request, filter);
        true
    }

    /// The blocking listener.
    pub fn resolve(&mut self, request: &RequestDetails) -> Decision {
        if !self.running {
            return Decision::Allow;
        }
        self.controller.resolve(request, &mut self.records, &mut self.host)
    }

    /// Deliver `request` the way the host does: every filter whose
    /// registration covers it runs its listener, then the blocking listener
    /// resolves.
    pub fn dispatch(&mut self, request: &RequestDetails) -> Decision {
        if !self.running {
            return Decision::Allow;
        }
        for filter in &self.filters {
            if filter.covers(request) && filter.matcher.test(request) {
                self.controller.mark(request, filter);
            }
        }
        self.resolve(request)
    }

    /// Top-frame navigation commit: compact the tab's history and refresh
    /// its counter.
    pub fn on_navigation_committed(&mut self, details: &NavigationDetails) {
        if !self.running || details.frame_id != 0 || !self.records.has(details.tab_id) {
            return;
        }

        let kept = self.records.compact_on_navigation(
            details.tab_id,
            &details.url,
            details.is_server_redirect(),
        );
        match kept.last() {
            Some(last) => self.host.notify(details.tab_id, last.action, kept.len()),
            None => self.host.clear(details.tab_id),
        }
    }

    pub fn on_tab_removed(&mut self, tab_id: TabId) {
        self.records.remove_tab_records(tab_id);
    }

    pub fn tab_records(&self, tab_id: TabId) -> &[TabRecord] {
        self.records.get(tab_id)
    }

    pub fn records(&self) -> &TabRecordStore {
        &self.records
    }

    pub fn pending_count(&self) -> usize {
        self.controller.pending_count()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }
}
