//! WebAssembly bindings for Request Control

use std::cell::RefCell;

use rc_core::{
    Decision, FilterRegistration, HostEvent, NavigationDetails, Options, RecordingHost,
    RequestDetails, ResourceType, RuleKind, Session,
};
use wasm_bindgen::prelude::*;

// ============================================================================
// Host callbacks
// ============================================================================

/// The callbacks object given to [`init`].
///
/// Every callback is optional; a missing one is skipped. Callbacks only run
/// once the session borrow is released, so they may call back into the
/// exported functions.
#[derive(Clone)]
struct Callbacks {
    notify: Option<js_sys::Function>,
    clear: Option<js_sys::Function>,
    update_tab: Option<js_sys::Function>,
    rule_error: Option<js_sys::Function>,
    enabled_state: Option<js_sys::Function>,
    disabled_state: Option<js_sys::Function>,
}

impl Callbacks {
    fn from_object(callbacks: &JsValue) -> Self {
        Self {
            notify: callback(callbacks, "notify"),
            clear: callback(callbacks, "clear"),
            update_tab: callback(callbacks, "updateTab"),
            rule_error: callback(callbacks, "ruleError"),
            enabled_state: callback(callbacks, "enabledState"),
            disabled_state: callback(callbacks, "disabledState"),
        }
    }

    fn deliver(&self, event: &HostEvent) {
        match event {
            HostEvent::Notify { tab_id, action, count } => {
                if let Some(f) = &self.notify {
                    let details = js_sys::Object::new();
                    let _ = js_sys::Reflect::set(&details, &"action".into(), &JsValue::from_str(kind_name(*action)));
                    let _ = js_sys::Reflect::set(&details, &"icon".into(), &JsValue::from_str(action.icon()));
                    let _ = js_sys::Reflect::set(&details, &"count".into(), &JsValue::from(*count as u32));
                    report(f.call2(&JsValue::NULL, &JsValue::from(*tab_id), &details), "notify");
                }
            }
            HostEvent::Clear { tab_id } => {
                if let Some(f) = &self.clear {
                    report(f.call1(&JsValue::NULL, &JsValue::from(*tab_id)), "clear");
                }
            }
            HostEvent::UpdateTab { tab_id, url } => {
                if let Some(f) = &self.update_tab {
                    report(
                        f.call2(&JsValue::NULL, &JsValue::from(*tab_id), &JsValue::from_str(url)),
                        "updateTab",
                    );
                }
            }
            HostEvent::RuleError { rule_id, message } => {
                if let Some(f) = &self.rule_error {
                    report(
                        f.call2(&JsValue::NULL, &JsValue::from_str(rule_id), &JsValue::from_str(message)),
                        "ruleError",
                    );
                }
            }
            HostEvent::Enabled => {
                if let Some(f) = &self.enabled_state {
                    report(f.call0(&JsValue::NULL), "enabledState");
                }
            }
            HostEvent::Disabled => {
                if let Some(f) = &self.disabled_state {
                    report(f.call0(&JsValue::NULL), "disabledState");
                }
            }
        }
    }
}

fn callback(callbacks: &JsValue, name: &str) -> Option<js_sys::Function> {
    js_sys::Reflect::get(callbacks, &name.into())
        .ok()
        .and_then(|value| value.dyn_into::<js_sys::Function>().ok())
}

fn report(result: Result<JsValue, JsValue>, name: &str) {
    if let Err(err) = result {
        log::error!("Host callback '{}' threw: {:?}", name, err);
    }
}

fn kind_name(kind: RuleKind) -> &'static str {
    match kind {
        RuleKind::Block => "block",
        RuleKind::Whitelist => "whitelist",
        RuleKind::Redirect => "redirect",
        RuleKind::Secure => "secure",
    }
}

// ============================================================================
// Console logging
// ============================================================================

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            _ => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

// ============================================================================
// Session state
// ============================================================================

thread_local! {
    static SESSION: RefCell<Option<Session<RecordingHost>>> = const { RefCell::new(None) };
    static CALLBACKS: RefCell<Option<Callbacks>> = const { RefCell::new(None) };
}

/// Run `f` against the session, then hand the host effects it queued to the
/// JS callbacks. A call arriving while the session is borrowed gets `default`.
fn with_session<T>(default: T, f: impl FnOnce(&mut Session<RecordingHost>) -> T) -> T {
    let (value, events) = SESSION.with(|cell| {
        let Ok(mut slot) = cell.try_borrow_mut() else {
            log::warn!("Session busy, ignoring re-entrant call");
            return (None, Vec::new());
        };
        match slot.as_mut() {
            Some(session) => {
                let value = f(session);
                (Some(value), session.host_mut().drain())
            }
            None => (None, Vec::new()),
        }
    });
    deliver(&events);
    value.unwrap_or(default)
}

fn deliver(events: &[HostEvent]) {
    if events.is_empty() {
        return;
    }
    // Cloned out so a callback may re-init
    let callbacks = CALLBACKS.with(|cell| cell.borrow().clone());
    if let Some(callbacks) = callbacks {
        for event in events {
            callbacks.deliver(event);
        }
    }
}

/// Install the host callbacks. Replaces any previous session; the new one
/// starts stopped until [`apply_options`] is called.
#[wasm_bindgen]
pub fn init(callbacks: JsValue, verbose: bool) {
    // Already set on re-init
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });

    CALLBACKS.with(|cell| *cell.borrow_mut() = Some(Callbacks::from_object(&callbacks)));
    SESSION.with(|cell| match cell.try_borrow_mut() {
        Ok(mut slot) => *slot = Some(Session::new(RecordingHost::new())),
        Err(_) => log::warn!("Session busy, init ignored"),
    });
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    SESSION.with(|cell| cell.try_borrow().map_or(true, |slot| slot.is_some()))
}

#[wasm_bindgen]
pub fn is_running() -> bool {
    with_session(false, |session| session.is_running())
}

/// Rebuild the engine from the option store contents and return the listener
/// registrations to install, one per filter index.
#[wasm_bindgen]
pub fn apply_options(options_json: &str) -> Result<JsValue, JsValue> {
    let options = Options::from_json(options_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to load options: {}", e)))?;

    with_session(None, |session| {
        session.apply_options(&options);
        Some(registrations_to_js(&session.registrations()))
    })
    .ok_or_else(|| JsValue::from_str("Not initialized. Call init() first."))
}

#[wasm_bindgen]
pub fn filter_registrations() -> JsValue {
    with_session(js_sys::Array::new().into(), |session| {
        registrations_to_js(&session.registrations())
    })
}

fn registrations_to_js(registrations: &[FilterRegistration]) -> JsValue {
    let result = js_sys::Array::new_with_length(registrations.len() as u32);
    for (i, registration) in registrations.iter().enumerate() {
        let filter = js_sys::Object::new();
        let urls = js_sys::Array::new();
        for url in &registration.urls {
            urls.push(&JsValue::from_str(url));
        }
        let _ = js_sys::Reflect::set(&filter, &"urls".into(), &urls);
        if let Some(types) = &registration.types {
            let list = js_sys::Array::new();
            for name in types {
                list.push(&JsValue::from_str(name));
            }
            let _ = js_sys::Reflect::set(&filter, &"types".into(), &list);
        }
        if let Some(incognito) = registration.incognito {
            let _ = js_sys::Reflect::set(&filter, &"incognito".into(), &JsValue::from(incognito));
        }
        result.set(i as u32, filter.into());
    }
    result.into()
}

// ============================================================================
// Listeners
// ============================================================================

fn request_details(
    request_id: &str,
    url: &str,
    request_type: &str,
    tab_id: i32,
    frame_id: i32,
    incognito: bool,
    timestamp: f64,
) -> RequestDetails {
    RequestDetails {
        request_id: request_id.to_string(),
        url: url.to_string(),
        resource_type: ResourceType::from_browser_name(request_type).unwrap_or(ResourceType::OTHER),
        tab_id,
        frame_id,
        incognito,
        timestamp,
    }
}

/// Non-blocking listener body for the filter at `filter_index`.
#[wasm_bindgen]
#[allow(clippy::too_many_arguments)]
pub fn rule_listener(
    filter_index: usize,
    request_id: &str,
    url: &str,
    request_type: &str,
    tab_id: i32,
    frame_id: i32,
    incognito: bool,
    timestamp: f64,
) -> bool {
    let request = request_details(request_id, url, request_type, tab_id, frame_id, incognito, timestamp);
    with_session(false, |session| session.mark(filter_index, &request))
}

/// Blocking listener body. Returns the blocking response, or `undefined` to
/// let the request proceed.
#[wasm_bindgen]
pub fn control_listener(
    request_id: &str,
    url: &str,
    request_type: &str,
    tab_id: i32,
    frame_id: i32,
    incognito: bool,
    timestamp: f64,
) -> JsValue {
    let request = request_details(request_id, url, request_type, tab_id, frame_id, incognito, timestamp);
    let decision = with_session(Decision::Allow, |session| session.resolve(&request));
    decision_to_js(&decision)
}

fn decision_to_js(decision: &Decision) -> JsValue {
    match decision {
        Decision::Allow => JsValue::UNDEFINED,
        Decision::Cancel => {
            let response = js_sys::Object::new();
            let _ = js_sys::Reflect::set(&response, &"cancel".into(), &JsValue::from(true));
            response.into()
        }
        Decision::Redirect(url) => {
            let response = js_sys::Object::new();
            let _ = js_sys::Reflect::set(&response, &"redirectUrl".into(), &JsValue::from_str(url));
            response.into()
        }
    }
}

#[wasm_bindgen]
pub fn on_navigation_committed(tab_id: i32, frame_id: i32, url: &str, transition_qualifiers: JsValue) {
    let qualifiers = js_sys::Array::from(&transition_qualifiers)
        .iter()
        .filter_map(|value| value.as_string())
        .collect();
    let details = NavigationDetails {
        tab_id,
        frame_id,
        url: url.to_string(),
        transition_qualifiers: qualifiers,
    };
    with_session((), |session| session.on_navigation_committed(&details));
}

#[wasm_bindgen]
pub fn on_tab_removed(tab_id: i32) {
    with_session((), |session| session.on_tab_removed(tab_id));
}

/// Records of a tab for the popup, oldest first.
#[wasm_bindgen]
pub fn get_tab_records(tab_id: i32) -> Result<JsValue, JsValue> {
    let json = with_session(Ok("[]".to_string()), |session| {
        serde_json::to_string(session.tab_records(tab_id))
    })
    .map_err(|e| JsValue::from_str(&format!("Failed to serialize records: {}", e)))?;
    js_sys::JSON::parse(&json)
}
