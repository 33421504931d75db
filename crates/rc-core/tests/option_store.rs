use rc_core::{Decision, HostEvent, NavigationDetails, Options, RecordingHost, RequestDetails, RuleKind, Session};

const OPTIONS: &str = r#"{
    "rules": [
        {"id": "upgrade", "kind": "secure", "urlPattern": "http://*/*", "types": ["main_frame"]},
        {"id": "ads", "kind": "block", "urlPattern": ["*://ads.test/*", "*://tracker.*/*"]},
        {"id": "allow-cdn", "kind": "whitelist", "urlPattern": "*://cdn.test/*"},
        {"id": "short", "kind": "redirect", "urlPattern": "*://t.test/*", "target": "https://long.test{pathname}{search}"},
        {"id": "broken", "kind": "redirect", "urlPattern": "*://broken.test/*"}
    ]
}"#;

fn request(id: &str, url: &str, kind: &str) -> RequestDetails {
    serde_json::from_value(serde_json::json!({
        "requestId": id,
        "url": url,
        "type": kind,
        "tabId": 5,
        "frameId": 0,
        "timeStamp": 1.5,
    }))
    .expect("request details should parse")
}

fn session() -> Session<RecordingHost> {
    let options = Options::from_json(OPTIONS).expect("options should parse");
    let mut session = Session::new(RecordingHost::new());
    session.apply_options(&options);
    session
}

#[test]
fn broken_rule_is_reported_and_others_load() {
    let mut session = session();
    let events = session.host_mut().drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, HostEvent::RuleError { rule_id, .. } if rule_id == "broken")));
    assert_eq!(events.last(), Some(&HostEvent::Enabled));
    // ads splits into a native filter and a widened one
    assert_eq!(session.filters().len(), 5);
    assert_eq!(session.registrations()[2].urls, vec!["*://*/*".to_string()]);
}

#[test]
fn decisions_follow_rule_kinds() {
    let mut session = session();

    assert_eq!(session.dispatch(&request("1", "https://ads.test/a.js", "script")), Decision::Cancel);
    assert_eq!(session.dispatch(&request("2", "https://tracker.io/p.gif", "image")), Decision::Cancel);
    assert_eq!(session.dispatch(&request("3", "https://cdn.test/lib.js", "script")), Decision::Allow);
    assert_eq!(
        session.dispatch(&request("4", "https://t.test/abc?x=1", "xmlhttprequest")),
        Decision::Redirect("https://long.test/abc?x=1".into())
    );
    assert_eq!(
        session.dispatch(&request("5", "http://plain.test/", "main_frame")),
        Decision::Redirect("https://plain.test/".into())
    );
    assert_eq!(session.dispatch(&request("6", "http://plain.test/x.js", "script")), Decision::Allow);
    assert_eq!(session.dispatch(&request("7", "https://elsewhere.test/", "image")), Decision::Allow);

    let actions: Vec<RuleKind> = session.tab_records(5).iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![
            RuleKind::Block,
            RuleKind::Block,
            RuleKind::Whitelist,
            RuleKind::Redirect,
            RuleKind::Secure,
        ]
    );
    assert_eq!(session.pending_count(), 0);
}

#[test]
fn upgrade_survives_its_own_navigation() {
    let mut session = session();
    session.dispatch(&request("1", "http://plain.test/", "main_frame"));
    session.host_mut().drain();

    session.on_navigation_committed(&NavigationDetails {
        tab_id: 5,
        frame_id: 0,
        url: "https://plain.test/".into(),
        transition_qualifiers: vec!["server_redirect".into()],
    });

    assert_eq!(session.tab_records(5).len(), 1);
    assert_eq!(
        session.host().events,
        vec![HostEvent::Notify { tab_id: 5, action: RuleKind::Secure, count: 1 }]
    );
}

#[test]
fn records_serialize_for_the_popup() {
    let mut session = session();
    session.dispatch(&request("1", "https://t.test/x", "main_frame"));

    let json = serde_json::to_value(session.tab_records(5)).unwrap();
    assert_eq!(json[0]["action"], "redirect");
    assert_eq!(json[0]["type"], "main_frame");
    assert_eq!(json[0]["target"], "https://long.test/x");
    assert_eq!(json[0]["rule"]["id"], "short");
}
