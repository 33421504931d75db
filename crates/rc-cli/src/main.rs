//! Request Control CLI
//!
//! CLI tool for checking rule sets and replaying request traces through the
//! decision engine.

use std::fs;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

use rc_core::options::index_rules;
use rc_core::{
    compile, Decision, HostEvent, NavigationDetails, Options, RecordingHost, RequestDetails,
    Session, TabId,
};

#[derive(Parser)]
#[command(name = "rc-cli")]
#[command(about = "Request Control rule checker and trace simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every rule of an options file and list the resulting filters
    Check {
        /// Options file (JSON)
        #[arg(short, long)]
        input: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Replay a trace of browser events against an options file
    Simulate {
        /// Options file (JSON)
        #[arg(short, long)]
        options: String,

        /// Trace file: JSON array of events
        #[arg(short, long)]
        trace: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

/// One entry of a simulation trace.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum TraceEvent {
    /// Delivered to every covering filter listener, then the blocking listener
    Request(RequestDetails),
    Navigation(NavigationDetails),
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
    /// Option store change
    Options(Options),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { input, verbose } => {
            init_logging(verbose);
            cmd_check(&input, verbose)
        }
        Commands::Simulate {
            options,
            trace,
            verbose,
        } => {
            init_logging(verbose);
            cmd_simulate(&options, &trace)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_options(path: &str) -> Result<Options, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    Options::from_json(&content).map_err(|e| format!("Invalid options '{}': {}", path, e))
}

fn cmd_check(input: &str, verbose: bool) -> Result<(), String> {
    let options = load_options(input)?;
    let rules = index_rules(&options.rules);

    let mut filter_count = 0usize;
    let mut failed = 0usize;

    for rule in &rules {
        if !rule.active {
            if verbose {
                println!("  [{}] {} - inactive", rule.priority, rule.id);
            }
            continue;
        }
        match compile(rule) {
            Ok(filters) => {
                for filter in &filters {
                    let registration = filter.to_registration();
                    println!(
                        "  [{}] {} ({:?}) -> {}",
                        filter_count,
                        rule.id,
                        rule.kind,
                        registration.urls.join(" ")
                    );
                    if verbose {
                        if let Some(types) = &registration.types {
                            println!("        types: {}", types.join(", "));
                        }
                        if let Some(incognito) = registration.incognito {
                            println!("        incognito: {}", incognito);
                        }
                    }
                    filter_count += 1;
                }
            }
            Err(e) => {
                println!("  [!] {}", e);
                failed += 1;
            }
        }
    }

    println!("Checked {} rule(s) from '{}'", rules.len(), input);
    println!("  Filters:  {}", filter_count);
    println!("  Errors:   {}", failed);
    if options.disabled {
        println!("  Note:     options are disabled; no filters would be installed");
    }

    if failed > 0 {
        return Err(format!("{} rule(s) failed to compile", failed));
    }
    Ok(())
}

fn cmd_simulate(options_path: &str, trace_path: &str) -> Result<(), String> {
    let options = load_options(options_path)?;
    let content = fs::read_to_string(trace_path)
        .map_err(|e| format!("Failed to read '{}': {}", trace_path, e))?;
    let trace: Vec<TraceEvent> = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid trace '{}': {}", trace_path, e))?;

    let mut session = Session::new(RecordingHost::new());
    session.apply_options(&options);

    let mut steps = Vec::with_capacity(trace.len());
    for event in &trace {
        steps.push(run_event(&mut session, event));
    }

    let mut tab_ids: Vec<TabId> = session.records().tab_ids().collect();
    tab_ids.sort_unstable();
    let mut tabs = serde_json::Map::new();
    for tab_id in tab_ids {
        let records = serde_json::to_value(session.tab_records(tab_id))
            .map_err(|e| format!("Failed to serialize records: {}", e))?;
        tabs.insert(tab_id.to_string(), records);
    }

    let report = json!({
        "steps": steps,
        "records": tabs,
    });
    let text = serde_json::to_string_pretty(&report)
        .map_err(|e| format!("Failed to serialize report: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn run_event(session: &mut Session<RecordingHost>, event: &TraceEvent) -> Value {
    let mut step = match event {
        TraceEvent::Request(request) => {
            let decision: Decision = session.dispatch(request);
            json!({
                "event": "request",
                "requestId": request.request_id,
                "url": request.url,
                "decision": decision,
            })
        }
        TraceEvent::Navigation(details) => {
            session.on_navigation_committed(details);
            json!({
                "event": "navigation",
                "tabId": details.tab_id,
                "url": details.url,
            })
        }
        TraceEvent::TabRemoved { tab_id } => {
            session.on_tab_removed(*tab_id);
            json!({ "event": "tabRemoved", "tabId": tab_id })
        }
        TraceEvent::Options(options) => {
            session.apply_options(options);
            json!({ "event": "options", "filters": session.filters().len() })
        }
    };

    let host_events: Vec<Value> = session.host_mut().drain().iter().map(host_event_json).collect();
    if !host_events.is_empty() {
        step["host"] = Value::Array(host_events);
    }
    step
}

fn host_event_json(event: &HostEvent) -> Value {
    match event {
        HostEvent::Notify { tab_id, action, count } => {
            json!({ "notify": { "tabId": tab_id, "action": action, "icon": action.icon(), "count": count } })
        }
        HostEvent::Clear { tab_id } => json!({ "clear": { "tabId": tab_id } }),
        HostEvent::UpdateTab { tab_id, url } => json!({ "updateTab": { "tabId": tab_id, "url": url } }),
        HostEvent::RuleError { rule_id, message } => {
            json!({ "ruleError": { "ruleId": rule_id, "message": message } })
        }
        HostEvent::Enabled => json!("enabled"),
        HostEvent::Disabled => json!("disabled"),
    }
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(verbose: bool) {
    env_logger::builder()
        .filter_level(if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .format_timestamp(None)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::{Rule, RuleKind};

    fn session() -> Session<RecordingHost> {
        let mut session = Session::new(RecordingHost::new());
        session.start(&[
            Rule::new("ab", RuleKind::Redirect, "*://a.test/*").with_target("https://b.test/"),
        ]);
        session.host_mut().drain();
        session
    }

    #[test]
    fn verbose_logging_enables_debug() {
        init_logging(true);
        // A second init keeps the installed logger
        init_logging(false);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn parses_trace_events() {
        let trace: Vec<TraceEvent> = serde_json::from_str(
            r#"[
                {"event": "request", "requestId": "1", "url": "https://a.test/", "type": "main_frame", "tabId": 3},
                {"event": "navigation", "tabId": 3, "frameId": 0, "url": "https://b.test/"},
                {"event": "tabRemoved", "tabId": 3},
                {"event": "options", "disabled": true}
            ]"#,
        )
        .unwrap();
        assert_eq!(trace.len(), 4);
        assert!(matches!(&trace[0], TraceEvent::Request(r) if r.tab_id == 3));
        assert!(matches!(&trace[2], TraceEvent::TabRemoved { tab_id: 3 }));
        assert!(matches!(&trace[3], TraceEvent::Options(o) if o.disabled));
    }

    #[test]
    fn request_step_reports_decision_and_badge() {
        let mut session = session();
        let event: TraceEvent = serde_json::from_str(
            r#"{"event": "request", "requestId": "1", "url": "https://a.test/", "type": "main_frame", "tabId": 3}"#,
        )
        .unwrap();

        let step = run_event(&mut session, &event);
        assert_eq!(step["decision"]["redirectUrl"], "https://b.test/");
        assert_eq!(step["host"][0]["notify"]["count"], 1);
        assert_eq!(step["host"][0]["notify"]["action"], "redirect");
    }

    #[test]
    fn unexplained_navigation_reports_clear() {
        let mut session = session();
        let request: TraceEvent = serde_json::from_str(
            r#"{"event": "request", "requestId": "1", "url": "https://a.test/", "type": "main_frame", "tabId": 3}"#,
        )
        .unwrap();
        run_event(&mut session, &request);

        let navigation: TraceEvent = serde_json::from_str(
            r#"{"event": "navigation", "tabId": 3, "url": "https://elsewhere.test/"}"#,
        )
        .unwrap();
        let step = run_event(&mut session, &navigation);
        assert_eq!(step["host"][0]["clear"]["tabId"], 3);
        assert!(session.tab_records(3).is_empty());
    }
}
