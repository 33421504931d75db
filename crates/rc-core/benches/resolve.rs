use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rc_core::records::TabRecordStore;
use rc_core::session::Session;
use rc_core::types::{RequestDetails, ResourceType, Rule, RuleKind};
use rc_core::{compile, NoopHost};

fn make_rules() -> Vec<Rule> {
    let mut rules = Vec::new();
    for i in 0..200 {
        rules.push(Rule::new(format!("block-{i}"), RuleKind::Block, format!("*://ads{i}.example/*")));
        rules.push(
            Rule::new(format!("redirect-{i}"), RuleKind::Redirect, format!("*://cdn{i}.example/*"))
                .with_target("https://mirror.example{pathname}{search}"),
        );
    }
    rules.push(Rule::new("tld", RuleKind::Whitelist, "*://static.example.*/*"));
    rules.push(Rule::new("secure", RuleKind::Secure, "http://*/*"));
    rules
}

fn request(id: usize, url: &str) -> RequestDetails {
    RequestDetails {
        request_id: id.to_string(),
        url: url.to_string(),
        resource_type: ResourceType::SCRIPT,
        tab_id: 1,
        frame_id: 0,
        incognito: false,
        timestamp: 0.0,
    }
}

fn bench_compile(c: &mut Criterion) {
    let rules = rc_core::options::index_rules(&make_rules());
    c.bench_function("compile_rules", |b| {
        b.iter(|| {
            for rule in &rules {
                black_box(compile(rule).ok());
            }
        })
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let mut session = Session::new(NoopHost);
    session.start(&make_rules());
    let urls = [
        "https://ads42.example/banner.js",
        "https://cdn7.example/lib.js?v=3",
        "http://static.example.co.uk/app.js",
        "https://unmatched.test/index.js",
    ];

    let mut next = 0usize;
    c.bench_function("dispatch", |b| {
        b.iter(|| {
            next += 1;
            let req = request(next, urls[next % urls.len()]);
            black_box(session.dispatch(&req))
        })
    });
}

fn bench_compaction(c: &mut Criterion) {
    let mut session = Session::new(NoopHost);
    session.start(&make_rules());
    let chain: Vec<RequestDetails> = (0..50)
        .map(|i| request(i, &format!("https://cdn{}.example/p{}", i % 200, i)))
        .collect();
    for req in &chain {
        session.dispatch(req);
    }
    let snapshot: TabRecordStore = {
        let mut store = TabRecordStore::new();
        for record in session.tab_records(1) {
            store.add(1, record.clone());
        }
        store
    };

    c.bench_function("compact_on_navigation", |b| {
        b.iter(|| {
            let mut store = TabRecordStore::new();
            store.set_tab_records(1, snapshot.get(1).to_vec());
            black_box(store.compact_on_navigation(1, "https://mirror.example/p49", true).len())
        })
    });
}

criterion_group!(benches, bench_compile, bench_dispatch, bench_compaction);
criterion_main!(benches);
