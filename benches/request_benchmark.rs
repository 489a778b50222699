// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cacheserver::{
    policy, Config, Negotiator, PageStore, RenderFn, RenderOutput, Request,
};

fn request_parse_classify_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parse_classify");
    let config = Config::new();

    let requests = [
        (
            "anonymous",
            b"GET / HTTP/1.1\r\nHost: localhost\r\nUser-Agent: Test\r\n\r\n".as_slice(),
        ),
        (
            "tracking_query",
            b"GET /2026/10/hello-world/?utm_source=x&fbclid=abc HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip, deflate, br\r\n\r\n".as_slice(),
        ),
        (
            "logged_in",
            b"GET / HTTP/1.1\r\nHost: localhost\r\nCookie: _ga=1; wordpress_logged_in_abc=admin%7C1; theme=dark\r\n\r\n".as_slice(),
        ),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| {
                let mut parsed = Request::try_from(black_box(request), 0).unwrap();
                parsed.classify(&config);
                policy::is_eligible(&parsed)
            });
        });
    }

    group.finish();
}

fn query_policy_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_policy");

    for (name, query) in [
        ("empty", ""),
        ("tracking", "utm_source=newsletter&utm_medium=email&gclid=Cj0KCQ"),
        ("disqualifying", "utm_source=newsletter&p=42"),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| policy::query_is_cacheable(black_box(query)));
        });
    }

    group.finish();
}

fn negotiator_hit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("negotiator_hit");
    let dir = tempfile::tempdir().unwrap();
    let renderer = RenderFn::new(|_: &Request| Ok(RenderOutput::ok("<html>".to_string() + &"A".repeat(16 * 1024) + "</html>")));

    for (name, compress) in [("plain", false), ("compressed", true)] {
        let store = PageStore::open(dir.path().join(name)).unwrap();
        let negotiator = Negotiator::new(store).with_compression(compress);
        let request = Request::get("/").with_header("Accept-Encoding", "gzip");
        negotiator.respond(&request, &renderer, 0);

        group.bench_function(name, |b| {
            b.iter(|| negotiator.respond(black_box(&request), &renderer, 0));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    request_parse_classify_benchmark,
    query_policy_benchmark,
    negotiator_hit_benchmark
);
criterion_main!(benches);
