//! Benchmarks for domain rule lookup.
//!
//! Measures how quickly a domain is checked against a gfwlist-sized rule set.

use criterion::{BenchmarkId, Criterion, Throughput, black_box};

use crossroad::matcher::Matcher;

/// Roughly the size of the published gfwlist.
const RULES: usize = 6000;

fn rule_set() -> Matcher {
    // Exclusions only win when listed before the rule they carve out of
    let mut text = String::from("@@||allowed.blocked0.com\n");
    for i in 0..RULES {
        match i % 3 {
            0 => text.push_str(&format!("||blocked{i}.com^\n")),
            1 => text.push_str(&format!(".cdn{i}.net\n")),
            _ => text.push_str(&format!("|http://site{i}.org/path\n")),
        }
    }
    Matcher::from_text(&text)
}

fn bench_matches(c: &mut Criterion) {
    let matcher = rule_set();

    let mut group = c.benchmark_group("matcher");
    group.throughput(Throughput::Elements(1));

    // Benchmark exact match
    group.bench_function(BenchmarkId::new("matches", "exact_match"), |b| {
        b.iter(|| matcher.matches(black_box("blocked3000.com")))
    });

    // Benchmark subdomain match (matched via parent)
    group.bench_function(BenchmarkId::new("matches", "subdomain_match"), |b| {
        b.iter(|| matcher.matches(black_box("img.static.cdn301.net")))
    });

    // Benchmark exclusion winning over a parent rule
    group.bench_function(BenchmarkId::new("matches", "excluded"), |b| {
        b.iter(|| matcher.matches(black_box("www.allowed.blocked0.com")))
    });

    // Benchmark miss
    group.bench_function(BenchmarkId::new("matches", "miss"), |b| {
        b.iter(|| matcher.matches(black_box("www.example.com")))
    });

    // Benchmark deep subdomain miss
    group.bench_function(BenchmarkId::new("matches", "deep_miss"), |b| {
        b.iter(|| matcher.matches(black_box("a.b.c.d.e.f.example.org")))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_matches(&mut criterion);
    criterion.final_summary();
}
