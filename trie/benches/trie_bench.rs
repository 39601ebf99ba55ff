//! Benchmarks for TopicTrie and the standalone matcher.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reactor_trie::{matches, TopicTrie};

/// Generate concrete topics for benchmarking
fn generate_topics(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("reactors/unit-{:04}/sensor/{}/reading", i, i % 10))
        .collect()
}

/// Generate filters sharing long prefixes, as dashboard widgets do
fn generate_patterns(count: usize) -> Vec<String> {
    let mut patterns: Vec<String> = (0..count)
        .map(|i| format!("reactors/unit-{:04}/+/{}/reading", i, i % 10))
        .collect();
    patterns.push("reactors/+/status".to_string());
    patterns.push("reactors/#".to_string());
    patterns
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_insert");

    for size in [100, 1000, 10000].iter() {
        let patterns = generate_patterns(*size);

        group.bench_with_input(BenchmarkId::new("patterns", size), size, |b, _| {
            b.iter(|| {
                let mut trie = TopicTrie::<usize>::new();
                for (i, p) in patterns.iter().enumerate() {
                    trie.insert(p, i).unwrap();
                }
                black_box(trie)
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie_lookup");

    for size in [100, 1000, 10000].iter() {
        let patterns = generate_patterns(*size);
        let topics = generate_topics(100);
        let mut trie = TopicTrie::<usize>::new();
        for (i, p) in patterns.iter().enumerate() {
            trie.insert(p, i).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("trie", size), size, |b, _| {
            b.iter(|| {
                let mut hits = 0;
                for topic in &topics {
                    trie.for_each_match(topic, |_| hits += 1);
                }
                black_box(hits)
            });
        });

        group.bench_with_input(BenchmarkId::new("linear", size), size, |b, _| {
            b.iter(|| {
                let mut hits = 0;
                for topic in &topics {
                    hits += patterns.iter().filter(|p| matches(p, topic)).count();
                }
                black_box(hits)
            });
        });
    }

    group.finish();
}

fn bench_deep_topics(c: &mut Criterion) {
    let deep: Vec<String> = (0..100)
        .map(|i| format!("a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p/q/r/s/t/u/v/w/x/y/z/{}", i))
        .collect();

    let mut trie = TopicTrie::<usize>::new();
    for (i, t) in deep.iter().enumerate() {
        trie.insert(t, i).unwrap();
    }
    trie.insert("a/+/c/#", usize::MAX).unwrap();

    c.bench_function("trie_deep_lookup", |b| {
        b.iter(|| {
            for t in &deep {
                black_box(trie.get(t));
            }
        });
    });
}

criterion_group!(benches, bench_insert, bench_lookup, bench_deep_topics);
criterion_main!(benches);
