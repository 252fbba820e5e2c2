//! Benchmarks for dumpdb
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_parse_and_encode(c: &mut Criterion) {
    use dumpdb::ParserRegistry;

    let registry = ParserRegistry::with_builtin();
    let parse = registry.resolve("email-password").unwrap();

    c.bench_function("parse_encode_email_password", |b| {
        b.iter(|| {
            let mut record = parse(black_box("someone.long@mail.example.com:hunter2"), "dump.txt").unwrap();
            record.source_id = Some(42);
            record.derive_email_fields();
            black_box(record.to_batch_line());
        })
    });

    let regex_parse = registry.resolve("regex-email-password").unwrap();
    c.bench_function("parse_regex_email_password", |b| {
        b.iter(|| {
            black_box(regex_parse(black_box("someone.long@mail.example.com:hunter2"), "dump.txt").unwrap());
        })
    });
}

fn benchmark_predicate_rewrite(c: &mut Criterion) {
    use dumpdb::search::predicate::rewrite;

    c.bench_function("predicate_rewrite", |b| {
        b.iter(|| {
            let sql = rewrite(black_box(
                "(email LIKE '%@gmail.com' OR username = 'bob') AND password IS NOT NULL",
            ))
            .unwrap();
            black_box(sql);
        })
    });
}

fn benchmark_escape(c: &mut Criterion) {
    use dumpdb::record::{escape_field, unescape_field};

    c.bench_function("escape_unescape_field", |b| {
        b.iter(|| {
            let escaped = escape_field(black_box("pa\tss\\word\nwith\rcontrols"));
            black_box(unescape_field(&escaped));
        })
    });
}

criterion_group!(
    benches,
    benchmark_parse_and_encode,
    benchmark_predicate_rewrite,
    benchmark_escape
);
criterion_main!(benches);
