//! Diagnostic engine benchmark
//!
//! Scores a day of 15-second samples (5760 intervals) the way one capture is
//! scored: correlation, memory slope and the full normalize → read → score
//! path over synthetic decoder CSV.
//!
//! ```bash
//! cargo bench --bench diagnostics
//! ```

use contend::diagnostics::{contention_score, linear_slope};
use contend::normalize::normalize_text;
use contend::reader::read_stream;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn series(len: usize, phase: f64) -> Vec<Option<f64>> {
    (0..len)
        .map(|i| {
            if i % 97 == 0 {
                None
            } else {
                Some(50.0 + 40.0 * ((i as f64) * 0.01 + phase).sin())
            }
        })
        .collect()
}

fn capture_csv(intervals: usize) -> String {
    let mut text = String::from(concat!(
        r#""(PDH-CSV 4.0) (UTC)(0)","\\DB01\VM Processor(_Total)\CPU stolen time","#,
        r#""\\DB01\Process(sqlservr)\% Processor Time","\\DB01\Process V2(sqlservr:4242)\% Processor Time","#,
        r#""\\DB01\Process V2(sqlservr:4242)\Private Bytes""#
    ));
    for i in 0..intervals {
        let seconds = i * 15;
        text.push_str(&format!(
            "\n\"01/15/2024 {:02}:{:02}:{:02}.000\",\"{}\",\"{}\",\"{}\",\"{}\"",
            seconds / 3600 % 24,
            seconds / 60 % 60,
            seconds % 60,
            i % 13,
            i % 7,
            i % 11,
            1_000_000 + i * 4096
        ));
    }
    text
}

fn bench_contention_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention_score");
    for len in [240, 5760] {
        let pressure = series(len, 0.0);
        let cpu = series(len, 0.3);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| contention_score(black_box(&pressure), black_box(&cpu)));
        });
    }
    group.finish();
}

fn bench_linear_slope(c: &mut Criterion) {
    let memory = series(5760, 1.0);
    c.bench_function("linear_slope_5760", |b| {
        b.iter(|| linear_slope(black_box(&memory), 10));
    });
}

fn bench_normalize_and_read(c: &mut Criterion) {
    let csv = capture_csv(5760);
    c.bench_function("normalize_read_5760", |b| {
        b.iter(|| {
            let stream = normalize_text(black_box(&csv)).unwrap_or_default();
            read_stream(&stream, 15.0)
        });
    });
}

criterion_group!(
    benches,
    bench_contention_score,
    bench_linear_slope,
    bench_normalize_and_read
);
criterion_main!(benches);
