//! # Notification Gateway Benchmarks
//!
//! | Path                 | Target      |
//! |----------------------|-------------|
//! | Phone normalization  | < 1µs       |
//! | Caption rendering    | < 10µs      |
//! | Inline image parsing | linear, 2MB |

use chrono::{FixedOffset, TimeZone};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use notify_gateway::domain::config::{MediaConfig, DEFAULT_TEMPLATE_TEXT};
use notify_gateway::domain::{render, render_filled, MediaInput, MediaPolicy, PhoneDigits, TemplateVars};

fn bench_phone_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("recipient");
    for raw in ["+51 987654321", "(555) 010-9999 ext", "123"] {
        group.bench_with_input(BenchmarkId::new("normalize", raw), raw, |b, raw| {
            b.iter(|| black_box(PhoneDigits::normalize(raw).is_ok()))
        });
    }
    group.finish();
}

fn bench_caption_render(c: &mut Criterion) {
    let now = FixedOffset::west_opt(5 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 1, 7, 0, 0)
        .unwrap();
    let vars = TemplateVars::for_product(
        "Cordless Drill",
        "18V, two batteries, carrying case",
        "+51 987654321",
        "sales@example.com",
        now,
    );

    let mut group = c.benchmark_group("template");
    group.bench_function("default_caption", |b| {
        b.iter(|| black_box(render_filled(DEFAULT_TEMPLATE_TEXT, &vars)))
    });
    group.bench_function("unknown_keys", |b| {
        b.iter(|| black_box(render("{{a}} {{b}} {{productName}} {{c}}", &vars)))
    });
    group.finish();
}

fn bench_inline_media(c: &mut Criterion) {
    let policy = MediaPolicy::from(&MediaConfig::default());

    let mut group = c.benchmark_group("media");
    for encoded_len in [4 * 1024, 256 * 1024, 2 * 1024 * 1024] {
        let payload = format!("data:image/png;base64,{}", "A".repeat(encoded_len));
        group.throughput(Throughput::Bytes(encoded_len as u64));
        group.bench_with_input(
            BenchmarkId::new("data_uri", encoded_len),
            &payload,
            |b, payload| b.iter(|| black_box(MediaInput::parse(payload, &policy).is_ok())),
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_phone_normalization,
    bench_caption_render,
    bench_inline_media
);
criterion_main!(benches);
