//! Dictionary ingest and scan benchmark.
//!
//! Measures bulk ingestion, point lookups, predicate scans (LIKE / regex /
//! ordered comparison), recovery time, and peak memory at two scales, for
//! both the plain index and the materialized-hash index.
//!
//! Run with `cargo run --release -p bench-dict-scan`.

use std::alloc::{GlobalAlloc, Layout, System};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use skarn_db_dict::{DictOptions, StringDictionary};

// ============================================================================
// Tracking allocator
// ============================================================================

struct TrackingAllocator;

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            let prev = ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed);
            let current = prev + layout.size();
            let mut peak = PEAK.load(Ordering::Relaxed);
            while current > peak {
                match PEAK.compare_exchange_weak(
                    peak,
                    current,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(p) => peak = p,
                }
            }
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
        unsafe { System.dealloc(ptr, layout) };
    }
}

fn reset_peak() {
    PEAK.store(ALLOCATED.load(Ordering::Relaxed), Ordering::Relaxed);
}

fn peak_since_reset() -> usize {
    PEAK.load(Ordering::Relaxed)
        .saturating_sub(ALLOCATED.load(Ordering::Relaxed))
}

// ============================================================================
// Data generation
// ============================================================================

/// Mixed column values: short enums with massive reuse, medium identifiers,
/// and longer free-text descriptions.
fn generate_column_values(count: usize, seed: u64) -> Vec<String> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let short_values = [
        "active", "pending", "completed", "failed", "retry", "archived", "draft", "open",
        "closed", "unknown",
    ];
    (0..count)
        .map(|i| {
            let r: f64 = rng.gen();
            if r < 0.3 {
                short_values[rng.gen_range(0..short_values.len())].to_string()
            } else if r < 0.7 {
                format!("order_{i}_{}", rng.gen_range(0u32..100_000))
            } else {
                format!(
                    "Shipment note for order {} routed via hub {}",
                    i,
                    rng.gen_range(0u32..500)
                )
            }
        })
        .collect()
}

/// Lookup batch: 50% known values, 50% misses.
fn build_lookups(source: &[String], count: usize, seed: u64) -> Vec<String> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            if rng.gen_bool(0.5) && !source.is_empty() {
                source[rng.gen_range(0..source.len())].clone()
            } else {
                format!("miss_{}", rng.gen_range(0u64..10_000_000))
            }
        })
        .collect()
}

// ============================================================================
// Benchmark driver
// ============================================================================

struct BenchResult {
    label: &'static str,
    scale: usize,
    unique_count: usize,
    ingest_ms: f64,
    lookup_ms: f64,
    like_ms: f64,
    regex_ms: f64,
    compare_ms: f64,
    recover_ms: f64,
    peak_mem_mb: f64,
}

const LOOKUP_COUNT: usize = 200_000;

fn bench_dictionary(label: &'static str, scale: usize, materialize: bool) -> BenchResult {
    let dir = tempfile::tempdir().expect("create bench dir");
    let values = generate_column_values(scale, 42);
    let lookups = build_lookups(&values, LOOKUP_COUNT, 43);

    reset_peak();
    let dict = StringDictionary::open(
        dir.path(),
        DictOptions::new()
            .initial_capacity(1024)
            .materialize_hashes(materialize),
    )
    .expect("open dictionary");

    let started = Instant::now();
    let mut codes = vec![0i32; values.len()];
    dict.get_or_add_bulk(&values, &mut codes)
        .expect("bulk ingest");
    let ingest_ms = started.elapsed().as_secs_f64() * 1e3;
    let unique_count = dict.storage_entry_count().expect("entry count");

    let started = Instant::now();
    for s in &lookups {
        black_box(dict.get_id_of_string(s).expect("lookup"));
    }
    let lookup_ms = started.elapsed().as_secs_f64() * 1e3;

    let generation = unique_count;
    let started = Instant::now();
    black_box(
        dict.get_like("order_1%", false, false, '\\', generation)
            .expect("like scan"),
    );
    let like_ms = started.elapsed().as_secs_f64() * 1e3;

    let started = Instant::now();
    black_box(
        dict.get_regexp_like("^order_[0-9]+_42$", '\\', generation)
            .expect("regex scan"),
    );
    let regex_ms = started.elapsed().as_secs_f64() * 1e3;

    let started = Instant::now();
    black_box(
        dict.get_compare("order_5", "<", generation)
            .expect("compare scan"),
    );
    let compare_ms = started.elapsed().as_secs_f64() * 1e3;

    let peak_mem_mb = peak_since_reset() as f64 / (1024.0 * 1024.0);

    assert!(dict.checkpoint(), "checkpoint failed");
    drop(dict);

    let started = Instant::now();
    let recovered = StringDictionary::open(
        dir.path(),
        DictOptions::new()
            .recover(true)
            .materialize_hashes(materialize),
    )
    .expect("recover dictionary");
    let recover_ms = started.elapsed().as_secs_f64() * 1e3;
    assert_eq!(
        recovered.storage_entry_count().expect("entry count"),
        unique_count
    );

    BenchResult {
        label,
        scale,
        unique_count,
        ingest_ms,
        lookup_ms,
        like_ms,
        regex_ms,
        compare_ms,
        recover_ms,
        peak_mem_mb,
    }
}

fn print_result(r: &BenchResult) {
    println!(
        "  {:<22} n={:<9} unique={:<8} ingest={:>9.2}ms lookup={:>8.2}ms \
         like={:>7.2}ms regex={:>7.2}ms cmp={:>8.2}ms recover={:>8.2}ms peak={:>8.2}MB",
        r.label,
        r.scale,
        r.unique_count,
        r.ingest_ms,
        r.lookup_ms,
        r.like_ms,
        r.regex_ms,
        r.compare_ms,
        r.recover_ms,
        r.peak_mem_mb,
    );
}

fn main() {
    println!("Dictionary Ingest + Scan Benchmark");
    println!("===================================");
    println!();
    println!(
        "{} point lookups per run; scans use generation = unique count.",
        LOOKUP_COUNT
    );
    println!();

    println!("Warming up...");
    let _ = bench_dictionary("warmup", 50_000, false);
    println!("Warmup complete.\n");

    println!("{}", "=".repeat(76));
    println!("  Plain index (hashes recomputed from payload)");
    println!("{}", "=".repeat(76));
    for &n in &[500_000, 5_000_000] {
        let r = bench_dictionary("plain", n, false);
        print_result(&r);
    }

    println!("\n{}", "=".repeat(76));
    println!("  Materialized hashes (collision checks skip the payload)");
    println!("{}", "=".repeat(76));
    for &n in &[500_000, 5_000_000] {
        let r = bench_dictionary("materialized", n, true);
        print_result(&r);
    }
}
