//! Comparison benchmark suite.
//!
//! Benchmarks the two detection passes at common capture sizes:
//! - Whole-image compare: 640x400, 1280x800
//! - Grid diff (15 x 15): same sizes, blocking and concurrent
//!
//! Run with: cargo bench --bench comparison
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use tabnab_guard::host::Viewport;
use tabnab_guard::imaging::{DEFAULT_CELL_THRESHOLD, DEFAULT_GRID_SIZE};
use tabnab_guard::{GridDiffer, ImageComparator, Raster};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SIZES: &[(u32, u32)] = &[(640, 400), (1280, 800)];

/// A page and the same page with its login box swapped.
fn page_pair(width: u32, height: u32) -> (Raster, Raster) {
    let before = Raster::solid(width, height, [250, 250, 250, 255]);
    let mut after = before.clone();
    after.fill_rect(width / 3, height / 4, width / 3, height / 2, [30, 60, 200, 255]);
    (before, after)
}

// ============================================================================
// Benchmark: Whole-Image Compare
// ============================================================================

fn bench_compare(c: &mut Criterion) {
    let comparator = ImageComparator::new();

    let mut group = c.benchmark_group("compare");
    group.sample_size(20);

    for &(width, height) in SIZES {
        let (before, after) = page_pair(width, height);
        group.bench_with_input(
            BenchmarkId::new("whole_image", format!("{width}x{height}")),
            &(before, after),
            |b, (before, after)| {
                b.iter(|| comparator.compare(black_box(before), black_box(after)));
            },
        );
    }

    group.finish();
}

// ============================================================================
// Benchmark: Grid Diff
// ============================================================================

fn bench_grid(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let differ = GridDiffer::default();

    let mut group = c.benchmark_group("grid_diff");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for &(width, height) in SIZES {
        let (before, after) = page_pair(width, height);
        let viewport = Viewport::of(&before);
        let label = format!("{width}x{height}");

        group.bench_with_input(
            BenchmarkId::new("blocking", &label),
            &(before.clone(), after.clone()),
            |b, (before, after)| {
                b.iter(|| {
                    differ.diff_blocking(
                        black_box(before),
                        black_box(after),
                        viewport,
                        DEFAULT_GRID_SIZE,
                        DEFAULT_CELL_THRESHOLD,
                    )
                });
            },
        );

        let (before, after) = (Arc::new(before), Arc::new(after));
        group.bench_with_input(
            BenchmarkId::new("concurrent", &label),
            &(before, after),
            |b, (before, after)| {
                b.to_async(&rt).iter(|| {
                    let (prior, fresh) = (Arc::clone(before), Arc::clone(after));
                    async move {
                        differ
                            .diff(prior, fresh, viewport, DEFAULT_GRID_SIZE, DEFAULT_CELL_THRESHOLD)
                            .await
                            .unwrap()
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_compare, bench_grid);
criterion_main!(benches);
