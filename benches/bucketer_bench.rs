//! Benchmarks for file-crush planning
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn file_sizes(count: usize) -> Vec<u64> {
    // Deterministic spread between 1 KiB and ~96 MiB
    (0..count as u64)
        .map(|i| 1024 + (i.wrapping_mul(2_654_435_761) % (96 * 1024 * 1024)))
        .collect()
}

fn benchmark_balance(c: &mut Criterion) {
    use file_crush::plan::bucketer::balance;

    let mut group = c.benchmark_group("balance");
    for &(items, bins) in &[(1_000usize, 10usize), (100_000, 100), (100_000, 4000)] {
        let sizes = file_sizes(items);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", items, bins)),
            &sizes,
            |b, sizes| b.iter(|| black_box(balance(sizes, bins))),
        );
    }
    group.finish();
}

fn benchmark_output_name(c: &mut Criterion) {
    use file_crush::format::FormatAdapter;
    use file_crush::spec::{CrushSpec, Placeholders};
    use std::path::Path;

    c.bench_function("output_name", |b| {
        let spec = CrushSpec::new(
            r".*/logs/(?P<app>\w+)/(\d{8})",
            "${app}-$2-${crush.timestamp}-${crush.task.num}-${crush.file.num}",
            FormatAdapter::Text,
            FormatAdapter::Text,
        )
        .unwrap();
        let values = Placeholders {
            task_num: 7,
            timestamp: "20240102030405".to_string(),
            file_num: 42,
        };
        let dir = Path::new("/data/logs/web/20240101");

        b.iter(|| black_box(spec.output_name(dir, &values)))
    });
}

criterion_group!(benches, benchmark_balance, benchmark_output_name);
criterion_main!(benches);
