//! Criterion benchmarks for the trace math hot paths.
//!
//! Key metrics:
//! - Interpolated lookups across mismatched grids
//! - Incremental transform chain propagation after a single-sample write
//! - A full formula pass over two sources
//!
//! Run with: cargo bench --bench trace_math

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daq_traces::interpolation::interpolated_value;
use daq_traces::sample::{Domain, Sample};
use daq_traces::transform::{MedianFilter, TransformChain};
use daq_traces::TraceModel;

fn sweep(points: usize) -> Vec<Sample> {
    (0..points)
        .map(|i| {
            let x = 1.0e6 + i as f64 * 1.0e3;
            Sample::real(x, (i as f64 * 0.01).sin())
        })
        .collect()
}

/// Interpolated lookups at coordinates halfway between stored samples.
fn interpolation_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpolation");

    for points in [101, 1001, 10001] {
        let samples = sweep(points);
        group.throughput(Throughput::Elements(points as u64));
        group.bench_with_input(BenchmarkId::new("midpoints", points), &samples, |b, samples| {
            b.iter(|| {
                for s in samples.iter().skip(1) {
                    black_box(interpolated_value(samples, s.x - 500.0));
                }
            });
        });
    }

    group.finish();
}

/// One changed raw sample pushed through a median filter chain.
fn chain_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform_chain");

    for points in [1001, 10001] {
        let raw = sweep(points);
        let mut chain = TransformChain::new();
        chain.append(Box::new(MedianFilter::new(5)));
        chain.append(Box::new(MedianFilter::new(3)));
        chain.propagate(&raw, Domain::Frequency, None);

        group.bench_function(BenchmarkId::new("single_write", points), |b| {
            b.iter(|| {
                let mid = points / 2;
                black_box(chain.propagate(&raw, Domain::Frequency, Some(mid..mid + 1)));
            });
        });
    }

    group.finish();
}

/// Full evaluation of `a*b` over two sources of different resolution.
fn formula_full_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("formula");

    for points in [201, 2001] {
        let mut model = TraceModel::new();
        let a = model.create_trace("A");
        let b = model.create_trace("B");
        for s in sweep(points) {
            model.add_data(a, s, Domain::Frequency, 50.0, None).unwrap();
        }
        for s in sweep(points / 2) {
            model.add_data(b, s, Domain::Frequency, 50.0, None).unwrap();
        }
        let m = model.create_trace("M");
        model.set_math(m).unwrap();
        model.add_source(m, a, "a").unwrap();
        model.add_source(m, b, "b").unwrap();

        group.bench_function(BenchmarkId::new("a_times_b", points), |bench| {
            bench.iter(|| {
                model.set_expression(m, "a*b").unwrap();
                model.flush();
                black_box(model.trace(m).map(|t| t.len()));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, interpolation_lookup, chain_incremental, formula_full_pass);
criterion_main!(benches);
