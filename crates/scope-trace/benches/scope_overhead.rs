//! Benchmarks for scope entry and exit overhead

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use scope_trace::{BatchPolicy, Registry, ScopeArgs, ScopeCallback, ScopeGuard, ThreadContext, clock};

/// Drops every batch so long runs do not grow the buffer
struct Discard;

impl ScopeCallback for Discard {
    fn thread_in_situ(&self, thread: &ThreadContext) {
        drop(thread.drain_finished());
    }

    fn thread_stop(&self, thread: &ThreadContext) {
        drop(thread.drain_finished());
    }
}

fn bench_clock(c: &mut Criterion) {
    c.bench_function("clock_stamp", |b| b.iter(|| std::hint::black_box(clock::stamp())));
    c.bench_function("clock_cpu_now", |b| b.iter(|| std::hint::black_box(clock::cpu_now())));
}

fn bench_guards(c: &mut Criterion) {
    c.bench_function("guard_disabled", |b| {
        b.iter(|| std::hint::black_box(ScopeGuard::disabled()))
    });

    let registry = Arc::new(Registry::new());
    registry.set_callback(Arc::new(Discard));
    registry.set_enabled(true);

    for policy in [
        BatchPolicy::EveryFrame,
        BatchPolicy::from_period_ns(1_000_000),
    ] {
        registry.set_batch_policy(policy);
        let registration = registry.register_current_thread();
        let ctx = Arc::clone(registration.context());
        c.bench_function(&format!("guard_enabled ({policy})"), |b| {
            b.iter(|| {
                let _guard = ScopeArgs::here()
                    .name("bench")
                    .thread(Arc::clone(&ctx))
                    .enter();
            })
        });
        drop(registration);
    }

    registry.set_enabled(false);
    let registration = registry.register_current_thread();
    let ctx = Arc::clone(registration.context());
    c.bench_function("guard_registry_disabled", |b| {
        b.iter(|| ScopeArgs::here().thread(Arc::clone(&ctx)).enter())
    });
}

criterion_group!(benches, bench_clock, bench_guards);
criterion_main!(benches);
