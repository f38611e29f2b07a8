//! Integration tests for scope-trace

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scope_trace::{
    BatchPolicy, CollectingCallback, Frame, FrameTree, MemoryStore, Registry, RegistryLocator,
    RendezvousKey, RendezvousStore, ScopeArgs, ScopeGuard, SourceLoc, TempDirStore,
    ThreadContext, ThreadIdentity,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

fn enabled_registry(policy: BatchPolicy) -> (Arc<Registry>, Arc<CollectingCallback>) {
    init_logging();
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(CollectingCallback::new());
    registry.set_callback(collector.clone());
    registry.set_batch_policy(policy);
    registry.set_enabled(true);
    (registry, collector)
}

fn scope(ctx: &Arc<ThreadContext>, name: &'static str) -> ScopeGuard {
    ScopeArgs::new(SourceLoc::caller())
        .name(name)
        .thread(Arc::clone(ctx))
        .enter()
}

/// Run `work` on a fresh registered thread and return that thread's identity
fn on_thread<F>(registry: &Arc<Registry>, work: F) -> ThreadIdentity
where
    F: FnOnce(&Arc<ThreadContext>) + Send + 'static,
{
    let registry = Arc::clone(registry);
    thread::spawn(move || {
        let registration = registry.register_current_thread();
        work(registration.context());
        registration.context().identity()
    })
    .join()
    .expect("instrumented thread panicked")
}

fn burn_cpu(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
    }
    acc
}

fn by_name<'a>(frames: &'a [Frame], name: &str) -> &'a Frame {
    frames
        .iter()
        .find(|f| f.name() == name)
        .unwrap_or_else(|| panic!("no frame named {name}"))
}

#[test]
fn test_nested_siblings_at_thread_stop() {
    let (registry, collector) = enabled_registry(BatchPolicy::AtThreadStop);

    let id = on_thread(&registry, |ctx| {
        let _f = scope(ctx, "f");
        let _g = scope(ctx, "g");
        {
            let _h1 = scope(ctx, "h1");
        }
        {
            let _h2 = scope(ctx, "h2");
        }
    });

    let record = collector.record(id).expect("thread recorded");
    assert!(record.in_situ.is_empty());
    assert_eq!(record.stops, 1);
    let frames = record.at_stop;
    assert_eq!(frames.len(), 5);

    let root = by_name(&frames, "");
    let f = by_name(&frames, "f");
    let g = by_name(&frames, "g");
    let h1 = by_name(&frames, "h1");
    let h2 = by_name(&frames, "h2");

    assert_eq!(root.index(), 0);
    assert_eq!((f.index(), g.index(), h1.index(), h2.index()), (1, 2, 3, 4));
    assert_eq!(f.caller_index(), root.index());
    assert_eq!(g.caller_index(), f.index());
    assert_eq!(h1.caller_index(), g.index());
    assert_eq!(h2.caller_index(), g.index());
    assert_eq!(h2.prev_index(), h1.index());
    assert_eq!(h1.prev_index(), 0);
    assert_eq!(g.youngest_child_index(), h2.index());

    let tree = FrameTree::new(&frames).expect("dense batch");
    tree.validate().expect("valid tree");
    let children: Vec<_> = tree.children(g.index()).map(Frame::name).collect();
    assert_eq!(children, ["h2", "h1"]);
}

#[test]
fn test_two_threads_get_separate_batches() {
    let (registry, collector) = enabled_registry(BatchPolicy::AtThreadStop);

    let a = on_thread(&registry, |ctx| drop(scope(ctx, "only-a")));
    let b = on_thread(&registry, |ctx| drop(scope(ctx, "only-b")));

    assert_eq!(collector.start_count(), 2);
    assert_eq!(collector.stop_count(), 2);
    assert_eq!(registry.thread_count(), 0);

    // Thread ids may be recycled, so identify each batch by its contents.
    if a != b {
        let names_a: Vec<_> = collector.all_frames(a).iter().map(Frame::name).collect();
        let names_b: Vec<_> = collector.all_frames(b).iter().map(Frame::name).collect();
        assert_eq!(names_a, ["only-a", ""]);
        assert_eq!(names_b, ["only-b", ""]);
    }
}

#[test]
fn test_every_frame_delivers_once_per_scope() {
    let (registry, collector) = enabled_registry(BatchPolicy::EveryFrame);

    let id = on_thread(&registry, |ctx| {
        for _ in 0..4 {
            let _outer = scope(ctx, "outer");
            let _inner = scope(ctx, "inner");
        }
    });

    let record = collector.record(id).expect("thread recorded");
    // 8 user scopes plus the root.
    assert_eq!(record.in_situ.len(), 9);
    assert!(record.in_situ.iter().all(|batch| batch.len() == 1));
    assert!(record.at_stop.is_empty());
    assert_eq!(registry.metrics().in_situ_flushes, 9);
}

#[test]
fn test_every_frame_is_delivered_once_for_any_period() {
    let periods = [
        BatchPolicy::AtThreadStop,
        BatchPolicy::EveryFrame,
        BatchPolicy::Every(Duration::from_nanos(2)),
        BatchPolicy::Every(Duration::from_micros(50)),
        BatchPolicy::Every(Duration::from_millis(5)),
        BatchPolicy::Every(Duration::from_secs(60)),
    ];

    for policy in periods {
        let (registry, collector) = enabled_registry(policy);
        let id = on_thread(&registry, |ctx| {
            for _ in 0..20 {
                let _step = scope(ctx, "step");
                burn_cpu(20_000);
                let _leaf = scope(ctx, "leaf");
            }
        });

        let frames = collector.all_frames(id);
        assert_eq!(frames.len(), 41, "policy {policy}");
        let tree = FrameTree::new(&frames).expect("every index exactly once");
        tree.validate().expect("valid tree");

        let metrics = registry.metrics();
        assert_eq!(metrics.frames_recorded, 41);
        assert_eq!(metrics.frames_drained, 41);
        assert_eq!(metrics.frames_discarded, 0);
    }
}

/// In-situ flushes the batch rule yields for frames in completion order,
/// seeded from the root's CPU start
fn expected_flushes(policy: BatchPolicy, frames: &[Frame]) -> usize {
    let Some(root) = frames.iter().find(|f| f.is_root()) else {
        return 0;
    };
    let mut last = root.start_cpu();
    let mut count = 0;
    for frame in frames {
        if policy.is_due(last, frame.stop_cpu()) {
            last = frame.stop_cpu();
            count += 1;
        }
    }
    count
}

#[test]
fn test_in_situ_flushes_follow_the_period() {
    let ladder = [
        BatchPolicy::EveryFrame,
        BatchPolicy::Every(Duration::from_nanos(2)),
        BatchPolicy::Every(Duration::from_micros(20)),
        BatchPolicy::Every(Duration::from_micros(200)),
        BatchPolicy::Every(Duration::from_millis(5)),
        BatchPolicy::Every(Duration::from_secs(60)),
        BatchPolicy::AtThreadStop,
    ];

    for policy in ladder {
        let (registry, collector) = enabled_registry(policy);
        let id = on_thread(&registry, |ctx| {
            for _ in 0..20 {
                let _step = scope(ctx, "step");
                burn_cpu(20_000);
                let _leaf = scope(ctx, "leaf");
                burn_cpu(5_000);
            }
        });

        // Delivery order is completion order.
        let frames = collector.all_frames(id);
        assert_eq!(frames.len(), 41, "policy {policy}");
        let flushed = collector.in_situ_count();
        assert_eq!(flushed, expected_flushes(policy, &frames), "policy {policy}");
        assert_eq!(registry.metrics().in_situ_flushes, flushed as u64);

        // On the same frames, every longer period flushes no more often.
        let counts: Vec<usize> = ladder.iter().map(|p| expected_flushes(*p, &frames)).collect();
        assert!(
            counts.windows(2).all(|pair| pair[0] >= pair[1]),
            "policy {policy}: {counts:?}"
        );
        assert_eq!(counts.first(), Some(&41));
        assert_eq!(counts.last(), Some(&0));
    }
}

#[test]
fn test_timestamps_follow_tree_order() {
    let (registry, collector) = enabled_registry(BatchPolicy::AtThreadStop);

    let id = on_thread(&registry, |ctx| {
        for _ in 0..3 {
            let _a = scope(ctx, "a");
            burn_cpu(5_000);
            {
                let _b = scope(ctx, "b");
                burn_cpu(5_000);
            }
            let _c = scope(ctx, "c");
            burn_cpu(5_000);
        }
    });

    let frames = collector.all_frames(id);
    let tree = FrameTree::new(&frames).expect("dense batch");

    for frame in tree.preorder() {
        assert!(frame.start_cpu() <= frame.stop_cpu());
        assert!(frame.start_wall() <= frame.stop_wall());
    }

    let starts: Vec<_> = tree.preorder().map(Frame::start_wall).collect();
    assert!(starts.windows(2).all(|w| w[0] < w[1]), "{starts:?}");
    let cpu_starts: Vec<_> = tree.preorder().map(Frame::start_cpu).collect();
    assert!(cpu_starts.windows(2).all(|w| w[0] <= w[1]));

    let stops: Vec<_> = tree.postorder().into_iter().map(Frame::stop_wall).collect();
    assert!(stops.windows(2).all(|w| w[0] < w[1]), "{stops:?}");

    // Delivery order is completion order.
    let delivered: Vec<_> = frames.iter().map(Frame::index).collect();
    let post: Vec<_> = tree.postorder().into_iter().map(Frame::index).collect();
    assert_eq!(delivered, post);
}

#[test]
fn test_payload_survives_delivery() {
    let (registry, collector) = enabled_registry(BatchPolicy::AtThreadStop);

    let id = on_thread(&registry, |ctx| {
        let _guard = ScopeArgs::here()
            .name("request")
            .payload(scope_trace::Payload::new(vec![3u32, 1, 4]))
            .thread(Arc::clone(ctx))
            .enter();
    });

    let frames = collector.all_frames(id);
    let request = by_name(&frames, "request");
    assert_eq!(request.payload_as::<Vec<u32>>(), &vec![3, 1, 4]);
    assert!(request.payload().is_some_and(|p| p.downcast_ref::<String>().is_none()));
    assert!(by_name(&frames, "").payload().is_none());
}

#[test]
fn test_second_module_shares_thread_context() {
    let (registry, collector) = enabled_registry(BatchPolicy::AtThreadStop);

    thread::spawn(move || {
        let first = registry.register_current_thread();
        let second = registry.register_current_thread();
        let id = first.context().identity();
        assert!(Arc::ptr_eq(first.context(), second.context()));
        assert_eq!(registry.use_count(id), 2);

        drop(first);
        assert_eq!(registry.use_count(id), 1);
        assert_eq!(collector.record(id).map(|r| r.stops), Some(0));
        drop(second);
        assert_eq!(registry.use_count(id), 0);
        assert_eq!(collector.record(id).map(|r| (r.starts, r.stops)), Some((1, 1)));
    })
    .join()
    .expect("thread panicked");
}

#[test]
fn test_modules_share_registry_through_temp_dir() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TempDirStore::new(dir.path()));
    let key = RendezvousKey::current();

    let module_a = RegistryLocator::with_key(Arc::clone(&store), key);
    let module_b = RegistryLocator::with_key(Arc::clone(&store), key);

    let a = module_a.locate();
    assert!(store.path_for(&key).exists());
    let b = module_b.lookup().expect("record published by module A");
    assert!(Arc::ptr_eq(&a, &b));

    a.set_enabled(true);
    assert!(b.is_enabled());
    a.set_enabled(false);
    assert!(!b.is_enabled());

    drop((a, b));
    drop(module_a);
    assert!(store.path_for(&key).exists());
    drop(module_b);
    assert!(!store.path_for(&key).exists());
}

#[test]
fn test_foreign_record_is_replaced() {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TempDirStore::new(dir.path()));
    let key = RendezvousKey::current();
    std::fs::write(store.path_for(&key), "scope-trace 0.0.0 1 1 0x1000\n").expect("write");

    let locator = RegistryLocator::with_key(Arc::clone(&store), key);
    let registry = locator.locate();
    let published = store.lookup(&key).expect("readable").expect("record present");
    assert_eq!(published, Arc::as_ptr(&registry) as usize);
}

#[test]
fn test_memory_store_stands_in_for_temp_dir() {
    let store = Arc::new(MemoryStore::new());
    let key = RendezvousKey::new(7, 7);
    let a = RegistryLocator::with_key(Arc::clone(&store), key);
    let b = RegistryLocator::with_key(Arc::clone(&store), key);
    assert!(Arc::ptr_eq(&a.locate(), &b.locate()));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_registry_metrics_after_run() {
    let (registry, _collector) = enabled_registry(BatchPolicy::AtThreadStop);
    for _ in 0..3 {
        on_thread(&registry, |ctx| {
            let _a = scope(ctx, "a");
            let _b = scope(ctx, "b");
        });
    }
    let metrics = registry.metrics();
    assert_eq!(metrics.threads_started, 3);
    assert_eq!(metrics.threads_stopped, 3);
    assert_eq!(metrics.threads_running(), 0);
    assert_eq!(metrics.frames_recorded, 9);
    assert_eq!(metrics.frames_pending(), 0);
}

#[test]
fn test_disabled_registry_records_nothing() {
    let (registry, collector) = enabled_registry(BatchPolicy::EveryFrame);
    registry.set_enabled(false);

    let id = on_thread(&registry, |ctx| {
        let guard = scope(ctx, "skipped");
        assert!(!guard.is_recording());
    });

    assert_eq!(collector.in_situ_count(), 1);
    let names: Vec<_> = collector.all_frames(id).iter().map(Frame::name).collect();
    assert_eq!(names, [""]);
}
