use binaryvis_sampler::{Config, Sampler, SamplerError, Scheduler, SchedulingError, UniformSampler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn source(len: usize) -> Arc<Vec<u8>> {
    Arc::new((0..len).map(|i| (i % 251) as u8).collect())
}

#[test]
fn rapid_range_changes_settle_on_last_request() {
    init_tracing();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.create_topic("visualization", 4).unwrap();
    let data = source(1 << 20);
    let sampler = Sampler::with_scheduler(
        Arc::clone(&data),
        UniformSampler::new(),
        scheduler,
        "visualization",
    );
    sampler.allow_async(true);
    sampler.set_sample_size(4096).unwrap();

    let applied = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&applied);
    sampler.register_callback(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut last = (0, 0);
    for i in 0..100 {
        let start = (i * 7919) % (1 << 19);
        let end = start + (1 << 18) + i;
        sampler.set_range(start, end).unwrap();
        last = (start, end);
    }

    let guard = sampler.wait_and_lock().unwrap();
    assert_eq!(guard.range(), last);
    assert_eq!(guard.sample_size(), 4096);
    assert_eq!(guard.file_offset(0), last.0);
    assert_eq!(guard.file_offset(guard.sample_size()), last.1);
    // 两端的偏移是固定的，只检查内部
    for i in 1..guard.sample_size() - 1 {
        assert_eq!(guard.byte(i), data[guard.file_offset(i)]);
    }
    drop(guard);

    let applied = applied.load(Ordering::SeqCst);
    assert!(applied >= 1);
}

#[test]
fn readers_see_consistent_samples_while_resampling() {
    init_tracing();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.create_topic("viz", 2).unwrap();
    let data = source(200_000);
    let sampler = Arc::new(Sampler::with_scheduler(
        Arc::clone(&data),
        UniformSampler::new(),
        scheduler,
        "viz",
    ));
    sampler.allow_async(true);
    sampler.set_sample_size(2500).unwrap();
    sampler.wait().unwrap();

    let reader = {
        let sampler = Arc::clone(&sampler);
        let data = Arc::clone(&data);
        thread::spawn(move || {
            for _ in 0..200 {
                let guard = sampler.lock();
                let (start, end) = guard.range();
                assert_eq!(guard.raw_bytes().len(), guard.sample_size());
                let size = guard.sample_size();
                for i in 0..size {
                    let offset = guard.file_offset(i);
                    assert!(offset >= start && offset < end);
                    if i > 0 && i < size - 1 {
                        assert_eq!(guard.byte(i), data[offset]);
                    }
                }
            }
        })
    };

    for _ in 0..50 {
        sampler.resample().unwrap();
    }
    reader.join().unwrap();
    sampler.wait().unwrap();
    assert!(sampler.is_finished());
}

#[test]
fn sampler_from_config() {
    init_tracing();

    let config = Config {
        topic: "config-topic".to_string(),
        workers: 1,
        allow_async: true,
        sample_size: 100,
        window_size: 4,
    };
    let scheduler = Scheduler::from_config(&config).unwrap();
    let sampler = Sampler::from_config(source(10_000), &config, scheduler).unwrap();

    sampler.wait().unwrap();
    assert_eq!(sampler.requested_sample_size(), 100);
    assert_eq!(sampler.sample_size(), 100);
    let metadata = sampler.metadata();
    assert_eq!(metadata.method, "uniform");
    assert_eq!(metadata.original_size, 10_000);
}

#[test]
fn scheduler_errors_are_values() {
    let scheduler = Scheduler::new();
    scheduler.create_topic("t", 0).unwrap();
    assert!(matches!(
        scheduler.submit("t", || {}),
        Err(SchedulingError::NoWorkers(_))
    ));
    assert!(matches!(
        scheduler.submit("nope", || {}),
        Err(SchedulingError::UnknownTopic(_))
    ));

    let error: SamplerError = SchedulingError::UnknownTopic("nope".to_string()).into();
    assert_eq!(error.to_string(), "Unknown topic: nope");
}
