// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tooibox_jobs::{Affinity, EngineError, JobHandle, JobStatus, RoundRobinSelector, Severity};
use tooibox_jobs_tests::probes::{ExclusionProbe, RunLedger};
use tooibox_jobs_tests::recording_sink::RecordingSink;
use tooibox_jobs_tests::{engine_with_selector, quiet_engine, PinnedSelector};

const SUBMITTERS: usize = 4;
const JOBS_PER_SUBMITTER: usize = 250;

#[test]
fn test_concurrent_submitters_run_every_job_once() {
    let engine = quiet_engine(4);
    let ledger = RunLedger::new();

    thread::scope(|s| {
        for submitter in 0..SUBMITTERS {
            let engine = &engine;
            let ledger = ledger.clone();
            s.spawn(move || {
                let mut rng = rand::rng();
                for i in 0..JOBS_PER_SUBMITTER {
                    let id = (submitter * JOBS_PER_SUBMITTER + i) as u64;
                    let affinity = if rng.random_bool(0.2) {
                        Affinity::Foreground
                    } else {
                        Affinity::Worker
                    };
                    let ledger = ledger.clone();
                    let handle = engine
                        .submit(affinity, move || {
                            ledger.record(id);
                            Ok(())
                        })
                        .unwrap_or_else(|e| panic!("submit failed: {e}"));
                    engine.release(handle);
                }
            });
        }

        // the foreground thread keeps pumping while the others submit
        for _ in 0..20 {
            engine.pump_foreground().unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });

    let report = engine.shutdown();
    assert_eq!(report.cancelled, 0);
    assert_eq!(ledger.count(), SUBMITTERS * JOBS_PER_SUBMITTER);
    assert_eq!(ledger.duplicates(), 0);
}

#[test]
fn test_failing_jobs_do_not_affect_others() {
    let engine = quiet_engine(2);

    let handles: Vec<(usize, JobHandle)> = (0..30usize)
        .map(|i| {
            let handle = engine
                .submit(Affinity::Worker, move || match i % 3 {
                    0 => Ok(i),
                    1 => anyhow::bail!("job {i} refused"),
                    _ => panic!("job {i} blew up"),
                })
                .unwrap();
            (i, handle)
        })
        .collect();

    for (i, handle) in handles {
        assert!(engine.wait(handle).unwrap().is_terminal());
        let outcome = engine.take_result(handle).unwrap();
        match i % 3 {
            0 => assert_eq!(outcome.into_result::<usize>().unwrap(), i),
            1 => {
                let failure = outcome.failure().unwrap();
                assert!(!failure.panicked);
                assert!(failure.message.contains("refused"));
            }
            _ => {
                let failure = outcome.failure().unwrap();
                assert!(failure.panicked);
                assert!(failure.message.contains("blew up"));
            }
        }
    }

    // workers survived the panics
    let handle = engine.submit(Affinity::Worker, || Ok("still alive")).unwrap();
    engine.wait(handle).unwrap();
    assert_eq!(engine.take_value::<&str>(handle).unwrap(), "still alive");
}

#[test]
fn test_jobs_on_one_executor_run_in_submission_order() {
    let engine = quiet_engine(4);
    let order: Arc<Mutex<Vec<(String, usize)>>> = Arc::default();

    for i in 0..400 {
        let order = order.clone();
        let handle = engine
            .submit(Affinity::Worker, move || {
                let name = thread::current().name().unwrap_or_default().to_string();
                order.lock().unwrap().push((name, i));
                Ok(())
            })
            .unwrap();
        engine.release(handle);
    }
    engine.shutdown();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 400);
    let mut per_worker: HashMap<&str, Vec<usize>> = HashMap::new();
    for (name, i) in order.iter() {
        per_worker.entry(name.as_str()).or_default().push(*i);
    }
    for (name, seq) in per_worker {
        assert!(
            seq.windows(2).all(|w| w[0] < w[1]),
            "{name} ran jobs out of order: {seq:?}"
        );
    }
}

#[test]
fn test_pinned_jobs_stay_on_one_worker_in_order() {
    let engine = engine_with_selector(3, Box::new(PinnedSelector(1)));
    let order: Arc<Mutex<Vec<usize>>> = Arc::default();

    for i in 0..50 {
        let order = order.clone();
        let handle = engine
            .submit(Affinity::Worker, move || {
                order.lock().unwrap().push(i);
                Ok(())
            })
            .unwrap();
        engine.release(handle);
    }
    engine.shutdown();

    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    let per_worker: Vec<u64> = engine.workers().iter().map(|w| w.executed()).collect();
    assert_eq!(per_worker, vec![0, 50, 0]);
}

#[test]
fn test_a_worker_runs_one_job_at_a_time() {
    let engine = quiet_engine(4);
    let probe = ExclusionProbe::new();

    let handles: Vec<JobHandle> = (0..200)
        .map(|_| {
            let probe = probe.clone();
            engine
                .submit(Affinity::Worker, move || {
                    let _guard = probe.enter();
                    thread::sleep(Duration::from_micros(200));
                    Ok(())
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        assert_eq!(engine.wait(handle).unwrap(), JobStatus::Completed);
    }

    assert_eq!(probe.violations(), 0);
    assert!(probe.threads_seen() <= 4);
}

#[test]
fn test_pump_without_foreground_jobs_is_a_no_op() {
    let engine = quiet_engine(1);
    assert_eq!(engine.pump_foreground().unwrap(), 0);
    assert_eq!(engine.pump_foreground().unwrap(), 0);
    assert_eq!(engine.foreground_executor().executed(), 0);
}

#[test]
fn test_foreground_jobs_only_run_when_pumped() {
    let engine = quiet_engine(2);
    let ran = Arc::new(AtomicUsize::new(0));

    let handles: Vec<JobHandle> = (0..5)
        .map(|_| {
            let ran = ran.clone();
            engine
                .submit(Affinity::Foreground, move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(engine.status(handles[0]).unwrap(), JobStatus::Pending);

    assert_eq!(engine.pump_foreground().unwrap(), 5);
    assert_eq!(ran.load(Ordering::SeqCst), 5);
    for handle in handles {
        assert!(engine.is_done(handle).unwrap());
    }
}

#[test]
fn test_stale_and_invalid_handles_are_rejected() {
    let engine = quiet_engine(1);

    assert!(engine.resolve(JobHandle::invalid()).is_none());
    assert!(matches!(
        engine.status(JobHandle::default()),
        Err(EngineError::NotFound(_))
    ));

    let handle = engine.submit(Affinity::Worker, || Ok(1u8)).unwrap();
    engine.wait(handle).unwrap();
    assert_eq!(engine.take_value::<u8>(handle).unwrap(), 1);

    // the slot is gone; a new job reusing it gets a different generation
    assert!(engine.resolve(handle).is_none());
    let next = engine.submit(Affinity::Worker, || Ok(2u8)).unwrap();
    assert_ne!(next, handle);
    assert!(engine.resolve(handle).is_none());
    assert!(matches!(
        engine.take_result(handle),
        Err(EngineError::NotFound(_))
    ));
    assert!(!engine.release(handle));
}

#[test]
fn test_shutdown_drains_queued_jobs() {
    let engine = engine_with_selector(3, Box::new(RoundRobinSelector::new()));
    let ledger = RunLedger::new();

    for i in 0..300u64 {
        let ledger = ledger.clone();
        let handle = engine
            .submit(Affinity::Worker, move || {
                ledger.record(i);
                Ok(())
            })
            .unwrap();
        engine.release(handle);
    }
    for i in 300..310u64 {
        let ledger = ledger.clone();
        let handle = engine
            .submit(Affinity::Foreground, move || {
                ledger.record(i);
                Ok(())
            })
            .unwrap();
        engine.release(handle);
    }

    let report = engine.shutdown();
    assert_eq!(report.cancelled, 0);
    assert_eq!(ledger.count(), 310);
    assert!(engine.is_shut_down());
    assert_eq!(engine.tracked_jobs(), 0);
    let per_worker: Vec<u64> = engine.workers().iter().map(|w| w.executed()).collect();
    assert_eq!(per_worker, vec![100, 100, 100]);
}

#[test]
fn test_failures_are_logged_with_the_job_description() {
    let sink = Arc::new(RecordingSink::new());
    let engine = tooibox_jobs::JobEngine::builder()
        .config(tooibox_jobs::EngineConfig {
            workers: Some(1),
            ..Default::default()
        })
        .sink(sink.clone())
        .build()
        .unwrap();

    let handle = engine
        .submit_named("load texture", Affinity::Worker, || -> anyhow::Result<()> {
            anyhow::bail!("file missing")
        })
        .unwrap();
    assert_eq!(engine.wait(handle).unwrap(), JobStatus::Failed);
    engine.shutdown();

    assert!(sink.contains(Severity::Warning, "load texture"));
    assert!(sink.contains(Severity::Warning, "file missing"));
    assert!(sink.contains(Severity::Info, "job engine stopped"));
}
