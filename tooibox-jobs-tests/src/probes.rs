// SPDX-License-Identifier: MIT

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Detects two jobs running at once on the same thread-backed executor.
///
/// Each job calls [`ExclusionProbe::enter`] on start; the returned guard
/// clears the flag when dropped. Workers are told apart by thread name.
#[derive(Debug, Default)]
pub struct ExclusionProbe {
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
    violations: AtomicUsize,
}

pub struct ExclusionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ExclusionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ExclusionProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(&self) -> ExclusionGuard {
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        let flag = self
            .running
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .clone();
        if flag.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        ExclusionGuard { flag }
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn threads_seen(&self) -> usize {
        self.running.lock().unwrap().len()
    }
}

/// Records which job ids ran, flagging any id that ran twice.
#[derive(Debug, Default)]
pub struct RunLedger {
    seen: Mutex<HashSet<u64>>,
    duplicates: AtomicUsize,
}

impl RunLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, id: u64) {
        if !self.seen.lock().unwrap().insert(id) {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }
}
