//! Test harness: a CPU that records context switches instead of performing
//! them.
//!
//! After `RecordingCpu::switch(prev, next)` returns, the test goes on acting
//! as `next`, i.e. as whatever `Kernel::current` reports.
#![allow(dead_code)]

use abyss::{Cpu, OutOfMemory, ThreadFn};
use kesched::{Kernel, SystemConfiguration, Tid};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Default)]
pub struct RecordingCpu {
    switches: Mutex<Vec<(Tid, Tid)>>,
    entries: Mutex<HashMap<Tid, ThreadFn>>,
    names: Mutex<HashMap<Tid, String>>,
    reclaimed: Mutex<Vec<Tid>>,
    fail_next: AtomicBool,
}

impl RecordingCpu {
    /// Every switch so far, as `(prev, next)`.
    pub fn switches(&self) -> Vec<(Tid, Tid)> {
        self.switches.lock().unwrap().clone()
    }

    /// The threads switched to, in order.
    pub fn dispatched(&self) -> Vec<Tid> {
        self.switches().into_iter().map(|(_, next)| next).collect()
    }

    /// Threads whose context was released.
    pub fn reclaimed(&self) -> Vec<Tid> {
        self.reclaimed.lock().unwrap().clone()
    }

    /// Makes the next `prepare` fail.
    pub fn fail_next_prepare(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn take_entry(&self, tid: Tid) -> Option<ThreadFn> {
        self.entries.lock().unwrap().remove(&tid)
    }

    pub fn name(&self, tid: Tid) -> Option<String> {
        self.names.lock().unwrap().get(&tid).cloned()
    }
}

impl Cpu for RecordingCpu {
    fn prepare(&self, tid: u64, name: &str, entry: ThreadFn) -> Result<(), OutOfMemory> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(OutOfMemory);
        }
        self.names.lock().unwrap().insert(tid, name.to_string());
        self.entries.lock().unwrap().insert(tid, entry);
        Ok(())
    }

    fn switch(&self, prev: u64, next: u64) {
        self.switches.lock().unwrap().push((prev, next));
    }

    fn reclaim(&self, tid: u64) {
        self.reclaimed.lock().unwrap().push(tid);
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Boots and starts a kernel on a fresh [`RecordingCpu`].
pub fn boot(config: SystemConfiguration) -> (Arc<Kernel>, Arc<RecordingCpu>) {
    init_logger();
    let cpu = Arc::new(RecordingCpu::default());
    let kernel = Kernel::boot(config, cpu.clone());
    kernel.start().unwrap();
    (kernel, cpu)
}

pub fn boot_default() -> (Arc<Kernel>, Arc<RecordingCpu>) {
    boot(SystemConfiguration::default())
}

/// Runs the body of the current thread for the first time, until it exits.
///
/// Returns false if the current thread is idle or its body already ran.
pub fn run_current(kernel: &Kernel, cpu: &RecordingCpu) -> bool {
    let tid = kernel.current();
    if cpu.name(tid).as_deref() == Some("idle") {
        return false;
    }
    match cpu.take_entry(tid) {
        Some(entry) => {
            entry();
            true
        }
        None => false,
    }
}

/// Runs thread bodies until only the idle thread is left to run.
pub fn run_to_idle(kernel: &Kernel, cpu: &RecordingCpu) {
    while run_current(kernel, cpu) {}
}

pub fn effective(kernel: &Kernel, tid: Tid) -> u8 {
    kernel.thread_info(tid).unwrap().effective_priority
}
