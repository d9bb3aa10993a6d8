use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::control::{SamplerControl, SamplerSettings};
use super::error::SampleResult;
use super::slot::{PublishSlot, SnapshotRef};
use super::source::{MemorySource, ProcessMemory, SystemMemory};
use super::worker_pool::WorkerPool;

const BYTES_PER_KB: u64 = 1024;
const BYTES_PER_MB: u64 = BYTES_PER_KB * 1024;

/// A byte count. Scaled units are derived by integer division on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Bytes(pub u64);

impl Bytes {
    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn kb(self) -> u64 {
        self.0 / BYTES_PER_KB
    }

    pub fn mb(self) -> u64 {
        self.0 / BYTES_PER_MB
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub total_physical: u64,
    pub avail_physical: u64,
    pub used_physical: u64,
    pub total_virtual: u64,
    pub avail_virtual: u64,
    pub used_virtual: u64,
    pub process_working_set: u64,
    pub process_private_usage: u64,
}

impl MemorySnapshot {
    fn apply_system(&mut self, system: SystemMemory) {
        self.total_physical = system.total_physical;
        self.avail_physical = system.avail_physical;
        self.used_physical = system.total_physical.saturating_sub(system.avail_physical);
        self.total_virtual = system.total_virtual;
        self.avail_virtual = system.avail_virtual;
        self.used_virtual = system.total_virtual.saturating_sub(system.avail_virtual);
    }

    fn apply_process(&mut self, process: ProcessMemory) {
        self.process_working_set = process.working_set;
        self.process_private_usage = process.private_usage;
    }

    pub fn total_physical(&self) -> Bytes {
        Bytes(self.total_physical)
    }

    pub fn avail_physical(&self) -> Bytes {
        Bytes(self.avail_physical)
    }

    pub fn used_physical(&self) -> Bytes {
        Bytes(self.used_physical)
    }

    pub fn total_virtual(&self) -> Bytes {
        Bytes(self.total_virtual)
    }

    pub fn avail_virtual(&self) -> Bytes {
        Bytes(self.avail_virtual)
    }

    pub fn used_virtual(&self) -> Bytes {
        Bytes(self.used_virtual)
    }

    pub fn process_working_set(&self) -> Bytes {
        Bytes(self.process_working_set)
    }

    pub fn process_private_usage(&self) -> Bytes {
        Bytes(self.process_private_usage)
    }

    /// Used physical memory in percent of total, 0 when the total is unknown.
    pub fn memory_load_percent(&self) -> f64 {
        if self.total_physical == 0 {
            return 0.0;
        }
        self.used_physical as f64 / self.total_physical as f64 * 100.0
    }
}

struct MemoryShared {
    control: SamplerControl,
    slot: PublishSlot<MemorySnapshot>,
    source: Mutex<Box<dyn MemorySource>>,
    current: RwLock<MemorySnapshot>,
}

impl MemoryShared {
    /// Apply one half of the snapshot and publish a copy of the whole.
    fn merge(&self, generation: u64, apply: impl FnOnce(&mut MemorySnapshot)) {
        let mut current = self.current.write();
        if !self.control.is_current(generation) {
            return;
        }
        apply(&mut *current);
        // Publish under the guard so publish order follows merge order.
        self.slot.publish(*current);
    }
}

/// A failed read yields zeros rather than the previous values.
fn or_zeroed<T: Default>(reading: SampleResult<T>, what: &str) -> T {
    reading.unwrap_or_else(|err| {
        tracing::warn!(%err, what, "memory query failed, reporting zero");
        T::default()
    })
}

fn system_loop(shared: &MemoryShared, generation: u64) {
    while shared.control.is_current(generation) {
        {
            let _span = tracing::debug_span!("memory.system").entered();
            let reading = shared.source.lock().system_memory();
            let system = or_zeroed(reading, "system");
            shared.merge(generation, |snapshot| snapshot.apply_system(system));
        }
        if !shared.control.sleep_interval(generation) {
            break;
        }
    }
}

fn process_loop(shared: &MemoryShared, generation: u64) {
    while shared.control.is_current(generation) {
        {
            let _span = tracing::debug_span!("memory.process").entered();
            let reading = shared.source.lock().process_memory();
            let process = or_zeroed(reading, "process");
            shared.merge(generation, |snapshot| snapshot.apply_process(process));
        }
        if !shared.control.sleep_interval(generation) {
            break;
        }
    }
}

/// System and current-process memory counters, refreshed by two loops.
pub struct MemorySampler {
    shared: Arc<MemoryShared>,
    pool: Arc<WorkerPool>,
}

impl MemorySampler {
    pub fn new(
        pool: Arc<WorkerPool>,
        source: Box<dyn MemorySource>,
        settings: SamplerSettings,
    ) -> Self {
        let shared = MemoryShared {
            control: SamplerControl::new(settings.interval),
            slot: PublishSlot::new(settings.grace_period),
            source: Mutex::new(source),
            current: RwLock::new(MemorySnapshot::default()),
        };
        Self {
            shared: Arc::new(shared),
            pool,
        }
    }

    pub fn run(&self) -> bool {
        let Some(generation) = self.shared.control.start() else {
            return false;
        };
        *self.shared.current.write() = MemorySnapshot::default();
        self.shared.slot.reset();
        self.shared.slot.open();
        let loops: [fn(&MemoryShared, u64); 2] = [system_loop, process_loop];
        for body in loops {
            let shared = Arc::clone(&self.shared);
            self.pool.queue(move || body(&shared, generation));
        }
        tracing::debug!(generation, "memory sampler started");
        true
    }

    pub fn stop(&self) -> bool {
        let was_running = self.shared.control.stop();
        self.shared.slot.close();
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.shared.control.is_running()
    }

    pub fn get_data(&self) -> Option<SnapshotRef<'_, MemorySnapshot>> {
        debug_assert!(self.is_running(), "get_data on a stopped memory sampler");
        self.shared.slot.get()
    }

    pub fn set_update_interval(&self, interval: impl Into<Duration>) {
        self.shared.control.set_interval(interval.into());
    }

    pub fn update_interval(&self) -> Duration {
        self.shared.control.interval()
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        self.stop();
    }
}
