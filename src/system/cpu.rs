//! Per-core processor load sampling.
//!
//! Three loops share one [`CpuShared`]: `prepare` takes two counter
//! collections one interval apart and stages the formatted array, `process`
//! turns staged arrays into sorted snapshots and publishes them, and `load`
//! tracks this process's own CPU usage on the side.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::control::{SamplerControl, SamplerSettings};
use super::error::{SampleError, SampleResult};
use super::safe_lock::SafeLock;
use super::slot::{PublishSlot, SnapshotRef};
use super::source::{CounterArray, CpuSource, ProcessTimes, TOTAL_INSTANCE};
use super::worker_pool::WorkerPool;

/// Raw arrays waiting to be processed. The oldest is dropped beyond this.
const STAGE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoreLoad {
    pub core_id: u32,
    pub load_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuSnapshot {
    /// Ascending by numeric core id.
    pub per_core: Vec<CoreLoad>,
    /// Mean of the last few `_Total` readings.
    pub total_load_avg: f64,
    pub buffer_size: usize,
    pub raw_item_count: usize,
}

/// Fixed-length rolling window over the aggregate load.
#[derive(Debug, Clone)]
pub struct LoadWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LoadWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Arithmetic mean, or 0 before the first reading.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Numeric id of a per-core instance name such as `"3"`, `"cpu10"` or `"0,3"`.
///
/// Leading non-digits are skipped and the first run of digits is the id.
pub fn parse_core_id(name: &str) -> Option<u32> {
    let digits: String = name
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Split a raw array into the rolling `_Total` average and sorted per-core rows.
pub fn build_snapshot(raw: &CounterArray, window: &mut LoadWindow) -> CpuSnapshot {
    let mut per_core = Vec::with_capacity(raw.items.len());
    for item in &raw.items {
        if item.name == TOTAL_INSTANCE {
            window.push(item.value);
            continue;
        }
        match parse_core_id(&item.name) {
            Some(core_id) => per_core.push(CoreLoad {
                core_id,
                load_percent: item.value,
            }),
            None => tracing::debug!(name = %item.name, "skipping counter row without a core id"),
        }
    }
    per_core.sort_by_key(|core| core.core_id);

    CpuSnapshot {
        per_core,
        total_load_avg: window.mean(),
        buffer_size: raw.buffer_size,
        raw_item_count: raw.items.len(),
    }
}

/// CPU load of one process between two readings, in percent of the whole
/// machine and clamped to `[0, 100]`.
///
/// Zero without a previous reading or when no wall time has passed.
pub fn process_load(previous: Option<ProcessTimes>, now: ProcessTimes, cores: usize) -> f64 {
    let Some(previous) = previous else {
        return 0.0;
    };
    let elapsed = now.wall.saturating_sub(previous.wall);
    if elapsed.is_zero() {
        return 0.0;
    }
    let busy = now.system.saturating_sub(previous.system) + now.user.saturating_sub(previous.user);
    let percent = busy.as_secs_f64() / elapsed.as_secs_f64() / cores.max(1) as f64 * 100.0;
    percent.clamp(0.0, 100.0)
}

struct StageQueue {
    raw: VecDeque<CounterArray>,
    open: bool,
}

struct CpuShared {
    control: SamplerControl,
    slot: PublishSlot<CpuSnapshot>,
    source: Mutex<Box<dyn CpuSource>>,
    stage: SafeLock<StageQueue>,
    window: Mutex<LoadWindow>,
    cores: usize,
    total_load: AtomicU64,
    own_load: AtomicU64,
}

impl CpuShared {
    /// Two collections one interval apart, then the formatted array.
    fn prepare(&self, generation: u64) -> SampleResult<CounterArray> {
        let first = self.source.lock().collect();
        if !self.control.sleep_interval(generation) {
            return Err(SampleError::Stopped);
        }
        first?;

        let mut source = self.source.lock();
        source.collect()?;
        source.formatted_counters()
    }

    /// Queue a raw array for processing unless its run has already ended.
    fn stage(&self, generation: u64, raw: CounterArray) {
        self.stage.update(|stage| {
            if !self.control.is_current(generation) {
                return;
            }
            if stage.raw.len() >= STAGE_CAPACITY {
                stage.raw.pop_front();
                tracing::trace!("cpu stage queue full, dropped oldest sample");
            }
            stage.raw.push_back(raw);
        });
    }

    /// Next staged array, or `None` once this generation is over.
    fn next_raw(&self, generation: u64) -> Option<CounterArray> {
        let mut stage = self.stage.lock();
        loop {
            self.stage.wait_while(&mut stage, |stage| {
                stage.raw.is_empty() && stage.open && self.control.is_current(generation)
            });
            if !stage.open || !self.control.is_current(generation) {
                return None;
            }
            if let Some(raw) = stage.raw.pop_front() {
                return Some(raw);
            }
        }
    }
}

fn prepare_loop(shared: &CpuShared, generation: u64) {
    while shared.control.is_current(generation) {
        let _span = tracing::debug_span!("cpu.prepare").entered();
        match shared.prepare(generation) {
            Ok(raw) => shared.stage(generation, raw),
            Err(SampleError::Stopped) => break,
            Err(err) => tracing::warn!(%err, "discarding cpu counter sample"),
        }
    }
    tracing::debug!(generation, "cpu prepare loop exited");
}

fn process_loop(shared: &CpuShared, generation: u64) {
    while let Some(raw) = shared.next_raw(generation) {
        let _span = tracing::debug_span!("cpu.process", items = raw.items.len()).entered();
        // `run` resets the window under this lock, so a stale generation
        // either publishes before the reset or not at all.
        let mut window = shared.window.lock();
        if !shared.control.is_current(generation) {
            break;
        }
        let snapshot = build_snapshot(&raw, &mut window);
        shared
            .total_load
            .store(snapshot.total_load_avg.to_bits(), Ordering::Relaxed);
        shared.slot.publish(snapshot);
    }
    tracing::debug!(generation, "cpu process loop exited");
}

fn load_loop(shared: &CpuShared, generation: u64) {
    let mut previous = None;
    while shared.control.is_current(generation) {
        let span = tracing::debug_span!("cpu.load").entered();
        let reading = shared.source.lock().current_process_times();
        match reading {
            Ok(now) => {
                let load = process_load(previous, now, shared.cores);
                shared.own_load.store(load.to_bits(), Ordering::Relaxed);
                previous = Some(now);
            }
            Err(err) => tracing::warn!(%err, "current process cpu times unavailable"),
        }
        drop(span);
        if !shared.control.sleep_interval(generation) {
            break;
        }
    }
}

/// Samples per-core load on the shared worker pool.
pub struct CpuSampler {
    shared: Arc<CpuShared>,
    pool: Arc<WorkerPool>,
}

impl CpuSampler {
    pub fn new(pool: Arc<WorkerPool>, source: Box<dyn CpuSource>, settings: SamplerSettings) -> Self {
        let cores = source.core_count();
        let shared = CpuShared {
            control: SamplerControl::new(settings.interval),
            slot: PublishSlot::new(settings.grace_period),
            source: Mutex::new(source),
            stage: SafeLock::new(StageQueue {
                raw: VecDeque::new(),
                open: false,
            }),
            window: Mutex::new(LoadWindow::new(settings.load_window)),
            cores,
            total_load: AtomicU64::new(0.0_f64.to_bits()),
            own_load: AtomicU64::new(0.0_f64.to_bits()),
        };
        Self {
            shared: Arc::new(shared),
            pool,
        }
    }

    /// Start the sampling loops. Returns `false` if already running.
    pub fn run(&self) -> bool {
        let Some(generation) = self.shared.control.start() else {
            return false;
        };
        self.shared.stage.update(|stage| {
            stage.raw.clear();
            stage.open = true;
        });
        // Nothing from a previous run may leak into this one.
        {
            let mut window = self.shared.window.lock();
            *window = LoadWindow::new(window.capacity());
        }
        self.shared.total_load.store(0.0_f64.to_bits(), Ordering::Relaxed);
        self.shared.own_load.store(0.0_f64.to_bits(), Ordering::Relaxed);
        self.shared.slot.reset();
        self.shared.slot.open();

        let loops: [fn(&CpuShared, u64); 3] = [prepare_loop, process_loop, load_loop];
        for body in loops {
            let shared = Arc::clone(&self.shared);
            self.pool.queue(move || body(&shared, generation));
        }
        tracing::debug!(generation, cores = self.shared.cores, "cpu sampler started");
        true
    }

    /// Stop the loops. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        let was_running = self.shared.control.stop();
        self.shared.stage.update(|stage| stage.open = false);
        self.shared.slot.close();
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.shared.control.is_running()
    }

    /// The latest snapshot, waiting at most the grace period for a first one.
    pub fn get_data(&self) -> Option<SnapshotRef<'_, CpuSnapshot>> {
        debug_assert!(self.is_running(), "get_data on a stopped cpu sampler");
        self.shared.slot.get()
    }

    pub fn set_update_interval(&self, interval: impl Into<Duration>) {
        self.shared.control.set_interval(interval.into());
    }

    pub fn update_interval(&self) -> Duration {
        self.shared.control.interval()
    }

    pub fn num_processors(&self) -> usize {
        self.shared.cores
    }

    /// Rolling `_Total` average as of the last processed sample.
    pub fn current_load(&self) -> f64 {
        f64::from_bits(self.shared.total_load.load(Ordering::Relaxed))
    }

    /// CPU load of this process, recomputed once per interval.
    pub fn current_process_load(&self) -> f64 {
        f64::from_bits(self.shared.own_load.load(Ordering::Relaxed))
    }
}

impl Drop for CpuSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::ScriptedCpu;
    use crate::system::source::CounterItem;
    use proptest::prelude::*;
    use std::time::Instant;

    fn raw(items: &[(&str, f64)]) -> CounterArray {
        CounterArray::from_items(
            items
                .iter()
                .map(|(name, value)| CounterItem::new(*name, *value))
                .collect(),
        )
    }

    fn times(wall_ms: u64, system_ms: u64, user_ms: u64) -> ProcessTimes {
        ProcessTimes {
            wall: Duration::from_millis(wall_ms),
            system: Duration::from_millis(system_ms),
            user: Duration::from_millis(user_ms),
        }
    }

    #[test]
    fn snapshot_sorts_cores_numerically() {
        let mut window = LoadWindow::new(3);
        let snapshot = build_snapshot(
            &raw(&[("10", 1.0), ("9", 2.0), ("_Total", 50.0), ("0", 3.0), ("2", 4.0)]),
            &mut window,
        );
        let ids: Vec<u32> = snapshot.per_core.iter().map(|c| c.core_id).collect();
        assert_eq!(ids, vec![0, 2, 9, 10]);
        assert_eq!(snapshot.total_load_avg, 50.0);
        assert_eq!(snapshot.raw_item_count, 5);
    }

    #[test]
    fn total_load_is_mean_of_last_three() {
        let mut window = LoadWindow::new(3);
        for total in [10.0, 20.0, 30.0, 60.0] {
            build_snapshot(&raw(&[("_Total", total), ("0", 1.0)]), &mut window);
        }
        assert_eq!(window.len(), 3);
        assert!((window.mean() - (20.0 + 30.0 + 60.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rows_without_core_id_are_dropped() {
        let mut window = LoadWindow::new(3);
        let snapshot = build_snapshot(&raw(&[("idle", 1.0), ("cpu3", 2.0)]), &mut window);
        assert_eq!(snapshot.per_core.len(), 1);
        assert_eq!(snapshot.per_core[0].core_id, 3);
        assert_eq!(snapshot.total_load_avg, 0.0);
    }

    #[test]
    fn parses_core_names() {
        assert_eq!(parse_core_id("7"), Some(7));
        assert_eq!(parse_core_id("cpu12"), Some(12));
        assert_eq!(parse_core_id("0,3"), Some(0));
        assert_eq!(parse_core_id("_Total"), None);
        assert_eq!(parse_core_id(""), None);
    }

    #[test]
    fn process_load_uses_deltas_per_core() {
        // 1s of wall time, 1s of CPU time across 4 cores = 25%.
        let load = process_load(Some(times(0, 0, 0)), times(1000, 400, 600), 4);
        assert!((load - 25.0).abs() < 1e-9);
    }

    #[test]
    fn process_load_guards_degenerate_inputs() {
        assert_eq!(process_load(None, times(1000, 10, 10), 4), 0.0);
        assert_eq!(process_load(Some(times(500, 0, 0)), times(500, 10, 10), 4), 0.0);
        // Zero cores counts as one.
        let single = process_load(Some(times(0, 0, 0)), times(1000, 0, 300), 0);
        assert!((single - 30.0).abs() < 1e-9);
        // Stale handle: times going backwards clamp to zero.
        assert_eq!(process_load(Some(times(0, 500, 500)), times(1000, 0, 0), 2), 0.0);
        // More CPU than wall time clamps to 100.
        assert_eq!(process_load(Some(times(0, 0, 0)), times(100, 0, 500), 1), 100.0);
    }

    #[test]
    fn sampler_publishes_sorted_snapshot() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedCpu::new(3).frame(&[("2", 30.0), ("_Total", 20.0), ("0", 10.0), ("1", 20.0)]);
        let settings = SamplerSettings {
            interval: Duration::from_millis(10),
            grace_period: Duration::from_millis(50),
            load_window: 3,
        };
        let sampler = CpuSampler::new(Arc::clone(&pool), Box::new(source), settings);
        assert!(sampler.run());
        assert!(!sampler.run());

        let deadline = Instant::now() + Duration::from_secs(5);
        let snapshot = loop {
            if let Some(data) = sampler.get_data() {
                break (*data).clone();
            }
            assert!(Instant::now() < deadline, "no cpu snapshot published");
        };
        let ids: Vec<u32> = snapshot.per_core.iter().map(|c| c.core_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(snapshot.total_load_avg, 20.0);
        assert_eq!(sampler.current_load(), 20.0);
        assert_eq!(sampler.num_processors(), 3);

        assert!(sampler.stop());
        assert!(!sampler.stop());
    }

    #[test]
    fn failed_frame_is_discarded() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedCpu::new(1)
            .failing_frame("query failed")
            .frame(&[("0", 42.0), ("_Total", 42.0)]);
        let settings = SamplerSettings::default().with_interval(Duration::from_millis(5));
        let sampler = CpuSampler::new(Arc::clone(&pool), Box::new(source), settings);
        sampler.run();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(data) = sampler.get_data() {
                assert_eq!(data.per_core[0].load_percent, 42.0);
                break;
            }
            assert!(Instant::now() < deadline, "no cpu snapshot published");
        }
        sampler.stop();
    }

    #[test]
    fn own_process_load_follows_scripted_times() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        // Every reading adds 100ms wall and 50ms user time on 1 core: 50%.
        let source = ScriptedCpu::new(1).process_step(times(100, 0, 50));
        let settings = SamplerSettings::default().with_interval(Duration::from_millis(5));
        let sampler = CpuSampler::new(Arc::clone(&pool), Box::new(source), settings);
        sampler.run();

        let deadline = Instant::now() + Duration::from_secs(5);
        while sampler.current_process_load() == 0.0 {
            assert!(Instant::now() < deadline, "process load never computed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!((sampler.current_process_load() - 50.0).abs() < 1e-9);
        sampler.stop();
    }

    #[test]
    fn update_interval_is_retunable() {
        let pool = Arc::new(WorkerPool::new());
        let sampler = CpuSampler::new(pool, Box::new(ScriptedCpu::new(1)), SamplerSettings::default());
        assert_eq!(sampler.update_interval(), Duration::from_millis(1000));
        sampler.set_update_interval(crate::system::time::TickRate::Slow);
        assert_eq!(sampler.update_interval(), Duration::from_millis(2000));
    }

    proptest! {
        #[test]
        fn per_core_rows_sorted_for_any_input_order(
            ids in proptest::collection::btree_set(0u32..256, 1..64),
            seed in any::<u64>(),
        ) {
            let mut items: Vec<CounterItem> = ids
                .iter()
                .map(|id| CounterItem::new(id.to_string(), f64::from(*id)))
                .collect();
            // Deterministic shuffle driven by the seed.
            let len = items.len();
            for i in 0..len {
                let j = ((seed.rotate_left(i as u32) ^ i as u64) % len as u64) as usize;
                items.swap(i, j);
            }
            items.push(CounterItem::new(TOTAL_INSTANCE, 1.0));

            let snapshot = build_snapshot(&CounterArray::from_items(items), &mut LoadWindow::new(3));
            let published: Vec<u32> = snapshot.per_core.iter().map(|c| c.core_id).collect();
            let expected: Vec<u32> = ids.into_iter().collect();
            prop_assert_eq!(published, expected);
        }
    }
}
