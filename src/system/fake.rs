//! Scripted OS sources for tests, benches and demos.
//!
//! Each source replays what it was given without touching the host. The
//! process and memory sources hand out a shared handle so a test can change
//! what the next pass observes while a sampler is running.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::error::{SampleError, SampleResult};
use super::source::{
    CounterArray, CounterItem, CpuSource, MemorySource, ProcessMemory, ProcessRecord,
    ProcessSource, ProcessTimes, SystemMemory,
};

/// Replays a queue of counter frames, then repeats the last good one.
pub struct ScriptedCpu {
    frames: VecDeque<SampleResult<CounterArray>>,
    last: Option<CounterArray>,
    cores: usize,
    collections: Arc<AtomicUsize>,
    process_times: ProcessTimes,
    process_step: ProcessTimes,
}

impl ScriptedCpu {
    pub fn new(cores: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            last: None,
            cores,
            collections: Arc::new(AtomicUsize::new(0)),
            process_times: ProcessTimes::default(),
            process_step: ProcessTimes::default(),
        }
    }

    /// Queue one frame given as `(instance name, value)` pairs.
    pub fn frame(mut self, items: &[(&str, f64)]) -> Self {
        let items = items
            .iter()
            .map(|(name, value)| CounterItem::new(*name, *value))
            .collect();
        self.frames.push_back(Ok(CounterArray::from_items(items)));
        self
    }

    pub fn failing_frame(mut self, detail: &str) -> Self {
        self.frames
            .push_back(Err(SampleError::query("formatted_counters", detail)));
        self
    }

    /// Each `current_process_times` call advances the reading by `step`.
    pub fn process_step(mut self, step: ProcessTimes) -> Self {
        self.process_step = step;
        self
    }

    /// Counter of `collect` calls, readable after the source is moved into a sampler.
    pub fn collections(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.collections)
    }
}

impl CpuSource for ScriptedCpu {
    fn collect(&mut self) -> SampleResult<()> {
        self.collections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn formatted_counters(&mut self) -> SampleResult<CounterArray> {
        match self.frames.pop_front() {
            Some(Ok(frame)) => {
                self.last = Some(frame.clone());
                Ok(frame)
            }
            Some(Err(err)) => Err(err),
            None => self
                .last
                .clone()
                .ok_or(SampleError::Unavailable("scripted counter frame")),
        }
    }

    fn core_count(&self) -> usize {
        self.cores
    }

    fn current_process_times(&mut self) -> SampleResult<ProcessTimes> {
        self.process_times.wall += self.process_step.wall;
        self.process_times.system += self.process_step.system;
        self.process_times.user += self.process_step.user;
        Ok(self.process_times)
    }
}

#[derive(Debug, Default)]
struct MemoryScript {
    system: Option<SystemMemory>,
    process: Option<ProcessMemory>,
}

/// Shared handle onto a [`ScriptedMemory`]. `None` makes the next read fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryScriptHandle(Arc<Mutex<MemoryScript>>);

impl MemoryScriptHandle {
    pub fn set_system(&self, system: Option<SystemMemory>) {
        self.0.lock().system = system;
    }

    pub fn set_process(&self, process: Option<ProcessMemory>) {
        self.0.lock().process = process;
    }
}

#[derive(Debug, Default)]
pub struct ScriptedMemory {
    script: MemoryScriptHandle,
}

impl ScriptedMemory {
    pub fn new(system: SystemMemory, process: ProcessMemory) -> Self {
        let script = MemoryScriptHandle::default();
        script.set_system(Some(system));
        script.set_process(Some(process));
        Self { script }
    }

    pub fn handle(&self) -> MemoryScriptHandle {
        self.script.clone()
    }
}

impl MemorySource for ScriptedMemory {
    fn system_memory(&mut self) -> SampleResult<SystemMemory> {
        self.script
            .0
            .lock()
            .system
            .ok_or_else(|| SampleError::query("system_memory", "scripted failure"))
    }

    fn process_memory(&mut self) -> SampleResult<ProcessMemory> {
        self.script
            .0
            .lock()
            .process
            .ok_or_else(|| SampleError::query("process_memory", "scripted failure"))
    }
}

#[derive(Debug, Default)]
struct ProcessScript {
    live: Option<Vec<ProcessRecord>>,
    passes: usize,
    tick: Duration,
}

/// Shared handle onto a [`ScriptedProcesses`].
#[derive(Debug, Clone, Default)]
pub struct ProcessScriptHandle(Arc<Mutex<ProcessScript>>);

impl ProcessScriptHandle {
    /// Replace the set of live processes seen by following passes.
    pub fn set_live(&self, records: Vec<ProcessRecord>) {
        self.0.lock().live = Some(records);
    }

    /// Make following passes fail until `set_live` is called again.
    pub fn fail(&self) {
        self.0.lock().live = None;
    }

    /// Number of enumeration passes served so far.
    pub fn passes(&self) -> usize {
        self.0.lock().passes
    }
}

/// Reports a settable process list. Each pass advances every process's wall
/// clock by `tick` and leaves its CPU times to what the records carry.
#[derive(Debug, Default)]
pub struct ScriptedProcesses {
    script: ProcessScriptHandle,
    cores: usize,
}

impl ScriptedProcesses {
    pub fn new(cores: usize, records: Vec<ProcessRecord>) -> Self {
        let script = ProcessScriptHandle::default();
        script.set_live(records);
        script.0.lock().tick = Duration::from_secs(1);
        Self { script, cores }
    }

    pub fn handle(&self) -> ProcessScriptHandle {
        self.script.clone()
    }
}

impl ProcessSource for ScriptedProcesses {
    fn enumerate(&mut self) -> SampleResult<Vec<ProcessRecord>> {
        let mut script = self.script.0.lock();
        script.passes += 1;
        let wall = script.tick * u32::try_from(script.passes).unwrap_or(u32::MAX);
        let records = script
            .live
            .clone()
            .ok_or_else(|| SampleError::query("enumerate", "scripted failure"))?;
        Ok(records
            .into_iter()
            .map(|mut record| {
                if let Some(times) = record.times.as_mut() {
                    times.wall = wall;
                }
                record
            })
            .collect())
    }

    fn core_count(&self) -> usize {
        self.cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_script_repeats_last_good_frame() {
        let mut cpu = ScriptedCpu::new(2)
            .frame(&[("_Total", 10.0), ("0", 5.0)])
            .failing_frame("counter gone");
        assert_eq!(cpu.formatted_counters().unwrap().items.len(), 2);
        assert!(cpu.formatted_counters().is_err());
        assert_eq!(cpu.formatted_counters().unwrap().items[0].value, 10.0);
    }

    #[test]
    fn empty_cpu_script_is_unavailable() {
        let mut cpu = ScriptedCpu::new(1);
        assert_eq!(
            cpu.formatted_counters(),
            Err(SampleError::Unavailable("scripted counter frame"))
        );
    }

    #[test]
    fn process_script_handle_switches_live_set() {
        let mut source = ScriptedProcesses::new(4, vec![ProcessRecord::new(1, 0, "init")]);
        let handle = source.handle();
        assert_eq!(source.enumerate().unwrap().len(), 1);
        handle.fail();
        assert!(source.enumerate().is_err());
        handle.set_live(vec![]);
        assert!(source.enumerate().unwrap().is_empty());
        assert_eq!(handle.passes(), 3);
    }
}
