//! The OS query layer the samplers are written against.
//!
//! Production implementations live in [`collector`](super::collector);
//! scripted ones for tests live in [`fake`](super::fake).

use std::time::Duration;

use serde::Serialize;

use super::error::SampleResult;

/// Instance name of the aggregate row in a processor counter array.
pub const TOTAL_INSTANCE: &str = "_Total";

/// One row of a formatted counter array: a named instance and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterItem {
    pub name: String,
    pub value: f64,
}

impl CounterItem {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A formatted counter array as the OS handed it over, unsorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CounterArray {
    pub items: Vec<CounterItem>,
    /// Size in bytes of the array the OS reported.
    pub buffer_size: usize,
}

impl CounterArray {
    pub fn from_items(items: Vec<CounterItem>) -> Self {
        let buffer_size = items
            .iter()
            .map(|item| item.name.len() + 1 + std::mem::size_of::<f64>())
            .sum();
        Self { items, buffer_size }
    }
}

/// Cumulative CPU time of one process, stamped with the wall clock of the
/// reading. `wall` is measured from an arbitrary per-source epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTimes {
    pub wall: Duration,
    pub system: Duration,
    pub user: Duration,
}

/// Per-core and aggregate processor busy counters.
pub trait CpuSource: Send {
    /// Take one sample of the counters. Percent-busy values are derived
    /// from the delta between two collections.
    fn collect(&mut self) -> SampleResult<()>;

    /// Per-instance values derived from the last two collections, including
    /// the aggregate `_Total` row.
    fn formatted_counters(&mut self) -> SampleResult<CounterArray>;

    fn core_count(&self) -> usize;

    fn current_process_times(&mut self) -> SampleResult<ProcessTimes>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemMemory {
    pub total_physical: u64,
    pub avail_physical: u64,
    pub total_virtual: u64,
    pub avail_virtual: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessMemory {
    pub working_set: u64,
    pub private_usage: u64,
}

pub trait MemorySource: Send {
    fn system_memory(&mut self) -> SampleResult<SystemMemory>;

    /// Counters of the calling process.
    fn process_memory(&mut self) -> SampleResult<ProcessMemory>;
}

/// One live process as reported by a single enumeration pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub id: u32,
    pub parent_id: u32,
    pub module_id: u32,
    pub name: String,
    pub thread_count: u32,
    pub priority_class: i32,
    pub flags: u32,
    pub working_set_size: u64,
    pub private_usage: u64,
    pub times: Option<ProcessTimes>,
}

impl ProcessRecord {
    pub fn new(id: u32, parent_id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            module_id: 0,
            name: name.into(),
            thread_count: 1,
            priority_class: 0,
            flags: 0,
            working_set_size: 0,
            private_usage: 0,
            times: None,
        }
    }

    pub fn with_memory(mut self, working_set_size: u64, private_usage: u64) -> Self {
        self.working_set_size = working_set_size;
        self.private_usage = private_usage;
        self
    }

    pub fn with_times(mut self, times: ProcessTimes) -> Self {
        self.times = Some(times);
        self
    }
}

pub trait ProcessSource: Send {
    /// Every process alive right now.
    fn enumerate(&mut self) -> SampleResult<Vec<ProcessRecord>>;

    fn core_count(&self) -> usize;
}
