use std::time::{Duration, Instant};

use sysinfo::{CpuRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::error::{SampleError, SampleResult};
use super::platform;
use super::source::{
    CounterArray, CounterItem, CpuSource, MemorySource, ProcessMemory, ProcessRecord,
    ProcessSource, ProcessTimes, SystemMemory, TOTAL_INSTANCE,
};

fn current_pid() -> SampleResult<Pid> {
    sysinfo::get_current_pid().map_err(|err| SampleError::query("get_current_pid", err))
}

// sysinfo reports one accumulated figure; it is carried as user time.
fn times_of(process: &sysinfo::Process, epoch: Instant) -> ProcessTimes {
    ProcessTimes {
        wall: epoch.elapsed(),
        system: Duration::ZERO,
        user: Duration::from_millis(process.accumulated_cpu_time()),
    }
}

pub struct SysinfoCpu {
    sys: System,
    epoch: Instant,
}

impl Default for SysinfoCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoCpu {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_list(CpuRefreshKind::nothing().with_cpu_usage());
        SysinfoCpu {
            sys,
            epoch: Instant::now(),
        }
    }
}

impl CpuSource for SysinfoCpu {
    fn collect(&mut self) -> SampleResult<()> {
        self.sys.refresh_cpu_usage();
        Ok(())
    }

    fn formatted_counters(&mut self) -> SampleResult<CounterArray> {
        let cpus = self.sys.cpus();
        if cpus.is_empty() {
            return Err(SampleError::Unavailable("per-core processor counters"));
        }

        let mut items: Vec<CounterItem> = cpus
            .iter()
            .enumerate()
            .map(|(index, cpu)| CounterItem::new(index.to_string(), f64::from(cpu.cpu_usage())))
            .collect();
        items.push(CounterItem::new(
            TOTAL_INSTANCE,
            f64::from(self.sys.global_cpu_usage()),
        ));
        Ok(CounterArray::from_items(items))
    }

    fn core_count(&self) -> usize {
        self.sys.cpus().len()
    }

    fn current_process_times(&mut self) -> SampleResult<ProcessTimes> {
        let pid = current_pid()?;
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu(),
        );
        self.sys
            .process(pid)
            .map(|process| times_of(process, self.epoch))
            .ok_or(SampleError::Unavailable("current process"))
    }
}

pub struct SysinfoMemory {
    sys: System,
}

impl Default for SysinfoMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoMemory {
    pub fn new() -> Self {
        SysinfoMemory { sys: System::new() }
    }
}

impl MemorySource for SysinfoMemory {
    fn system_memory(&mut self) -> SampleResult<SystemMemory> {
        self.sys.refresh_memory();
        let total_physical = self.sys.total_memory();
        if total_physical == 0 {
            return Err(SampleError::query("refresh_memory", "no physical memory reported"));
        }
        let avail_physical = self.sys.available_memory();

        // Commit-style totals: physical memory plus swap.
        Ok(SystemMemory {
            total_physical,
            avail_physical,
            total_virtual: total_physical.saturating_add(self.sys.total_swap()),
            avail_virtual: avail_physical.saturating_add(self.sys.free_swap()),
        })
    }

    fn process_memory(&mut self) -> SampleResult<ProcessMemory> {
        let pid = current_pid()?;
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let process = self
            .sys
            .process(pid)
            .ok_or(SampleError::Unavailable("current process"))?;
        Ok(ProcessMemory {
            working_set: process.memory(),
            private_usage: process.virtual_memory(),
        })
    }
}

pub struct SysinfoProcesses {
    sys: System,
    epoch: Instant,
    cores: usize,
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcesses {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_list(CpuRefreshKind::nothing());
        let cores = sys.cpus().len();
        SysinfoProcesses {
            sys,
            epoch: Instant::now(),
            cores,
        }
    }
}

impl ProcessSource for SysinfoProcesses {
    fn enumerate(&mut self) -> SampleResult<Vec<ProcessRecord>> {
        let _span = tracing::debug_span!("collector.enumerate").entered();

        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        if self.sys.processes().is_empty() {
            return Err(SampleError::query("refresh_processes", "process list is empty"));
        }

        let records = self
            .sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let id = pid.as_u32();
                let (priority, threads) = platform::process_stat(id);
                ProcessRecord {
                    id,
                    parent_id: process.parent().map(|p| p.as_u32()).unwrap_or(0),
                    module_id: 0,
                    name: process.name().to_string_lossy().to_string(),
                    thread_count: threads.unwrap_or(0),
                    priority_class: priority.unwrap_or(0),
                    flags: 0,
                    working_set_size: process.memory(),
                    private_usage: process.virtual_memory(),
                    times: Some(times_of(process, self.epoch)),
                }
            })
            .collect();
        Ok(records)
    }

    fn core_count(&self) -> usize {
        self.cores
    }
}
