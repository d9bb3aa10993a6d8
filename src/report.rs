//! Rendering of one consumer frame, as text or as a JSON line.

use std::fmt::Write;

use serde::Serialize;

use crate::format::{fit_width, format_bytes};
use crate::system::{CpuSnapshot, MemorySnapshot, ProcessContainer, ProcessEntry, SortMode};

const NAME_WIDTH: usize = 20;

/// What one frame managed to read. `None` means the sampler had nothing
/// ready within its grace period.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frame<'a> {
    pub cpu: Option<&'a CpuSnapshot>,
    pub memory: Option<&'a MemorySnapshot>,
    pub processes: Option<&'a ProcessContainer>,
    /// CPU load of the monitor itself.
    pub own_cpu_load: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    pub max_processes: usize,
    pub sort: SortMode,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            max_processes: 15,
            sort: SortMode::Memory,
        }
    }
}

fn top_processes<'a>(container: &'a ProcessContainer, options: &ReportOptions) -> Vec<&'a ProcessEntry> {
    let mut entries: Vec<&ProcessEntry> = container.iter().collect();
    entries.sort_by(|a, b| options.sort.compare(a, b));
    entries.truncate(options.max_processes);
    entries
}

pub fn render_text(frame: &Frame<'_>, options: &ReportOptions) -> String {
    let mut out = String::new();

    match frame.cpu {
        Some(cpu) => {
            let _ = writeln!(
                out,
                "CPU  avg {:5.1}%  cores {}  self {:.1}%",
                cpu.total_load_avg,
                cpu.per_core.len(),
                frame.own_cpu_load
            );
            for core in &cpu.per_core {
                let _ = writeln!(out, "  core {:>3}  {:5.1}%", core.core_id, core.load_percent);
            }
        }
        None => out.push_str("CPU  waiting for data\n"),
    }

    match frame.memory {
        Some(memory) => {
            let _ = writeln!(out, "Memory  load {:5.1}%", memory.memory_load_percent());
            let _ = writeln!(
                out,
                "  physical  {} / {}",
                format_bytes(memory.used_physical),
                format_bytes(memory.total_physical)
            );
            let _ = writeln!(
                out,
                "  virtual   {} / {}",
                format_bytes(memory.used_virtual),
                format_bytes(memory.total_virtual)
            );
            let _ = writeln!(
                out,
                "  process   {} working set, {} private",
                format_bytes(memory.process_working_set),
                format_bytes(memory.process_private_usage)
            );
        }
        None => out.push_str("Memory  waiting for data\n"),
    }

    match frame.processes {
        Some(container) => {
            let _ = writeln!(
                out,
                "Processes  {} tracked, sorted by {}",
                container.len(),
                options.sort.label()
            );
            let _ = writeln!(
                out,
                "  {:>7}  {:<NAME_WIDTH$}  {:>10}  {:>6}",
                "PID", "NAME", "MEMORY", "CPU"
            );
            let top = top_processes(container, options);
            for entry in &top {
                let marker = if entry.is_selected() { '*' } else { ' ' };
                let _ = writeln!(
                    out,
                    "{} {:>7}  {}  {:>10}  {:5.1}%",
                    marker,
                    entry.id(),
                    fit_width(&entry.name(), NAME_WIDTH),
                    format_bytes(entry.working_set_size()),
                    entry.cpu_load()
                );
            }
            let hidden = container.len().saturating_sub(top.len());
            if hidden > 0 {
                let _ = writeln!(out, "  ... {hidden} more");
            }
        }
        None => out.push_str("Processes  waiting for data\n"),
    }

    out.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
struct JsonFrame<'a> {
    cpu: Option<&'a CpuSnapshot>,
    memory: Option<&'a MemorySnapshot>,
    memory_load_percent: Option<f64>,
    own_cpu_load: f64,
    tracked_processes: Option<usize>,
    selected_pid: Option<u32>,
    processes: Vec<&'a ProcessEntry>,
}

/// One JSON object per frame, top processes only.
pub fn render_json(frame: &Frame<'_>, options: &ReportOptions) -> serde_json::Result<String> {
    let json = JsonFrame {
        cpu: frame.cpu,
        memory: frame.memory,
        memory_load_percent: frame.memory.map(MemorySnapshot::memory_load_percent),
        own_cpu_load: frame.own_cpu_load,
        tracked_processes: frame.processes.map(ProcessContainer::len),
        selected_pid: frame.processes.and_then(ProcessContainer::selected_entry_id),
        processes: frame
            .processes
            .map(|container| top_processes(container, options))
            .unwrap_or_default(),
    };
    serde_json::to_string(&json)
}
