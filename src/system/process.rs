use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use super::cpu::process_load;
use super::source::{ProcessRecord, ProcessTimes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Memory,
    Cpu,
    Name,
    Pid,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            SortMode::Memory => SortMode::Cpu,
            SortMode::Cpu => SortMode::Name,
            SortMode::Name => SortMode::Pid,
            SortMode::Pid => SortMode::Memory,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortMode::Memory => "Memory",
            SortMode::Cpu => "CPU",
            SortMode::Name => "Name",
            SortMode::Pid => "PID",
        }
    }

    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cpu" => SortMode::Cpu,
            "name" => SortMode::Name,
            "pid" => SortMode::Pid,
            _ => SortMode::Memory,
        }
    }

    /// Memory and CPU sort descending, name and pid ascending. Ties fall
    /// back to pid.
    pub fn compare(self, a: &ProcessEntry, b: &ProcessEntry) -> Ordering {
        let primary = match self {
            SortMode::Memory => b.working_set_size().cmp(&a.working_set_size()),
            SortMode::Cpu => b.cpu_load().total_cmp(&a.cpu_load()),
            SortMode::Name => a.name().to_lowercase().cmp(&b.name().to_lowercase()),
            SortMode::Pid => Ordering::Equal,
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Mutable half of a [`ProcessEntry`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    pub name: String,
    pub thread_count: u32,
    pub priority_class: i32,
    pub flags: u32,
    pub working_set_size: u64,
    pub private_usage: u64,
    pub cpu_load: f64,
    pub running: bool,
    pub selected: bool,
    #[serde(skip)]
    pub last_times: Option<ProcessTimes>,
}

/// One tracked process. Identity is fixed at creation; the stats sit
/// behind the entry's own lock so siblings can be updated independently.
#[derive(Debug)]
pub struct ProcessEntry {
    id: u32,
    parent_id: u32,
    module_id: u32,
    stats: Mutex<ProcessStats>,
}

impl ProcessEntry {
    pub fn from_record(record: &ProcessRecord) -> Self {
        Self {
            id: record.id,
            parent_id: record.parent_id,
            module_id: record.module_id,
            stats: Mutex::new(ProcessStats {
                name: record.name.clone(),
                thread_count: record.thread_count,
                priority_class: record.priority_class,
                flags: record.flags,
                working_set_size: record.working_set_size,
                private_usage: record.private_usage,
                cpu_load: 0.0,
                running: true,
                selected: false,
                last_times: record.times,
            }),
        }
    }

    /// Refresh from a new observation of the same pid and mark it running.
    pub fn update(&self, record: &ProcessRecord, cores: usize) {
        debug_assert_eq!(record.id, self.id);
        let mut stats = self.stats.lock();
        stats.cpu_load = match record.times {
            Some(now) => process_load(stats.last_times, now, cores),
            None => 0.0,
        };
        if record.times.is_some() {
            stats.last_times = record.times;
        }
        if stats.name != record.name {
            stats.name.clone_from(&record.name);
        }
        stats.thread_count = record.thread_count;
        stats.priority_class = record.priority_class;
        stats.flags = record.flags;
        stats.working_set_size = record.working_set_size;
        stats.private_usage = record.private_usage;
        stats.running = true;
    }

    pub fn mark_stale(&self) {
        self.stats.lock().running = false;
    }

    pub fn set_selected(&self, selected: bool) {
        self.stats.lock().selected = selected;
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn parent_id(&self) -> u32 {
        self.parent_id
    }

    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    /// Copy of the mutable fields taken under the entry's lock.
    pub fn stats(&self) -> ProcessStats {
        self.stats.lock().clone()
    }

    pub fn name(&self) -> String {
        self.stats.lock().name.clone()
    }

    pub fn thread_count(&self) -> u32 {
        self.stats.lock().thread_count
    }

    pub fn priority_class(&self) -> i32 {
        self.stats.lock().priority_class
    }

    pub fn working_set_size(&self) -> u64 {
        self.stats.lock().working_set_size
    }

    pub fn private_usage(&self) -> u64 {
        self.stats.lock().private_usage
    }

    pub fn cpu_load(&self) -> f64 {
        self.stats.lock().cpu_load
    }

    pub fn is_running(&self) -> bool {
        self.stats.lock().running
    }

    pub fn is_selected(&self) -> bool {
        self.stats.lock().selected
    }
}

impl Clone for ProcessEntry {
    /// Deep copy with its own lock.
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            parent_id: self.parent_id,
            module_id: self.module_id,
            stats: Mutex::new(self.stats()),
        }
    }
}

impl Serialize for ProcessEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Row<'a> {
            id: u32,
            parent_id: u32,
            module_id: u32,
            #[serde(flatten)]
            stats: &'a ProcessStats,
        }

        let stats = self.stats.lock();
        Row {
            id: self.id,
            parent_id: self.parent_id,
            module_id: self.module_id,
            stats: &stats,
        }
        .serialize(serializer)
    }
}

/// An owned list of entries handed to the consumer.
///
/// At most one entry is selected. `dirty` is set by every structural change
/// and cleared by [`sort_entries`](ProcessContainer::sort_entries).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessContainer {
    entries: Vec<ProcessEntry>,
    selected_entry_id: Option<u32>,
    dirty: bool,
}

impl ProcessContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Append an entry. A selected entry takes over the selection.
    pub fn add_entry(&mut self, entry: ProcessEntry) {
        if entry.is_selected() {
            if let Some(previous) = self.selected_entry() {
                previous.set_selected(false);
            }
            self.selected_entry_id = Some(entry.id());
        }
        self.entries.push(entry);
        self.dirty = true;
    }

    pub fn erase_entry(&mut self, pid: u32) -> Option<ProcessEntry> {
        let index = self.position(pid)?;
        let entry = self.entries.remove(index);
        if self.selected_entry_id == Some(pid) {
            self.selected_entry_id = None;
        }
        self.dirty = true;
        Some(entry)
    }

    /// Select `pid`, deselecting any previous entry first.
    ///
    /// Selecting the already selected entry deselects it unless `preserve`
    /// is set. Unknown pids leave the selection alone. Returns whether `pid`
    /// is selected afterwards.
    pub fn select_entry(&mut self, pid: u32, preserve: bool) -> bool {
        let Some(index) = self.position(pid) else {
            return false;
        };
        if let Some(current) = self.selected_entry_id {
            if let Some(previous) = self.selected_entry() {
                previous.set_selected(false);
            }
            if current == pid {
                if preserve {
                    self.entries[index].set_selected(true);
                } else {
                    self.selected_entry_id = None;
                }
                return preserve;
            }
        }
        self.entries[index].set_selected(true);
        self.selected_entry_id = Some(pid);
        true
    }

    pub fn deselect(&mut self) {
        if let Some(previous) = self.selected_entry() {
            previous.set_selected(false);
        }
        self.selected_entry_id = None;
    }

    pub fn selected_entry_id(&self) -> Option<u32> {
        self.selected_entry_id
    }

    pub fn selected_entry(&self) -> Option<&ProcessEntry> {
        self.selected_entry_id.and_then(|pid| self.find_entry(pid))
    }

    pub fn find_entry(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.iter().find(|entry| entry.id() == pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.position(pid).is_some()
    }

    pub fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcessEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.selected_entry_id = None;
        self.dirty = true;
    }

    pub fn sort_entries(&mut self, mode: SortMode) {
        self.entries.sort_by(|a, b| mode.compare(a, b));
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn set_clean(&mut self) {
        self.dirty = false;
    }

    fn position(&self, pid: u32) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id() == pid)
    }
}

impl<'a> IntoIterator for &'a ProcessContainer {
    type Item = &'a ProcessEntry;
    type IntoIter = std::slice::Iter<'a, ProcessEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Outcome of one mark-sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Default)]
struct DirectoryState {
    entries: BTreeMap<u32, Arc<ProcessEntry>>,
    selected: Option<u32>,
}

impl DirectoryState {
    fn mark_all_stale(&self) {
        for entry in self.entries.values() {
            entry.mark_stale();
        }
    }

    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_running());
        if let Some(pid) = self.selected {
            if !self.entries.contains_key(&pid) {
                self.selected = None;
            }
        }
        before - self.entries.len()
    }
}

/// Live pid -> entry map owned by the process sampler.
///
/// Every access takes the directory lock. The selection is kept as a pid
/// and re-applied to each snapshot rather than stored on the live entries.
#[derive(Default)]
pub struct ProcessDirectory {
    state: Mutex<DirectoryState>,
}

impl ProcessDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keyed by pid. Returns `false` and drops `entry` if the pid is tracked.
    pub fn emplace(&self, entry: ProcessEntry) -> bool {
        let mut state = self.state.lock();
        match state.entries.entry(entry.id()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
                true
            }
        }
    }

    pub fn find(&self, pid: u32) -> Option<Arc<ProcessEntry>> {
        self.state.lock().entries.get(&pid).cloned()
    }

    pub fn erase(&self, pid: u32) -> Option<Arc<ProcessEntry>> {
        let mut state = self.state.lock();
        if state.selected == Some(pid) {
            state.selected = None;
        }
        state.entries.remove(&pid)
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.state.lock().entries.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.selected = None;
    }

    pub fn mark_all_stale(&self) {
        self.state.lock().mark_all_stale();
    }

    /// Erase every entry not re-observed since the last `mark_all_stale`.
    pub fn sweep(&self) -> usize {
        self.state.lock().sweep()
    }

    /// Apply one enumeration pass: mark all stale, upsert what was observed,
    /// then erase what was not.
    pub fn refresh(&self, observed: &[ProcessRecord], cores: usize) -> RefreshStats {
        let mut state = self.state.lock();
        let mut stats = RefreshStats::default();

        state.mark_all_stale();
        for record in observed {
            match state.entries.get(&record.id) {
                Some(entry) => {
                    entry.update(record, cores);
                    stats.updated += 1;
                }
                None => {
                    state
                        .entries
                        .insert(record.id, Arc::new(ProcessEntry::from_record(record)));
                    stats.added += 1;
                }
            }
        }
        stats.removed = state.sweep();
        stats
    }

    /// Toggle the selection on `pid`. Returns whether `pid` is selected afterwards.
    pub fn select(&self, pid: u32) -> bool {
        let mut state = self.state.lock();
        if state.selected == Some(pid) {
            state.selected = None;
            return false;
        }
        if !state.entries.contains_key(&pid) {
            return false;
        }
        state.selected = Some(pid);
        true
    }

    pub fn deselect(&self) {
        self.state.lock().selected = None;
    }

    pub fn selected(&self) -> Option<u32> {
        self.state.lock().selected
    }

    /// Deep copy of every entry, with the selection re-applied by pid.
    pub fn snapshot(&self) -> ProcessContainer {
        let state = self.state.lock();
        let mut container = ProcessContainer::with_capacity(state.entries.len());
        for entry in state.entries.values() {
            let copy = ProcessEntry::clone(entry);
            copy.set_selected(false);
            container.add_entry(copy);
        }
        if let Some(pid) = state.selected {
            container.select_entry(pid, true);
        }
        container
    }
}
