use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::control::{SamplerControl, SamplerSettings};
use super::process::{ProcessContainer, ProcessDirectory, ProcessEntry};
use super::slot::{PublishSlot, SnapshotRef};
use super::source::ProcessSource;
use super::worker_pool::WorkerPool;

struct ProcessShared {
    control: SamplerControl,
    slot: PublishSlot<ProcessContainer>,
    source: Mutex<Box<dyn ProcessSource>>,
    directory: ProcessDirectory,
}

impl ProcessShared {
    /// One enumeration pass, then a deep-copy publish.
    ///
    /// The source lock is held for the whole pass; `run` takes it to reset
    /// the slot, so a pass from an older run cannot publish after that.
    fn cycle(&self, generation: u64) {
        let _span = tracing::debug_span!("process.refresh").entered();
        let mut source = self.source.lock();
        let observed = source
            .enumerate()
            .map(|records| (records, source.core_count()));
        let (records, cores) = match observed {
            Ok(observed) => observed,
            Err(err) => {
                tracing::warn!(%err, "process enumeration failed, keeping last snapshot");
                return;
            }
        };

        let stats = self.directory.refresh(&records, cores);
        tracing::debug!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            tracked = self.directory.len(),
            "process directory refreshed"
        );

        let container = self.directory.snapshot();
        if self.control.is_current(generation) {
            self.slot.publish(container);
        }
    }
}

fn refresh_loop(shared: &ProcessShared, generation: u64) {
    while shared.control.is_current(generation) {
        shared.cycle(generation);
        if !shared.control.sleep_interval(generation) {
            break;
        }
    }
    tracing::debug!(generation, "process loop exited");
}

/// Keeps the live process directory current and publishes deep copies of it.
pub struct ProcessSampler {
    shared: Arc<ProcessShared>,
    pool: Arc<WorkerPool>,
}

impl ProcessSampler {
    pub fn new(
        pool: Arc<WorkerPool>,
        source: Box<dyn ProcessSource>,
        settings: SamplerSettings,
    ) -> Self {
        let shared = ProcessShared {
            control: SamplerControl::new(settings.interval),
            slot: PublishSlot::new(settings.grace_period),
            source: Mutex::new(source),
            directory: ProcessDirectory::new(),
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
        {
            let _source = self.shared.source.lock();
            self.shared.slot.reset();
            self.shared.slot.open();
        }
        let shared = Arc::clone(&self.shared);
        self.pool.queue(move || refresh_loop(&shared, generation));
        tracing::debug!(generation, "process sampler started");
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

    pub fn get_data(&self) -> Option<SnapshotRef<'_, ProcessContainer>> {
        debug_assert!(self.is_running(), "get_data on a stopped process sampler");
        self.shared.slot.get()
    }

    pub fn set_update_interval(&self, interval: impl Into<Duration>) {
        self.shared.control.set_interval(interval.into());
    }

    pub fn update_interval(&self) -> Duration {
        self.shared.control.interval()
    }

    /// Processes tracked right now, read from the live directory.
    pub fn num_processes(&self) -> usize {
        self.shared.directory.len()
    }

    /// Deep copy of the live entry for `pid`.
    pub fn find_process(&self, pid: u32) -> Option<ProcessEntry> {
        self.shared
            .directory
            .find(pid)
            .map(|entry| ProcessEntry::clone(&entry))
    }

    /// Toggle the selection on `pid`; it shows up in the next published
    /// snapshot. Returns whether `pid` is selected afterwards.
    pub fn select_process(&self, pid: u32) -> bool {
        self.shared.directory.select(pid)
    }

    pub fn selected_process(&self) -> Option<u32> {
        self.shared.directory.selected()
    }
}

impl Drop for ProcessSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::ScriptedProcesses;
    use crate::system::source::ProcessRecord;
    use std::time::Instant;

    fn settings() -> SamplerSettings {
        SamplerSettings::default().with_interval(Duration::from_millis(10))
    }

    fn wait_for<F: FnMut() -> bool>(mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn publishes_directory_snapshot() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedProcesses::new(
            2,
            vec![ProcessRecord::new(1, 0, "init"), ProcessRecord::new(2, 1, "shell")],
        );
        let sampler = ProcessSampler::new(Arc::clone(&pool), Box::new(source), settings());
        assert!(sampler.run());

        wait_for(|| sampler.num_processes() == 2);
        wait_for(|| sampler.get_data().is_some_and(|data| data.len() == 2));
        assert_eq!(sampler.find_process(2).unwrap().name(), "shell");
        assert!(sampler.find_process(3).is_none());
        sampler.stop();
    }

    #[test]
    fn selection_survives_refreshes_until_process_exits() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedProcesses::new(
            1,
            vec![ProcessRecord::new(10, 0, "a"), ProcessRecord::new(20, 0, "b")],
        );
        let script = source.handle();
        let sampler = ProcessSampler::new(Arc::clone(&pool), Box::new(source), settings());
        sampler.run();

        wait_for(|| sampler.num_processes() == 2);
        assert!(sampler.select_process(20));
        let passes = script.passes();
        wait_for(|| script.passes() >= passes + 2);
        {
            let data = sampler.get_data().unwrap();
            assert_eq!(data.selected_entry_id(), Some(20));
        }

        script.set_live(vec![ProcessRecord::new(10, 0, "a"), ProcessRecord::new(30, 0, "c")]);
        wait_for(|| sampler.find_process(30).is_some());
        assert_eq!(sampler.selected_process(), None);
        sampler.stop();
    }

    #[test]
    fn failed_enumeration_keeps_last_snapshot() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedProcesses::new(1, vec![ProcessRecord::new(1, 0, "init")]);
        let script = source.handle();
        let sampler = ProcessSampler::new(Arc::clone(&pool), Box::new(source), settings());
        sampler.run();

        wait_for(|| sampler.get_data().is_some());
        script.fail();
        let passes = script.passes();
        wait_for(|| script.passes() >= passes + 2);
        assert_eq!(sampler.get_data().unwrap().len(), 1);
        assert_eq!(sampler.num_processes(), 1);
        sampler.stop();
    }

    #[test]
    fn first_read_after_restart_comes_from_the_new_run() {
        let pool = Arc::new(WorkerPool::new());
        pool.start_default();
        let source = ScriptedProcesses::new(1, vec![ProcessRecord::new(1, 0, "init")]);
        let script = source.handle();
        let sampler = ProcessSampler::new(Arc::clone(&pool), Box::new(source), settings());
        sampler.run();
        wait_for(|| sampler.get_data().is_some());
        sampler.stop();

        script.set_live(vec![
            ProcessRecord::new(1, 0, "init"),
            ProcessRecord::new(2, 1, "shell"),
            ProcessRecord::new(3, 1, "editor"),
        ]);
        sampler.run();
        let deadline = Instant::now() + Duration::from_secs(5);
        let len = loop {
            if let Some(data) = sampler.get_data() {
                break data.len();
            }
            assert!(Instant::now() < deadline, "no snapshot after restart");
        };
        assert_eq!(len, 3);
        sampler.stop();
    }
}
