//! Explicitly owned home of the worker pool and the three samplers.

use std::sync::Arc;

use parking_lot::Mutex;

use super::collector::{SysinfoCpu, SysinfoMemory, SysinfoProcesses};
use super::control::SamplerSettings;
use super::cpu::CpuSampler;
use super::memory::MemorySampler;
use super::process_sampler::ProcessSampler;
use super::source::{CpuSource, MemorySource, ProcessSource};
use super::worker_pool::WorkerPool;

/// Loops held by the samplers while all three run: three for CPU, two for
/// memory and one for processes.
const SAMPLER_LOOPS: usize = 6;

type CpuFactory = Box<dyn Fn() -> Box<dyn CpuSource> + Send + Sync>;
type MemoryFactory = Box<dyn Fn() -> Box<dyn MemorySource> + Send + Sync>;
type ProcessFactory = Box<dyn Fn() -> Box<dyn ProcessSource> + Send + Sync>;

/// Builds a fresh OS source each time a sampler is constructed.
pub struct SourceFactory {
    cpu: CpuFactory,
    memory: MemoryFactory,
    processes: ProcessFactory,
}

impl Default for SourceFactory {
    fn default() -> Self {
        Self::sysinfo()
    }
}

impl SourceFactory {
    pub fn sysinfo() -> Self {
        Self {
            cpu: Box::new(|| -> Box<dyn CpuSource> { Box::new(SysinfoCpu::new()) }),
            memory: Box::new(|| -> Box<dyn MemorySource> { Box::new(SysinfoMemory::new()) }),
            processes: Box::new(|| -> Box<dyn ProcessSource> {
                Box::new(SysinfoProcesses::new())
            }),
        }
    }

    pub fn with_cpu<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn CpuSource> + Send + Sync + 'static,
    {
        self.cpu = Box::new(factory);
        self
    }

    pub fn with_memory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn MemorySource> + Send + Sync + 'static,
    {
        self.memory = Box::new(factory);
        self
    }

    pub fn with_processes<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ProcessSource> + Send + Sync + 'static,
    {
        self.processes = Box::new(factory);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSettings {
    pub cpu: SamplerSettings,
    pub memory: SamplerSettings,
    pub processes: SamplerSettings,
    /// Pool size. 0 picks [`WorkerPool::default_size`].
    pub worker_threads: usize,
}

impl EngineSettings {
    fn pool_size(&self) -> usize {
        match self.worker_threads {
            0 => WorkerPool::default_size(),
            n if n < SAMPLER_LOOPS => {
                tracing::warn!(
                    requested = n,
                    used = SAMPLER_LOOPS,
                    "worker_threads below the number of sampler loops, raising it"
                );
                SAMPLER_LOOPS
            }
            n => n,
        }
    }
}

/// Owns the shared pool and hands out lazily built samplers.
///
/// Samplers are shared through `Arc`; a `shutdown_*` call stops one and
/// forgets it, so the next accessor call builds a fresh instance.
pub struct Engine {
    pool: Arc<WorkerPool>,
    pool_size: usize,
    settings: EngineSettings,
    sources: SourceFactory,
    cpu: Mutex<Option<Arc<CpuSampler>>>,
    memory: Mutex<Option<Arc<MemorySampler>>>,
    processes: Mutex<Option<Arc<ProcessSampler>>>,
}

impl Engine {
    pub fn new(settings: EngineSettings, sources: SourceFactory) -> Self {
        let pool_size = settings.pool_size();
        let pool = Arc::new(WorkerPool::new());
        pool.start(pool_size);
        Self {
            pool,
            pool_size,
            settings,
            sources,
            cpu: Mutex::new(None),
            memory: Mutex::new(None),
            processes: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cpu(&self) -> Arc<CpuSampler> {
        let mut slot = self.cpu.lock();
        let sampler = slot.get_or_insert_with(|| {
            self.ensure_pool();
            Arc::new(CpuSampler::new(
                Arc::clone(&self.pool),
                (self.sources.cpu)(),
                self.settings.cpu,
            ))
        });
        Arc::clone(sampler)
    }

    pub fn memory(&self) -> Arc<MemorySampler> {
        let mut slot = self.memory.lock();
        let sampler = slot.get_or_insert_with(|| {
            self.ensure_pool();
            Arc::new(MemorySampler::new(
                Arc::clone(&self.pool),
                (self.sources.memory)(),
                self.settings.memory,
            ))
        });
        Arc::clone(sampler)
    }

    pub fn processes(&self) -> Arc<ProcessSampler> {
        let mut slot = self.processes.lock();
        let sampler = slot.get_or_insert_with(|| {
            self.ensure_pool();
            Arc::new(ProcessSampler::new(
                Arc::clone(&self.pool),
                (self.sources.processes)(),
                self.settings.processes,
            ))
        });
        Arc::clone(sampler)
    }

    pub fn run_all(&self) {
        self.cpu().run();
        self.memory().run();
        self.processes().run();
    }

    pub fn shutdown_cpu(&self) {
        if let Some(sampler) = self.cpu.lock().take() {
            sampler.stop();
        }
    }

    pub fn shutdown_memory(&self) {
        if let Some(sampler) = self.memory.lock().take() {
            sampler.stop();
        }
    }

    pub fn shutdown_processes(&self) {
        if let Some(sampler) = self.processes.lock().take() {
            sampler.stop();
        }
    }

    /// Stop every sampler, then the pool.
    pub fn shutdown(&self) {
        self.shutdown_cpu();
        self.shutdown_memory();
        self.shutdown_processes();
        self.pool.stop();
        tracing::debug!("engine shut down");
    }

    // A sampler built after `shutdown` needs workers again.
    fn ensure_pool(&self) {
        if self.pool.worker_count() == 0 {
            self.pool.start(self.pool_size);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
