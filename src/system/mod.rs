pub mod collector;
pub mod control;
pub mod cpu;
pub mod engine;
pub mod error;
pub mod fake;
pub mod memory;
pub mod platform;
pub mod process;
pub mod process_sampler;
pub mod safe_lock;
pub mod slot;
pub mod source;
pub mod time;
pub mod worker_pool;

pub use control::SamplerSettings;
pub use cpu::{CoreLoad, CpuSampler, CpuSnapshot};
pub use engine::{Engine, EngineSettings, SourceFactory};
pub use error::{SampleError, SampleResult};
pub use memory::{Bytes, MemorySampler, MemorySnapshot};
pub use process::{ProcessContainer, ProcessDirectory, ProcessEntry, SortMode};
pub use process_sampler::ProcessSampler;
pub use slot::SnapshotRef;
pub use time::{TickRate, Timestep};
pub use worker_pool::WorkerPool;
