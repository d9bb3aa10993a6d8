use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::safe_lock::SafeLock;
use super::time::TickRate;

/// Bounded wait of `get_data` before it reports "not ready".
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(10);

/// Number of `_Total` readings averaged into the published CPU load.
pub const DEFAULT_LOAD_WINDOW: usize = 3;

/// Construction parameters shared by every sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub grace_period: Duration,
    /// Only read by the CPU sampler.
    pub load_window: usize,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: TickRate::Normal.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            load_window: DEFAULT_LOAD_WINDOW,
        }
    }
}

impl SamplerSettings {
    pub fn with_interval(mut self, interval: impl Into<Duration>) -> Self {
        self.interval = interval.into();
        self
    }
}

/// Run flag, loop generation and cadence shared by a sampler's loops.
///
/// Each `start` opens a new generation. A loop captures the generation it
/// was launched for and keeps going only while that generation is current,
/// so a quick stop/start cannot leave two copies of the same loop running.
#[derive(Debug)]
pub struct SamplerControl {
    running: AtomicBool,
    generation: AtomicU64,
    interval_ms: AtomicU64,
    wake: SafeLock<()>,
}

impl SamplerControl {
    pub fn new(interval: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            interval_ms: AtomicU64::new(duration_to_millis(interval)),
            wake: SafeLock::new(()),
        }
    }

    /// Flip to running. Returns the new generation, or `None` if already running.
    pub fn start(&self) -> Option<u64> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Flip to stopped and wake every sleeping loop. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        // Taking the lock orders the flag store before any sleeper re-checks it.
        drop(self.wake.lock());
        self.wake.notify_all();
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Takes effect at the start of the next sleep.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(duration_to_millis(interval), Ordering::Relaxed);
    }

    /// Sleep one interval. Returns `false` as soon as the generation is stopped.
    pub fn sleep_interval(&self, generation: u64) -> bool {
        self.sleep(generation, self.interval())
    }

    pub fn sleep(&self, generation: u64, duration: Duration) -> bool {
        let mut guard = self.wake.lock();
        self.wake
            .wait_for_while(&mut guard, duration, |_| self.is_current(generation));
        self.is_current(generation)
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn start_is_idempotent_and_bumps_generation() {
        let control = SamplerControl::new(Duration::from_millis(10));
        let first = control.start().unwrap();
        assert!(control.start().is_none());
        assert!(control.stop());
        assert!(!control.stop());
        let second = control.start().unwrap();
        assert!(second > first);
        assert!(!control.is_current(first));
        assert!(control.is_current(second));
    }

    #[test]
    fn stop_interrupts_sleep() {
        let control = Arc::new(SamplerControl::new(Duration::from_secs(30)));
        let generation = control.start().unwrap();
        let sleeper = {
            let control = Arc::clone(&control);
            thread::spawn(move || {
                let start = Instant::now();
                let still_running = control.sleep_interval(generation);
                (still_running, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        control.stop();
        let (still_running, elapsed) = sleeper.join().unwrap();
        assert!(!still_running);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn default_settings_use_normal_tick_rate() {
        let settings = SamplerSettings::default();
        assert_eq!(settings.interval, Duration::from_millis(1000));
        assert_eq!(settings.grace_period, Duration::from_millis(10));
        assert_eq!(settings.load_window, 3);
        let fast = settings.with_interval(TickRate::Fast);
        assert_eq!(fast.interval, Duration::from_millis(500));
    }

    #[test]
    fn zero_interval_is_clamped_to_one_millisecond() {
        let control = SamplerControl::new(Duration::ZERO);
        assert_eq!(control.interval(), Duration::from_millis(1));
        control.set_interval(Duration::from_millis(250));
        assert_eq!(control.interval(), Duration::from_millis(250));
    }
}
