pub trait PlatformExtensions {
    fn process_priority(pid: u32) -> Option<i32>;
    fn process_thread_count(pid: u32) -> Option<u32>;

    /// Priority and thread count together, for sources that can answer both
    /// from one OS query.
    fn process_stat(pid: u32) -> (Option<i32>, Option<u32>) {
        (Self::process_priority(pid), Self::process_thread_count(pid))
    }
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod unsupported;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use unsupported as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;

pub fn process_priority(pid: u32) -> Option<i32> {
    platform_impl::Platform::process_priority(pid)
}

pub fn process_thread_count(pid: u32) -> Option<u32> {
    platform_impl::Platform::process_thread_count(pid)
}

/// `(priority, thread count)` of `pid`, queried once per call.
pub fn process_stat(pid: u32) -> (Option<i32>, Option<u32>) {
    platform_impl::Platform::process_stat(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers_do_not_panic_for_current_pid() {
        let pid = std::process::id();
        let _ = process_priority(pid);
        let _ = process_thread_count(pid);
    }

    #[test]
    fn wrappers_return_none_for_missing_pid() {
        assert_eq!(process_thread_count(u32::MAX), None);
        assert_eq!(process_stat(u32::MAX), (None, None));
    }

    #[test]
    fn combined_stat_agrees_with_single_queries() {
        let pid = std::process::id();
        let (priority, _) = process_stat(pid);
        assert_eq!(priority, process_priority(pid));
    }
}
