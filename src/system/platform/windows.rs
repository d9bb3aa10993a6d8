use super::PlatformExtensions;

use windows_sys::Win32::{
    Foundation::CloseHandle,
    System::Threading::{GetPriorityClass, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION},
};

pub struct Platform;

impl PlatformExtensions for Platform {
    fn process_priority(pid: u32) -> Option<i32> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return None;
            }
            let class = GetPriorityClass(handle);
            CloseHandle(handle);
            if class == 0 { None } else { i32::try_from(class).ok() }
        }
    }

    // Thread counts come from a toolhelp snapshot, which sysinfo does not
    // surface; report unknown rather than walk the snapshot per process.
    fn process_thread_count(_pid: u32) -> Option<u32> {
        None
    }
}
