use super::PlatformExtensions;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn process_priority(_pid: u32) -> Option<i32> {
        None
    }

    fn process_thread_count(_pid: u32) -> Option<u32> {
        None
    }
}
