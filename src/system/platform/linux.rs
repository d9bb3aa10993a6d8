use super::PlatformExtensions;

pub struct Platform;

/// Whitespace-separated fields of /proc/{pid}/stat after the `comm` field.
///
/// `comm` may contain spaces and parens, so split after the last `)`.
/// Index 0 is `state`, 15 is `priority`, 17 is `num_threads`.
fn stat_fields(pid: u32) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = contents.rfind(')')? + 1;
    Some(
        contents[after_comm..]
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    )
}

fn field<T: std::str::FromStr>(fields: &[String], index: usize) -> Option<T> {
    fields.get(index)?.parse().ok()
}

impl PlatformExtensions for Platform {
    fn process_priority(pid: u32) -> Option<i32> {
        field(&stat_fields(pid)?, 15)
    }

    fn process_thread_count(pid: u32) -> Option<u32> {
        field(&stat_fields(pid)?, 17)
    }

    fn process_stat(pid: u32) -> (Option<i32>, Option<u32>) {
        match stat_fields(pid) {
            Some(fields) => (field(&fields, 15), field(&fields, 17)),
            None => (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_has_at_least_one_thread() {
        let threads = Platform::process_thread_count(std::process::id()).unwrap();
        assert!(threads >= 1);
    }

    #[test]
    fn one_stat_read_yields_both_fields() {
        let pid = std::process::id();
        let (priority, threads) = Platform::process_stat(pid);
        assert!(priority.is_some());
        assert!(threads.is_some_and(|n| n >= 1));
        assert_eq!(Platform::process_stat(u32::MAX), (None, None));
    }
}
