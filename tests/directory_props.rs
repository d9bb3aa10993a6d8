use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use proptest::prelude::*;
use telemon::system::ProcessDirectory;
use telemon::system::source::ProcessRecord;

fn records(pids: &BTreeSet<u32>, generation: u64) -> Vec<ProcessRecord> {
    pids.iter()
        .map(|&pid| {
            ProcessRecord::new(pid, 1, format!("proc-{pid}"))
                .with_memory(u64::from(pid) * 1024 + generation, 0)
        })
        .collect()
}

fn pid_set() -> impl Strategy<Value = BTreeSet<u32>> {
    proptest::collection::btree_set(1u32..200, 0..40)
}

proptest! {
    #[test]
    fn second_pass_tracks_exactly_the_observed_set(first in pid_set(), second in pid_set()) {
        let directory = ProcessDirectory::new();
        directory.refresh(&records(&first, 0), 4);

        let before: BTreeMap<u32, _> = first
            .iter()
            .filter_map(|&pid| directory.find(pid).map(|entry| (pid, entry)))
            .collect();

        let stats = directory.refresh(&records(&second, 1), 4);

        prop_assert_eq!(directory.len(), second.len());
        for pid in &second {
            prop_assert!(directory.contains(*pid));
        }
        for pid in first.difference(&second) {
            prop_assert!(!directory.contains(*pid));
        }
        for pid in first.intersection(&second) {
            let now = directory.find(*pid).unwrap();
            prop_assert!(Arc::ptr_eq(&before[pid], &now));
            prop_assert_eq!(now.working_set_size(), u64::from(*pid) * 1024 + 1);
        }
        for pid in second.difference(&first) {
            prop_assert!(!before.contains_key(pid));
            prop_assert!(directory.find(*pid).unwrap().is_running());
        }

        prop_assert_eq!(stats.added, second.difference(&first).count());
        prop_assert_eq!(stats.updated, first.intersection(&second).count());
        prop_assert_eq!(stats.removed, first.difference(&second).count());
    }

    #[test]
    fn selection_persists_while_process_lives(
        passes in proptest::collection::vec(pid_set(), 1..8),
        chosen in 1u32..200,
    ) {
        let directory = ProcessDirectory::new();
        let mut initial = BTreeSet::new();
        initial.insert(chosen);
        directory.refresh(&records(&initial, 0), 1);
        prop_assert!(directory.select(chosen));

        let mut alive = true;
        for (generation, mut pids) in passes.into_iter().enumerate() {
            if alive && generation % 3 != 2 {
                pids.insert(chosen);
            }
            alive = alive && pids.contains(&chosen);
            directory.refresh(&records(&pids, generation as u64), 1);

            let container = directory.snapshot();
            let selected: Vec<u32> = container
                .iter()
                .filter(|entry| entry.is_selected())
                .map(|entry| entry.id())
                .collect();
            if alive {
                prop_assert_eq!(container.selected_entry_id(), Some(chosen));
                prop_assert_eq!(selected, vec![chosen]);
            } else {
                prop_assert_eq!(container.selected_entry_id(), None);
                prop_assert!(selected.is_empty());
            }
        }
    }
}
