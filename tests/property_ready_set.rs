use chrono::{Duration, TimeZone, Utc};
use overwatch::domain::models::ReadySet;
use proptest::prelude::*;

/// (priority, creation offset in seconds)
fn entries() -> impl Strategy<Value = Vec<(u8, i64)>> {
    prop::collection::vec((0u8..5, 0i64..20), 0..60)
}

proptest! {
    /// Property: dequeue order is priority, then creation time, then
    /// submission order
    #[test]
    fn prop_dequeue_order_is_stable_sort(entries in entries()) {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut ready = ReadySet::new();
        for (index, &(priority, offset)) in entries.iter().enumerate() {
            ready.enqueue(index, priority, base + Duration::seconds(offset));
        }

        let mut expected: Vec<usize> = (0..entries.len()).collect();
        expected.sort_by_key(|&i| (entries[i].0, entries[i].1));

        let mut drained = Vec::new();
        while let Some(index) = ready.dequeue() {
            drained.push(index);
        }
        prop_assert_eq!(drained, expected);
    }

    /// Property: skipped items keep their relative order
    #[test]
    fn prop_dequeue_first_preserves_the_rest(
        entries in entries(),
        modulus in 2usize..5
    ) {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        for (index, &(priority, _)) in entries.iter().enumerate() {
            ready.enqueue(index, priority, now);
        }
        let before: Vec<usize> = ready.iter().copied().collect();

        let taken = ready.dequeue_first(|index| index % modulus == 0);
        let expected_taken = before.iter().copied().find(|index| index % modulus == 0);
        prop_assert_eq!(taken, expected_taken);

        let after: Vec<usize> = ready.iter().copied().collect();
        let expected_after: Vec<usize> = before
            .into_iter()
            .filter(|index| Some(*index) != taken)
            .collect();
        prop_assert_eq!(after, expected_after);
    }

    /// Property: remove_matching plus the remainder is the original set
    #[test]
    fn prop_remove_matching_partitions(entries in entries()) {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        for (index, &(priority, _)) in entries.iter().enumerate() {
            ready.enqueue(index, priority, now);
        }
        let total = ready.len();
        let odd_count = ready.count_matching(|index| index % 2 == 1);

        let removed = ready.remove_matching(|index| index % 2 == 1);
        prop_assert_eq!(removed.len(), odd_count);
        prop_assert_eq!(removed.len() + ready.len(), total);
        prop_assert!(ready.iter().all(|index| index % 2 == 0));
    }
}
