//! Ready set ordered by priority, then creation time, then submission order.

use std::cmp::Ordering;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// Ready-set entry
///
/// Wraps an item with the keys that decide its dispatch order.
/// Lower priority values are dequeued first.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Priority value (lower values = more urgent)
    pub priority: u8,
    /// Creation time of the wrapped item, FIFO within a priority
    pub created_at: DateTime<Utc>,
    /// Submission sequence, breaks ties on identical timestamps
    pub seq: u64,
    /// The wrapped item
    pub item: T,
}

impl<T> QueueItem<T> {
    fn key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.priority, self.created_at, self.seq)
    }
}

impl<T> PartialEq for QueueItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for QueueItem<T> {}

impl<T> PartialOrd for QueueItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueueItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority-ordered ready set
///
/// Items are ordered by priority (ascending numeric value), then by creation
/// time, then by submission order. Unlike a plain priority queue it supports
/// taking the first item that satisfies a predicate, so an item that cannot
/// run right now does not block the ones behind it.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use overwatch::domain::models::ReadySet;
///
/// let now = Utc::now();
/// let mut ready = ReadySet::new();
/// ready.enqueue("background", 4, now);
/// ready.enqueue("critical", 0, now);
/// ready.enqueue("medium", 2, now);
///
/// assert_eq!(ready.dequeue(), Some("critical"));
/// assert_eq!(ready.dequeue(), Some("medium"));
/// assert_eq!(ready.dequeue(), Some("background"));
/// ```
#[derive(Debug, Clone)]
pub struct ReadySet<T> {
    items: VecDeque<QueueItem<T>>,
    next_seq: u64,
}

impl<T> ReadySet<T> {
    /// Creates a new empty ready set
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Creates a new ready set with space for `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Adds an item, keeping the set ordered
    ///
    /// # Arguments
    ///
    /// * `item` - The item to enqueue
    /// * `priority` - Priority value (0 = most urgent)
    /// * `created_at` - Creation time used for FIFO ordering within a priority
    pub fn enqueue(&mut self, item: T, priority: u8, created_at: DateTime<Utc>) {
        let queue_item = QueueItem {
            priority,
            created_at,
            seq: self.next_seq,
            item,
        };
        self.next_seq += 1;

        // Insert before the first item that sorts after the new one
        let position = self
            .items
            .iter()
            .position(|existing| queue_item < *existing)
            .unwrap_or(self.items.len());

        self.items.insert(position, queue_item);
    }

    /// Removes and returns the most urgent item
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front().map(|queue_item| queue_item.item)
    }

    /// Removes and returns the most urgent item satisfying `predicate`
    ///
    /// Items that fail the predicate keep their place.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use overwatch::domain::models::ReadySet;
    ///
    /// let now = Utc::now();
    /// let mut ready = ReadySet::new();
    /// ready.enqueue(90, 0, now);
    /// ready.enqueue(30, 1, now);
    ///
    /// // Take the most urgent item below 50
    /// assert_eq!(ready.dequeue_first(|&cost| cost < 50), Some(30));
    /// assert_eq!(ready.len(), 1);
    /// ```
    pub fn dequeue_first<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.items.iter().position(|queue_item| predicate(&queue_item.item))?;
        self.items.remove(index).map(|queue_item| queue_item.item)
    }

    /// Returns a reference to the most urgent item without removing it
    pub fn peek(&self) -> Option<&T> {
        self.items.front().map(|queue_item| &queue_item.item)
    }

    /// Returns the number of items in the set
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the set contains no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes all items
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates items in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|queue_item| &queue_item.item)
    }

    /// Removes and returns items matching a predicate, in dispatch order
    pub fn remove_matching<F>(&mut self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut removed = Vec::new();
        let mut i = 0;

        while i < self.items.len() {
            if predicate(&self.items[i].item) {
                if let Some(queue_item) = self.items.remove(i) {
                    removed.push(queue_item.item);
                }
            } else {
                i += 1;
            }
        }

        removed
    }

    /// Returns the number of items matching a predicate
    pub fn count_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.items
            .iter()
            .filter(|queue_item| predicate(&queue_item.item))
            .count()
    }
}

impl<T> Default for ReadySet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_set_is_empty() {
        let ready: ReadySet<String> = ReadySet::new();
        assert!(ready.is_empty());
        assert_eq!(ready.len(), 0);
    }

    #[test]
    fn test_priority_ordering() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue("low", 3, now);
        ready.enqueue("critical", 0, now);
        ready.enqueue("high", 1, now);

        assert_eq!(ready.dequeue(), Some("critical"));
        assert_eq!(ready.dequeue(), Some("high"));
        assert_eq!(ready.dequeue(), Some("low"));
        assert_eq!(ready.dequeue(), None);
    }

    #[test]
    fn test_created_at_orders_within_priority() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue("newer", 2, now);
        ready.enqueue("older", 2, now - Duration::seconds(10));

        assert_eq!(ready.dequeue(), Some("older"));
        assert_eq!(ready.dequeue(), Some("newer"));
    }

    #[test]
    fn test_fifo_for_identical_keys() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue("first", 2, now);
        ready.enqueue("second", 2, now);
        ready.enqueue("third", 2, now);

        assert_eq!(ready.dequeue(), Some("first"));
        assert_eq!(ready.dequeue(), Some("second"));
        assert_eq!(ready.dequeue(), Some("third"));
    }

    #[test]
    fn test_dequeue_first_skips_non_matching() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue(("big", 0.9), 0, now);
        ready.enqueue(("small", 0.2), 1, now);
        ready.enqueue(("medium", 0.5), 2, now);

        let picked = ready.dequeue_first(|(_, cost)| *cost <= 0.5);
        assert_eq!(picked, Some(("small", 0.2)));
        assert_eq!(ready.peek(), Some(&("big", 0.9)));
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn test_dequeue_first_none_leaves_set_intact() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue(1, 0, now);
        ready.enqueue(2, 1, now);

        assert_eq!(ready.dequeue_first(|&x| x > 5), None);
        assert_eq!(ready.len(), 2);
    }

    #[test]
    fn test_remove_matching() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue(1, 2, now);
        ready.enqueue(2, 0, now);
        ready.enqueue(3, 2, now);
        ready.enqueue(4, 4, now);

        let removed = ready.remove_matching(|&item| item % 2 == 0);
        assert_eq!(removed, vec![2, 4]);

        let remaining: Vec<i32> = ready.iter().copied().collect();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn test_count_matching() {
        let now = Utc::now();
        let mut ready = ReadySet::new();
        ready.enqueue(1, 2, now);
        ready.enqueue(2, 0, now);
        ready.enqueue(3, 2, now);

        assert_eq!(ready.count_matching(|&item| item > 1), 2);
        assert_eq!(ready.count_matching(|_| true), 3);
    }

    #[test]
    fn test_with_capacity_and_clear() {
        let now = Utc::now();
        let mut ready: ReadySet<i32> = ReadySet::with_capacity(16);
        ready.enqueue(1, 0, now);
        ready.clear();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_queue_item_ordering() {
        let now = Utc::now();
        let urgent = QueueItem { priority: 0, created_at: now, seq: 5, item: "urgent" };
        let lazy = QueueItem { priority: 4, created_at: now, seq: 0, item: "lazy" };

        assert!(urgent < lazy);
    }
}
