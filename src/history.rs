use crate::io_struct::ChatHistoryEntry;
use std::collections::VecDeque;

/// Bounded FIFO buffer of chat exchanges, owned by the presentation layer.
/// Once full, pushing a new entry evicts the oldest one.
#[derive(Debug)]
pub struct ChatHistory {
    entries: VecDeque<ChatHistoryEntry>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        ChatHistory {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ChatHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries oldest-first.
    pub fn entries(&self) -> Vec<ChatHistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: usize) -> ChatHistoryEntry {
        ChatHistoryEntry {
            user_message: format!("question {i}"),
            assistant_message: format!("answer {i}"),
            timestamp: format!("2025-01-01T00:00:{:02}Z", i % 60),
            request_id: Some(format!("req-{i}")),
        }
    }

    #[test]
    fn push_keeps_insertion_order() {
        let mut history = ChatHistory::new(10);
        for i in 0..3 {
            history.push(entry(i));
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].user_message, "question 0");
        assert_eq!(entries[2].user_message, "question 2");
    }

    #[test]
    fn hundred_and_first_entry_evicts_the_oldest() {
        let mut history = ChatHistory::new(100);
        for i in 0..101 {
            history.push(entry(i));
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0].user_message, "question 1");
        assert_eq!(entries[99].user_message, "question 100");
        // Relative order of the survivors is unchanged.
        for (pos, e) in entries.iter().enumerate() {
            assert_eq!(e.user_message, format!("question {}", pos + 1));
        }
    }

    #[test]
    fn clear_empties_the_buffer() {
        let mut history = ChatHistory::new(5);
        history.push(entry(0));
        assert!(!history.is_empty());
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.len(), 0);
    }
}
