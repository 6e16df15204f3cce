use std::collections::VecDeque;

use crate::generator::Usage;

/// One executed exchange: what was asked and the SQL that ran for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub prompt: String,
    pub sql: String,
    pub usage: Option<Usage>,
}

impl ConversationEntry {
    #[must_use]
    pub fn new(prompt: impl Into<String>, sql: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            prompt: prompt.into(),
            sql: sql.into(),
            usage,
        }
    }
}

/// Bounded window of recent exchanges, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    capacity: usize,
    entries: VecDeque<ConversationEntry>,
    total_entries_seen: u64,
}

impl ConversationWindow {
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            total_entries_seen: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_entries_seen(&self) -> u64 {
        self.total_entries_seen
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        self.total_entries_seen += 1;
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ConversationEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn last(&self) -> Option<&ConversationEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    /// Owned copy handed to generation requests.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationEntry> {
        self.entries.iter().cloned().collect()
    }
}
