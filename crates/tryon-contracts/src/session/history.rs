use std::collections::VecDeque;

use crate::tryon::HISTORY_LIMIT;

/// Successful primary results, most recent first.
///
/// Append-only apart from evicting the oldest entry once the bound is exceeded.
/// Never persisted; it lives as long as the session that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHistory {
    entries: VecDeque<String>,
    limit: usize,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit: limit.max(1),
        }
    }

    /// Inserts at the front and returns the evicted entry, if any.
    pub fn push(&mut self, image: impl Into<String>) -> Option<String> {
        self.entries.push_front(image.into());
        if self.entries.len() > self.limit {
            return self.entries.pop_back();
        }
        None
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn latest(&self) -> Option<&str> {
        self.get(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SessionHistory;

    #[test]
    fn newest_entry_is_first() {
        let mut history = SessionHistory::new();
        history.push("a");
        history.push("b");
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(history.latest(), Some("b"));
    }

    #[test]
    fn sixteenth_push_evicts_oldest() {
        let mut history = SessionHistory::new();
        for idx in 0..15 {
            assert_eq!(history.push(format!("img-{idx}")), None);
        }
        assert_eq!(history.len(), 15);

        let evicted = history.push("img-15");
        assert_eq!(evicted.as_deref(), Some("img-0"));
        assert_eq!(history.len(), 15);
        assert_eq!(history.get(0), Some("img-15"));
        assert_eq!(history.get(14), Some("img-1"));
    }

    #[test]
    fn never_exceeds_bound() {
        let mut history = SessionHistory::with_limit(3);
        for idx in 0..50 {
            history.push(idx.to_string());
            assert!(history.len() <= 3);
        }
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["49", "48", "47"]);
    }
}
