use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    pub task: Option<String>,
}

/// Bounded in-memory ring of run-log entries, shared across clones.
#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add_log(&self, level: &str, message: String, task: Option<String>) {
        let entry = LogEntry {
            timestamp: Utc::now().timestamp(),
            level: level.to_string(),
            message,
            task,
        };

        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Entries oldest-first; with a limit, only the most recent `n`.
    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock();
        match limit {
            Some(n) => buffer
                .iter()
                .skip(buffer.len().saturating_sub(n))
                .cloned()
                .collect(),
            None => buffer.iter().cloned().collect(),
        }
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let buffer = LogBuffer::new(2);
        buffer.add_log("info", "one".into(), None);
        buffer.add_log("info", "two".into(), None);
        buffer.add_log("error", "three".into(), Some("job".into()));

        let logs = buffer.get_logs(None);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "two");
        assert_eq!(logs[1].message, "three");
        assert_eq!(logs[1].task.as_deref(), Some("job"));
    }

    #[test]
    fn limit_returns_most_recent_in_order() {
        let buffer = LogBuffer::new(10);
        for i in 0..5 {
            buffer.add_log("info", format!("m{i}"), None);
        }
        let logs = buffer.get_logs(Some(2));
        let messages: Vec<&str> = logs.iter().map(|entry| entry.message.as_str()).collect();
        assert_eq!(messages, vec!["m3", "m4"]);
    }
}
