//! Output Buffer (spec §2 L1, §3 OutputEntry, §5 Backpressure).
//!
//! Append-only, cursor-indexed ring of stdio/console/exception entries.
//! Bounded by a configured retention; oldest entries are evicted once that
//! cap is exceeded. No back-pressure reaches the CDP channel itself — the
//! debuggee pauses naturally at breakpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputEntry {
    Stdio {
        stream: StdioStream,
        text: String,
        offset: u64,
    },
    Console {
        level: String,
        text: String,
        #[serde(default)]
        args: Vec<Value>,
        offset: u64,
    },
    Exception {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        offset: u64,
    },
}

impl OutputEntry {
    pub fn offset(&self) -> u64 {
        match self {
            OutputEntry::Stdio { offset, .. }
            | OutputEntry::Console { offset, .. }
            | OutputEntry::Exception { offset, .. } => *offset,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            OutputEntry::Stdio { text, .. }
            | OutputEntry::Console { text, .. }
            | OutputEntry::Exception { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioStream {
    Stdout,
    Stderr,
}

pub struct OutputBuffer {
    entries: VecDeque<OutputEntry>,
    next_cursor: u64,
    retention: usize,
}

impl OutputBuffer {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_cursor: 0,
            retention,
        }
    }

    fn push(&mut self, make: impl FnOnce(u64) -> OutputEntry) {
        let offset = self.next_cursor;
        self.next_cursor += 1;
        self.entries.push_back(make(offset));
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
    }

    pub fn push_stdio(&mut self, stream: StdioStream, text: String) {
        self.push(|offset| OutputEntry::Stdio { stream, text, offset });
    }

    pub fn push_console(&mut self, level: String, text: String, args: Vec<Value>) {
        self.push(|offset| OutputEntry::Console {
            level,
            text,
            args,
            offset,
        });
    }

    pub fn push_exception(&mut self, text: String, details: Option<Value>) {
        self.push(|offset| OutputEntry::Exception { text, details, offset });
    }

    /// Range query: entries with `offset >= since_cursor`, in insertion
    /// order.
    pub fn since(&self, since_cursor: u64) -> Vec<&OutputEntry> {
        self.entries
            .iter()
            .filter(|e| e.offset() >= since_cursor)
            .collect()
    }

    /// Substring search across retained entries, used by
    /// `search_console_output`.
    pub fn search(&self, needle: &str) -> Vec<&OutputEntry> {
        self.entries
            .iter()
            .filter(|e| e.text().contains(needle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
