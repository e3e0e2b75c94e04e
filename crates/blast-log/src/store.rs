//! Append-only JSONL delivery log with filtered, paginated queries.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::warn;

use blast_core::current_unix_timestamp_ms;

use crate::entry::{DeliveryStatus, LogEntry, MessageKind, NewLogEntry};

/// Upper bound a query's `page_size` is clamped to.
pub const MAX_LOG_PAGE_SIZE: usize = 200;

const DEFAULT_LOG_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Default)]
/// Filter and pagination parameters for [`DeliveryLogStore::query`].
pub struct LogQuery {
    pub status: Option<DeliveryStatus>,
    pub kind: Option<MessageKind>,
    /// Case-insensitive substring over recipient, display name, message,
    /// and failure text.
    pub search: Option<String>,
    /// Inclusive unix-ms bounds on `created_unix_ms`.
    pub start_unix_ms: Option<u64>,
    pub end_unix_ms: Option<u64>,
    /// 1-based; zero is treated as the first page.
    pub page: usize,
    /// Clamped to `1..=MAX_LOG_PAGE_SIZE`; zero selects the default of 20.
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
/// One page of query results, newest first.
pub struct LogPage {
    pub items: Vec<LogEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

/// Persistence contract the dispatch pipeline depends on. Implementations
/// must apply the `succeeded` derivation from [`NewLogEntry::into_entry`]
/// at append time.
pub trait DeliveryLogStore: Send + Sync {
    /// Persists one attempt and returns its assigned id.
    fn append(&self, entry: NewLogEntry) -> Result<String>;

    /// Returns matching entries, newest first, paginated.
    fn query(&self, query: &LogQuery) -> Result<LogPage>;

    /// Fetches a single entry by id.
    fn get(&self, id: &str) -> Result<Option<LogEntry>>;
}

/// Line-per-entry JSON log backed by a single append-only file.
///
/// Queries re-read the file; the log is an operator audit trail, not a hot
/// path, and the write side stays a cheap append + flush.
pub struct JsonlDeliveryLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
    next_seq: AtomicU64,
}

impl JsonlDeliveryLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let existing = read_entries(&path)?;
        let next_seq = existing
            .iter()
            .filter_map(|entry| parse_seq(&entry.id))
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeliveryLogStore for JsonlDeliveryLog {
    fn append(&self, entry: NewLogEntry) -> Result<String> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = entry.into_entry(format!("log-{seq:08}"), current_unix_timestamp_ms());
        let line = serde_json::to_string(&entry).context("failed to encode log entry")?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("delivery log mutex is poisoned"))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(entry.id)
    }

    fn query(&self, query: &LogQuery) -> Result<LogPage> {
        let mut matches: Vec<LogEntry> = read_entries(&self.path)?
            .into_iter()
            .filter(|entry| matches_query(entry, query))
            .collect();
        matches.sort_by(|a, b| {
            b.created_unix_ms
                .cmp(&a.created_unix_ms)
                .then_with(|| b.id.cmp(&a.id))
        });

        let page = query.page.max(1);
        let page_size = match query.page_size {
            0 => DEFAULT_LOG_PAGE_SIZE,
            n => n.min(MAX_LOG_PAGE_SIZE),
        };
        let total = matches.len();
        let total_pages = total.div_ceil(page_size).max(1);
        let items = matches
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(LogPage {
            items,
            page,
            page_size,
            total,
            total_pages,
        })
    }

    fn get(&self, id: &str) -> Result<Option<LogEntry>> {
        Ok(read_entries(&self.path)?
            .into_iter()
            .find(|entry| entry.id == id))
    }
}

fn parse_seq(id: &str) -> Option<u64> {
    id.strip_prefix("log-")?.parse().ok()
}

fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut entries = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(error) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %error,
                "skipping undecodable delivery log line"
            ),
        }
    }
    Ok(entries)
}

fn matches_query(entry: &LogEntry, query: &LogQuery) -> bool {
    if let Some(status) = query.status {
        if entry.status != status {
            return false;
        }
    }
    if let Some(kind) = query.kind {
        if entry.kind != kind {
            return false;
        }
    }
    if let Some(start) = query.start_unix_ms {
        if entry.created_unix_ms < start {
            return false;
        }
    }
    if let Some(end) = query.end_unix_ms {
        if entry.created_unix_ms > end {
            return false;
        }
    }
    if let Some(needle) = query.search.as_deref() {
        let needle = needle.to_lowercase();
        if !needle.is_empty() {
            let haystacks = [
                entry.recipient.as_str(),
                entry.display_name.as_str(),
                entry.message.as_str(),
                entry.failure_text.as_deref().unwrap_or(""),
            ];
            if !haystacks
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
    }
    true
}
