//! Change-log entries replayed from a primary index.
//!
//! An entry is `[op: u8][version: i64 BE][payload]`. `Add` payloads are a
//! JSON document, `DeleteByQuery` payloads a JSON query (either a query
//! string or a serialized [`QueryExpr`]), and `Commit` payloads are empty.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use suggest_core::error::{Result, SuggestError};
use suggest_core::query::QueryExpr;
use suggest_core::query_string;
use suggest_core::types::{keys, Record};

const HEADER_LEN: usize = 9;
/// Largest frame a file log may hold. A bigger length prefix is corruption.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Add = 1,
    DeleteByQuery = 2,
    Commit = 3,
}

impl Operation {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Operation::Add),
            2 => Some(Operation::DeleteByQuery),
            3 => Some(Operation::Commit),
            _ => None,
        }
    }
}

/// Filter carried by a delete-by-query entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeleteFilter {
    /// Lucene-style query string; bare terms apply to `text`.
    QueryString(String),
    Query(QueryExpr),
}

impl DeleteFilter {
    pub fn into_query(self) -> Result<QueryExpr> {
        match self {
            DeleteFilter::QueryString(q) => Ok(query_string::parse(&q)?.to_query_expr(keys::TEXT)),
            DeleteFilter::Query(q) => Ok(q),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub op: u8,
    pub version: i64,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn add(version: i64, doc: &Record) -> Result<Self> {
        Ok(Self { op: Operation::Add as u8, version, payload: serde_json::to_vec(doc)? })
    }

    pub fn delete_by_query(version: i64, filter: &DeleteFilter) -> Result<Self> {
        Ok(Self { op: Operation::DeleteByQuery as u8, version, payload: serde_json::to_vec(filter)? })
    }

    pub fn commit(version: i64) -> Self {
        Self { op: Operation::Commit as u8, version, payload: Vec::new() }
    }

    /// `None` for op codes this consumer does not know.
    pub fn operation(&self) -> Option<Operation> {
        Operation::from_code(self.op)
    }

    pub fn document(&self) -> Result<Record> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn filter(&self) -> Result<DeleteFilter> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.op);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(SuggestError::Parse(format!("log entry too short: {} bytes", bytes.len())));
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&bytes[1..HEADER_LEN]);
        Ok(Self { op: bytes[0], version: i64::from_be_bytes(version), payload: bytes[HEADER_LEN..].to_vec() })
    }
}

/// Forward-only reader over one log.
pub trait TranslogCursor: Send {
    /// `Ok(None)` once the log is exhausted.
    fn next_entry(&mut self) -> Result<Option<LogEntry>>;
}

/// A reference-counted log handle. The producer holds one reference; each
/// consumer acquires one while it reads and releases it when done.
pub trait Translog: Send + Sync {
    fn name(&self) -> &str;
    fn cursor(&self) -> Result<Box<dyn TranslogCursor>>;
    fn acquire(&self);
    fn release(&self);
    fn ref_count(&self) -> usize;
}

#[derive(Debug, Default)]
struct RefCount(AtomicUsize);

impl RefCount {
    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub struct MemoryTranslog {
    name: String,
    frames: Mutex<Vec<Vec<u8>>>,
    refs: RefCount,
}

impl MemoryTranslog {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn append(&self, entry: &LogEntry) {
        self.frames.lock().push(entry.encode());
    }

    /// Append raw bytes as one frame, valid or not.
    pub fn append_raw(&self, frame: Vec<u8>) {
        self.frames.lock().push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryCursor {
    frames: std::vec::IntoIter<Vec<u8>>,
}

impl TranslogCursor for MemoryCursor {
    fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        self.frames.next().map(|f| LogEntry::decode(&f)).transpose()
    }
}

impl Translog for MemoryTranslog {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor(&self) -> Result<Box<dyn TranslogCursor>> {
        Ok(Box::new(MemoryCursor { frames: self.frames.lock().clone().into_iter() }))
    }

    fn acquire(&self) {
        self.refs.acquire();
    }

    fn release(&self) {
        self.refs.release();
    }

    fn ref_count(&self) -> usize {
        self.refs.get()
    }
}

/// A log file of `u32` BE length-prefixed entry frames.
#[derive(Debug)]
pub struct FileTranslog {
    name: String,
    path: PathBuf,
    refs: RefCount,
}

impl FileTranslog {
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(SuggestError::NotFound(format!("translog '{}'", path.display())));
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(Arc::new(Self { name, path, refs: RefCount::default() }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries to `path`, creating the file if needed.
    pub fn append(path: impl AsRef<Path>, entries: &[LogEntry]) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut out = BufWriter::new(file);
        for entry in entries {
            let frame = entry.encode();
            let len = u32::try_from(frame.len())
                .ok()
                .filter(|_| frame.len() <= MAX_FRAME_BYTES)
                .ok_or_else(|| SuggestError::Operation(format!("log entry of {} bytes is too large", frame.len())))?;
            out.write_all(&len.to_be_bytes())?;
            out.write_all(&frame)?;
        }
        out.flush()?;
        Ok(())
    }
}

struct FileCursor {
    reader: BufReader<File>,
}

impl TranslogCursor for FileCursor {
    fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len) {
            Ok(()) => {}
            // A torn length prefix at the tail means the writer stopped mid-append.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(SuggestError::Parse(format!("translog frame of {len} bytes exceeds {MAX_FRAME_BYTES}")));
        }
        let mut frame = vec![0u8; len];
        self.reader.read_exact(&mut frame)?;
        LogEntry::decode(&frame).map(Some)
    }
}

impl Translog for FileTranslog {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor(&self) -> Result<Box<dyn TranslogCursor>> {
        Ok(Box::new(FileCursor { reader: BufReader::new(File::open(&self.path)?) }))
    }

    fn acquire(&self) {
        self.refs.acquire();
    }

    fn release(&self) {
        self.refs.release();
    }

    fn ref_count(&self) -> usize {
        self.refs.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_header_is_op_then_big_endian_version() {
        let bytes = LogEntry::commit(258).encode();
        assert_eq!(bytes, vec![3, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(LogEntry::decode(&bytes).unwrap().operation(), Some(Operation::Commit));
    }

    #[test]
    fn short_frames_and_unknown_ops() {
        assert!(LogEntry::decode(&[1, 2, 3]).is_err());
        let entry = LogEntry::decode(&[9, 0, 0, 0, 0, 0, 0, 0, 1]).unwrap();
        assert_eq!(entry.op, 9);
        assert_eq!(entry.operation(), None);
    }

    #[test]
    fn string_filters_default_to_text() {
        let filter: DeleteFilter = serde_json::from_str("\"kinds:user\"").unwrap();
        assert_eq!(filter.into_query().unwrap(), QueryExpr::term("kinds", "user"));
        let filter: DeleteFilter = serde_json::from_str("\"rust\"").unwrap();
        assert_eq!(filter.into_query().unwrap(), QueryExpr::term("text", "rust"));
    }

    #[test]
    fn oversized_length_prefix_is_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.log");
        FileTranslog::append(&path, &[LogEntry::commit(1)]).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&[1, 0, 0]);
        std::fs::write(&path, bytes).unwrap();

        let log = FileTranslog::open(&path).unwrap();
        let mut cursor = log.cursor().unwrap();
        assert_eq!(cursor.next_entry().unwrap().unwrap().operation(), Some(Operation::Commit));
        assert!(matches!(cursor.next_entry(), Err(SuggestError::Parse(_))));
    }

    #[test]
    fn release_never_underflows() {
        let log = MemoryTranslog::new("t");
        log.release();
        assert_eq!(log.ref_count(), 0);
        log.acquire();
        log.acquire();
        log.release();
        assert_eq!(log.ref_count(), 1);
    }
}
