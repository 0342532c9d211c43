//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: leaf crate; raft-core re-exports LogEntry and drives Storage
//! what: LogEntry, Storage trait, FileStorage (atomic raft_state.json), InMemoryStorage

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// name of the persisted state document inside the storage directory
pub const STATE_FILE: &str = "raft_state.json";

/// A single entry in the replicated log
///
/// the entry's index is its position in the containing log (0-indexed);
/// it is not stored in the entry itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// the term when this entry was created on the leader
    pub term: u64,
    /// the command to be applied to the state machine, an arbitrary json object
    pub command: serde_json::Value,
}

impl LogEntry {
    /// create a new log entry
    pub fn new(term: u64, command: serde_json::Value) -> Self {
        Self { term, command }
    }
}

/// on-disk document; voted_for uses "" for "no vote" to match the wire format
#[derive(Serialize, Deserialize, Default)]
struct StateDoc {
    current_term: u64,
    voted_for: String,
    log: Vec<LogEntry>,
}

/// trait for durable storage of raft state
///
/// this abstraction allows the same node code to work with:
/// - real filesystem (the daemon)
/// - in-memory (testing)
pub trait Storage: Send {
    /// persist the current term, vote, and full log
    fn save_state(&mut self, term: u64, voted_for: Option<&str>, log: &[LogEntry]) -> io::Result<()>;

    /// load the persisted state; a missing document yields `(0, None, [])`
    fn load_state(&self) -> io::Result<(u64, Option<String>, Vec<LogEntry>)>;

    /// clear all persisted state (for testing)
    fn clear(&mut self) -> io::Result<()>;
}

// -- file storage implementation --

/// file-based storage using std::fs
///
/// stores the whole raft state in a single `raft_state.json` document;
/// every save rewrites the document atomically (temp file then rename)
pub struct FileStorage {
    /// directory path holding the state document
    dir: PathBuf,
}

impl FileStorage {
    /// create a new filestorage at the given directory
    /// creates the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// get the path to the state document
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }
}

impl Storage for FileStorage {
    fn save_state(&mut self, term: u64, voted_for: Option<&str>, log: &[LogEntry]) -> io::Result<()> {
        let doc = StateDoc {
            current_term: term,
            voted_for: voted_for.unwrap_or("").to_owned(),
            log: log.to_vec(),
        };
        let json = serde_json::to_string(&doc)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join(format!("{STATE_FILE}.tmp"));
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.state_path())?;

        Ok(())
    }

    fn load_state(&self) -> io::Result<(u64, Option<String>, Vec<LogEntry>)> {
        let path = self.state_path();
        if !path.exists() {
            return Ok((0, None, Vec::new())); // default for new nodes
        }

        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let doc: StateDoc = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let voted_for = if doc.voted_for.is_empty() {
            None
        } else {
            Some(doc.voted_for)
        };
        Ok((doc.current_term, voted_for, doc.log))
    }

    fn clear(&mut self) -> io::Result<()> {
        let _ = fs::remove_file(self.state_path());
        Ok(())
    }
}

// -- in-memory storage implementation --

/// in-memory storage for testing
///
/// stores all state in memory, no persistence across restarts
#[derive(Default)]
pub struct InMemoryStorage {
    term: u64,
    voted_for: Option<String>,
    log: Vec<LogEntry>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn save_state(&mut self, term: u64, voted_for: Option<&str>, log: &[LogEntry]) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for.map(str::to_owned);
        self.log = log.to_vec();
        Ok(())
    }

    fn load_state(&self) -> io::Result<(u64, Option<String>, Vec<LogEntry>)> {
        Ok((self.term, self.voted_for.clone(), self.log.clone()))
    }

    fn clear(&mut self) -> io::Result<()> {
        self.term = 0;
        self.voted_for = None;
        self.log.clear();
        Ok(())
    }
}
