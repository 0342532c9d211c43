//! # apply
//!
//! why: materialize committed commands on the local state machine
//! relations: ModelStore::apply is installed into node.rs as the apply callback
//! what: Command schema, command builders, atomic STORE_FILE handling

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// commands whose apply semantics are defined by the default handler
///
/// anything the log carries is an arbitrary json object; only these
/// `action` values mean something to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
    /// write the decoded payload into the model directory, atomically
    #[serde(rename = "STORE_FILE")]
    StoreFile { filename: String, data_b64: String },
    /// a model finished training on the leader; informational only, the
    /// artifact itself travels in a separate STORE_FILE entry
    #[serde(rename = "MODEL_TRAINED")]
    ModelTrained { model_id: String, model_path: String },
    /// anything else is logged and ignored
    #[serde(other)]
    Unknown,
}

impl Command {
    /// build a STORE_FILE command carrying `bytes` as standard base64
    pub fn store_file(filename: &str, bytes: &[u8]) -> serde_json::Value {
        json!({
            "action": "STORE_FILE",
            "filename": filename,
            "data_b64": BASE64.encode(bytes),
        })
    }

    /// build a MODEL_TRAINED record for the log
    pub fn model_trained(model_id: &str, model_path: &str) -> serde_json::Value {
        json!({
            "action": "MODEL_TRAINED",
            "model_id": model_id,
            "model_path": model_path,
        })
    }
}

/// applies committed commands to the local model directory
///
/// replaying an entry overwrites a file with the same bytes, so apply
/// is idempotent by content
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    /// create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// the directory artifacts are materialized into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// apply one committed command
    ///
    /// errors are logged and never propagated; the entry counts as
    /// applied either way
    pub fn apply(&self, command: &serde_json::Value) {
        match serde_json::from_value::<Command>(command.clone()) {
            Ok(Command::StoreFile { filename, data_b64 }) => {
                match self.store_file(&filename, &data_b64) {
                    Ok(len) => info!("applied STORE_FILE: wrote {filename} ({len} bytes)"),
                    Err(err) => warn!("STORE_FILE {filename} failed: {err}"),
                }
            }
            Ok(Command::ModelTrained { model_id, .. }) => {
                info!("model {model_id} trained on the leader");
            }
            Ok(Command::Unknown) | Err(_) => {
                debug!("ignoring unrecognized command: {command}");
            }
        }
    }

    /// decode and write one artifact under the store: temp sibling, then rename
    ///
    /// `filename` must be a bare basename; separators and `..` are rejected
    pub fn store_file(&self, filename: &str, data_b64: &str) -> io::Result<usize> {
        if !is_basename(filename) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a bare filename: {filename}"),
            ));
        }
        let bytes = BASE64
            .decode(data_b64)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp = self.dir.join(format!("{filename}.tmp"));
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, self.dir.join(filename))?;

        Ok(bytes.len())
    }
}

/// true when the name has no path separators or parent references
fn is_basename(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn store_file_writes_decoded_bytes() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();

        let written = store.store_file("m1.bin", "QUJD").unwrap();

        assert_eq!(written, 3);
        assert_eq!(fs::read(dir.path().join("m1.bin")).unwrap(), b"ABC");
        assert!(!dir.path().join("m1.bin.tmp").exists());
    }

    #[test]
    fn store_file_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();

        store.store_file("m1.bin", "aGVsbG8=").unwrap();
        store.store_file("m1.bin", "aGVsbG8=").unwrap();

        assert_eq!(fs::read(dir.path().join("m1.bin")).unwrap(), b"hello");
    }

    #[test]
    fn store_file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();

        for name in ["../evil.bin", "a/b.bin", "a\\b.bin", "..", ""] {
            let err = store.store_file(name, "QUJD").unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name}");
        }
    }

    #[test]
    fn store_file_rejects_bad_base64() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();

        let err = store.store_file("m1.bin", "not base64!!!").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn apply_ignores_unknown_actions() {
        let dir = tempdir().unwrap();
        let store = ModelStore::new(dir.path()).unwrap();

        // must not panic or create files
        store.apply(&json!({"action": "SOMETHING_ELSE", "x": 1}));
        store.apply(&json!({"no_action": true}));

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn command_builders_round_trip() {
        let value = Command::store_file("m.bin", b"hello");
        match serde_json::from_value::<Command>(value).unwrap() {
            Command::StoreFile { filename, data_b64 } => {
                assert_eq!(filename, "m.bin");
                assert_eq!(data_b64, "aGVsbG8=");
            }
            other => panic!("expected StoreFile, got {other:?}"),
        }

        let value = Command::model_trained("42", "/tmp/model_42.bin");
        match serde_json::from_value::<Command>(value).unwrap() {
            Command::ModelTrained { model_id, model_path } => {
                assert_eq!(model_id, "42");
                assert_eq!(model_path, "/tmp/model_42.bin");
            }
            other => panic!("expected ModelTrained, got {other:?}"),
        }
    }
}
