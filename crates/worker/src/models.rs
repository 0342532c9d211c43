//! # models
//!
//! why: resolve trained model artifacts in the local model directory
//! relations: used by server.rs for PREDICT and LIST_MODELS, monitor.rs for /models
//! what: model id extraction, exact and partial artifact lookup

use std::fs;
use std::path::{Path, PathBuf};

/// list model ids for every `.bin` artifact in the directory
pub fn list_models(dir: &Path) -> Vec<String> {
    let mut models = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return models;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(id) = model_id_of(&name) {
            models.push(id);
        }
    }
    models.sort();
    models
}

/// list artifact filenames (for the monitor)
pub fn list_artifacts(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".bin") {
            names.push(name);
        }
    }
    names.sort();
    names
}

/// locate an artifact by model id: exact `model_<id>.bin` first, then
/// any `.bin` whose name contains the id
pub fn find_model(dir: &Path, model_id: &str) -> Option<PathBuf> {
    let exact = dir.join(format!("model_{model_id}.bin"));
    if exact.exists() {
        return Some(exact);
    }
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".bin") && name.contains(model_id) {
            return Some(entry.path());
        }
    }
    None
}

/// extract a model id from an artifact filename
fn model_id_of(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".bin")?;
    Some(stem.strip_prefix("model_").unwrap_or(stem).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_ids_with_and_without_prefix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model_abc123.bin"), b"x").unwrap();
        fs::write(dir.path().join("legacy.bin"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(list_models(dir.path()), vec!["abc123", "legacy"]);
    }

    #[test]
    fn empty_or_missing_directory_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(list_models(dir.path()).is_empty());
        assert!(list_models(&dir.path().join("nope")).is_empty());
    }

    #[test]
    fn finds_exact_match_before_partial() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model_ab.bin"), b"x").unwrap();
        fs::write(dir.path().join("model_ab_chunk1.bin"), b"x").unwrap();

        let found = find_model(dir.path(), "ab").unwrap();
        assert_eq!(found, dir.path().join("model_ab.bin"));
    }

    #[test]
    fn falls_back_to_partial_match() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model_12345678_chunk0.bin"), b"x").unwrap();

        let found = find_model(dir.path(), "12345678").unwrap();
        assert_eq!(found, dir.path().join("model_12345678_chunk0.bin"));
    }

    #[test]
    fn unknown_id_finds_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model_aa.bin"), b"x").unwrap();

        assert!(find_model(dir.path(), "zz").is_none());
    }
}
