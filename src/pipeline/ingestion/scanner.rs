use crate::common::constants::{DOCUMENT_EXTENSION, DOCUMENT_PREFIX};
use crate::common::error::{NormalizerError, Result};
use crate::observability::metrics;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A source document discovered in the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Position in lexicographic file-name order; drives deterministic merging
    pub index: u32,
    pub name: String,
    pub path: PathBuf,
}

/// Result of inspecting one document
#[derive(Debug)]
pub enum ScanOutcome {
    /// Large enough to parse; carries the raw bytes
    Valid { bytes: Vec<u8> },
    /// Below the minimal-size threshold; excluded from all tables
    Empty { size: u64 },
    /// I/O failure while reading; logged and skipped
    Unreadable(std::io::Error),
}

/// List `CIK*.json` documents under `input_dir`, sorted by file name.
pub fn discover(input_dir: &Path) -> Result<Vec<DocumentRef>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(input_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if is_document_name(&name) {
            names.push(name);
        }
    }
    names.sort();

    if names.is_empty() {
        return Err(NormalizerError::NoDocuments(input_dir.to_path_buf()));
    }
    info!("Found {} company documents in {}", names.len(), input_dir.display());

    Ok(names
        .into_iter()
        .enumerate()
        .map(|(i, name)| DocumentRef {
            index: i as u32,
            path: input_dir.join(&name),
            name,
        })
        .collect())
}

fn is_document_name(name: &str) -> bool {
    name.starts_with(DOCUMENT_PREFIX)
        && Path::new(name)
            .extension()
            .map_or(false, |ext| ext == DOCUMENT_EXTENSION)
}

/// Classify a document as valid, near-empty or unreadable. Reads the file
/// only when it passes the size threshold.
pub fn scan(doc: &DocumentRef, min_bytes: u64) -> ScanOutcome {
    let size = match fs::metadata(&doc.path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("Cannot stat {}: {}", doc.name, e);
            metrics::scanner::document_unreadable();
            return ScanOutcome::Unreadable(e);
        }
    };

    if size < min_bytes {
        debug!("Skipping near-empty document {} ({} bytes)", doc.name, size);
        metrics::scanner::document_empty();
        return ScanOutcome::Empty { size };
    }

    match fs::read(&doc.path) {
        Ok(bytes) => {
            metrics::scanner::document_valid(bytes.len() as u64);
            ScanOutcome::Valid { bytes }
        }
        Err(e) => {
            warn!("Cannot read {}: {}", doc.name, e);
            metrics::scanner::document_unreadable();
            ScanOutcome::Unreadable(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn discover_filters_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("CIK0000000002.json"), "{}").unwrap();
        fs::write(dir.path().join("CIK0000000001.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("CIK0000000003.json.bak"), "x").unwrap();
        fs::create_dir(dir.path().join("CIK0000000004.json")).unwrap();

        let docs = discover(dir.path()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["CIK0000000001.json", "CIK0000000002.json"]);
        assert_eq!(docs[0].index, 0);
        assert_eq!(docs[1].index, 1);
    }

    #[test]
    fn discover_errors_on_empty_directory() {
        let dir = tempdir().unwrap();
        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(err, NormalizerError::NoDocuments(_)));
    }

    #[test]
    fn scan_classifies_by_size() {
        let dir = tempdir().unwrap();
        let small = dir.path().join("CIK0000000001.json");
        let large = dir.path().join("CIK0000000002.json");
        fs::write(&small, "{}").unwrap();
        fs::write(&large, "x".repeat(150)).unwrap();

        let doc = |index, path: &Path| DocumentRef {
            index,
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            path: path.to_path_buf(),
        };

        assert!(matches!(scan(&doc(0, &small), 100), ScanOutcome::Empty { size: 2 }));
        match scan(&doc(1, &large), 100) {
            ScanOutcome::Valid { bytes } => assert_eq!(bytes.len(), 150),
            other => panic!("expected valid, got {:?}", other),
        }
    }

    #[test]
    fn scan_reports_missing_file_as_unreadable() {
        let dir = tempdir().unwrap();
        let doc = DocumentRef {
            index: 0,
            name: "CIK0000000009.json".to_string(),
            path: dir.path().join("CIK0000000009.json"),
        };
        assert!(matches!(scan(&doc, 100), ScanOutcome::Unreadable(_)));
    }
}
