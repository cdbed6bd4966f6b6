//! Concrete file handles: in-memory content and on-disk files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::fileset::FileHandle;
use crate::util::hash::{self, ContentHash};

/// A file whose content lives entirely in memory, typically produced by a
/// build rule before materialization.
pub struct MemoryFile {
  name: String,
  content: Vec<u8>,
  hash: ContentHash,
}

impl MemoryFile {
  pub fn new(name: impl Into<String>, content: Vec<u8>) -> MemoryFile {
    let hash = hash::hash_bytes(&content);
    MemoryFile { name: name.into(), content, hash }
  }

  pub fn from_str(name: impl Into<String>, content: &str) -> MemoryFile {
    MemoryFile::new(name, content.as_bytes().to_vec())
  }
}

impl FileHandle for MemoryFile {
  fn hash(&self) -> &ContentHash {
    &self.hash
  }

  fn bytes(&self) -> EngineResult<Vec<u8>> {
    Ok(self.content.clone())
  }

  fn abs_path(&self) -> Option<&Path> {
    None
  }

  fn display_name(&self) -> String {
    format!("<memory:{}>", self.name)
  }
}

/// A file on disk, hashed eagerly on open so that content identity stays
/// stable even if the underlying file changes afterwards.
pub struct DiskFile {
  path: PathBuf,
  hash: ContentHash,
}

impl DiskFile {
  /// Open and hash an existing file. The path is canonicalized so the
  /// handle always reports a real, absolute path, whatever the caller
  /// passed in.
  pub fn open(path: impl Into<PathBuf>) -> EngineResult<DiskFile> {
    let path = path.into();
    let path = path
      .canonicalize()
      .map_err(|e| EngineError::io(format!("canonicalize {}", path.display()), &e))?;
    let hash = hash::hash_file(&path)?;
    Ok(DiskFile { path, hash })
  }

  /// Wrap a file whose hash is already known, e.g. from a cache
  /// manifest. The content is trusted and not re-read.
  pub fn with_hash(path: impl Into<PathBuf>, hash: ContentHash) -> DiskFile {
    DiskFile { path: path.into(), hash }
  }
}

impl FileHandle for DiskFile {
  fn hash(&self) -> &ContentHash {
    &self.hash
  }

  fn bytes(&self) -> EngineResult<Vec<u8>> {
    fs::read(&self.path).map_err(|e| EngineError::io(format!("read {}", self.path.display()), &e))
  }

  fn abs_path(&self) -> Option<&Path> {
    Some(&self.path)
  }

  fn display_name(&self) -> String {
    self.path.display().to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use tempfile::tempdir;

  #[test]
  fn memory_file_round_trips_content() {
    let file = MemoryFile::from_str("greeting", "hello");
    assert_eq!(file.read_to_string().unwrap(), "hello");
    assert_eq!(file.hash(), &hash_bytes(b"hello"));
    assert!(file.abs_path().is_none());
  }

  #[test]
  fn disk_file_hashes_on_open() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("f.txt");
    fs::write(&path, "content").unwrap();

    let file = DiskFile::open(&path).unwrap();
    assert_eq!(file.hash(), &hash_bytes(b"content"));
    assert_eq!(file.read_to_string().unwrap(), "content");
    assert_eq!(file.abs_path(), Some(path.canonicalize().unwrap().as_path()));
  }

  #[test]
  fn open_reports_a_canonical_absolute_path() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("sub")).unwrap();
    let path = temp.path().join("sub/../f.txt");
    fs::write(&path, "x").unwrap();

    let file = DiskFile::open(&path).unwrap();
    let abs = file.abs_path().unwrap();
    assert!(abs.is_absolute());
    assert!(!abs.components().any(|c| matches!(c, std::path::Component::ParentDir)));
    assert_eq!(abs, temp.path().canonicalize().unwrap().join("f.txt"));
  }

  #[test]
  fn hash_survives_later_modification() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("f.txt");
    fs::write(&path, "before").unwrap();

    let file = DiskFile::open(&path).unwrap();
    fs::write(&path, "after").unwrap();
    assert_eq!(file.hash(), &hash_bytes(b"before"));
  }

  #[test]
  fn same_content_at_different_paths_is_same_file() {
    let temp = tempdir().unwrap();
    let a = temp.path().join("a");
    let b = temp.path().join("b");
    fs::write(&a, "same").unwrap();
    fs::write(&b, "same").unwrap();

    let fa = DiskFile::open(&a).unwrap();
    let fb = DiskFile::open(&b).unwrap();
    assert!(fa.is_same_file(&fb));
  }
}
