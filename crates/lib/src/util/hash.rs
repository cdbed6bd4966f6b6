//! Content hashing for file identity and cache keys.
//!
//! Every hash in the engine is a full 64-character lowercase-hex SHA-256
//! computed over raw bytes (never text-decoded content).

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

/// A full 64-character lowercase-hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Hash a string's UTF-8 bytes.
pub fn hash_str(data: &str) -> ContentHash {
  hash_bytes(data.as_bytes())
}

/// Hash a file's contents without loading it whole into memory.
pub fn hash_file(path: &Path) -> EngineResult<ContentHash> {
  let mut file =
    fs::File::open(path).map_err(|e| EngineError::io(format!("open {}", path.display()), &e))?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file
      .read(&mut buffer)
      .map_err(|e| EngineError::io(format!("read {}", path.display()), &e))?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn bytes_hash_is_deterministic() {
    assert_eq!(hash_bytes(b"hello"), hash_bytes(b"hello"));
    assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    assert_eq!(hash_bytes(b"hello").0.len(), 64);
  }

  #[test]
  fn file_hash_matches_bytes_hash() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("f.txt");
    fs::write(&path, "some content").unwrap();
    assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"some content"));
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let temp = tempdir().unwrap();
    let err = hash_file(&temp.path().join("absent")).unwrap_err();
    assert!(matches!(err, EngineError::Io { .. }));
  }
}
