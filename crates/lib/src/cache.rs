//! Content-addressed, disk-backed memoization of file-set builds.
//!
//! Each entry is keyed by the hash of a manifest string (normally the
//! canonical manifest of the build's inputs). The `<key>.manifest` file is
//! the commit point: it is written only after every output file is on
//! disk, so an observer never sees a manifest pointing at incomplete
//! output. Cross-process exclusion on the cache root is not provided;
//! concurrent tool invocations racing on the same key may both build.

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tracing::debug;

use crate::cell::{Cell, Flow};
use crate::consts::{CACHE_DIR_ENV, CACHE_DIR_NAME, CONTENT_HASH_LEN, MANIFEST_EXT};
use crate::error::{EngineError, EngineResult};
use crate::fileset::{DiskFile, FileRef, FileSet};
use crate::util::hash::{self, ContentHash};

/// Escapes spaces and newlines so logical names and paths round-trip
/// through the space-separated manifest line format.
const MANIFEST_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'%');

pub struct BuildCache {
  root: PathBuf,
}

impl BuildCache {
  pub fn new(root: impl Into<PathBuf>) -> BuildCache {
    BuildCache { root: root.into() }
  }

  /// The conventional cache root: `$WEFT_CACHE_DIR` if set, otherwise the
  /// platform cache directory.
  pub fn default_root() -> EngineResult<PathBuf> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV)
      && !dir.is_empty()
    {
      return Ok(PathBuf::from(dir));
    }
    dirs::cache_dir()
      .map(|dir| dir.join(CACHE_DIR_NAME))
      .ok_or_else(|| EngineError::internal("no cache directory available on this platform"))
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Return the file set previously recorded for `manifest`, or run
  /// `producer` to build it and record the result.
  ///
  /// On a miss the producer receives a fresh working directory under the
  /// cache root. Once its result resolves, in-memory files are
  /// materialized to `<key>/<contenthash>.dat` and the manifest is
  /// committed, so later processes hit without rebuilding. Within a
  /// process, at-most-one-build-per-key comes from callers sharing the
  /// returned cell, not from this method.
  pub fn get_or_create(
    &self,
    manifest: &str,
    producer: impl FnOnce(&Path) -> Cell<FileSet>,
  ) -> Cell<FileSet> {
    let key = hash::hash_str(manifest);
    match self.read_manifest(&key) {
      Ok(Some(set)) => {
        debug!(key = %key, "build cache hit");
        return Cell::of(set);
      }
      Ok(None) => {}
      Err(err) => return Cell::failed(err),
    }

    debug!(key = %key, "build cache miss");
    let target_dir = self.root.join(&key.0);
    if let Err(err) = prepare_dir(&target_dir) {
      return Cell::failed(err);
    }

    let root = self.root.clone();
    producer(&target_dir).then(move |set: &FileSet| Ok(Flow::Value(commit(&root, &key, set)?)))
  }

  fn read_manifest(&self, key: &ContentHash) -> EngineResult<Option<FileSet>> {
    let path = self.manifest_path(key);
    let text = match fs::read_to_string(&path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(EngineError::io(format!("read {}", path.display()), &e)),
    };

    let mut entries = Vec::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
      let (hash, name, file_path) = parse_manifest_line(&path, line)?;
      let file_path = if Path::new(&file_path).is_absolute() {
        PathBuf::from(file_path)
      } else {
        self.root.join(file_path)
      };
      entries.push((name, FileRef::new(DiskFile::with_hash(file_path, hash))));
    }
    Ok(Some(FileSet::from_entries(entries)))
  }

  fn manifest_path(&self, key: &ContentHash) -> PathBuf {
    self.root.join(format!("{key}.{MANIFEST_EXT}"))
  }
}

fn prepare_dir(dir: &Path) -> EngineResult<()> {
  if dir.exists() {
    // Leftovers from an earlier interrupted build for this key.
    fs::remove_dir_all(dir)
      .map_err(|e| EngineError::io(format!("clear {}", dir.display()), &e))?;
  }
  fs::create_dir_all(dir).map_err(|e| EngineError::io(format!("create {}", dir.display()), &e))
}

/// Materialize in-memory files into the key's directory, write the
/// manifest last, and return the set as recorded.
fn commit(root: &Path, key: &ContentHash, set: &FileSet) -> EngineResult<FileSet> {
  let dir = root.join(&key.0);
  let mut entries: Vec<(String, FileRef)> = Vec::with_capacity(set.len());
  for (name, file) in set.iter() {
    let on_disk = match file.abs_path() {
      Some(_) => file.clone(),
      None => {
        let data_path = dir.join(format!("{}.dat", file.hash()));
        if !data_path.exists() {
          fs::write(&data_path, file.bytes()?)
            .map_err(|e| EngineError::io(format!("write {}", data_path.display()), &e))?;
        }
        FileRef::new(DiskFile::with_hash(data_path, file.hash().clone()))
      }
    };
    entries.push((name.clone(), on_disk));
  }
  entries.sort_by(|(a, _), (b, _)| a.cmp(b));

  let mut manifest = String::new();
  for (name, file) in &entries {
    let path = file
      .abs_path()
      .ok_or_else(|| EngineError::internal("unmaterialized file at commit"))?;
    let recorded = match path.strip_prefix(root) {
      Ok(rel) => rel.to_string_lossy().into_owned(),
      Err(_) => path.to_string_lossy().into_owned(),
    };
    manifest.push_str(&format!(
      "{} {} {}\n",
      file.hash(),
      utf8_percent_encode(name, MANIFEST_ESCAPE),
      utf8_percent_encode(&recorded, MANIFEST_ESCAPE)
    ));
  }

  let manifest_path = root.join(format!("{key}.{MANIFEST_EXT}"));
  let tmp_path = root.join(format!("{key}.{MANIFEST_EXT}.tmp"));
  fs::write(&tmp_path, &manifest)
    .map_err(|e| EngineError::io(format!("write {}", tmp_path.display()), &e))?;
  fs::rename(&tmp_path, &manifest_path)
    .map_err(|e| EngineError::io(format!("commit {}", manifest_path.display()), &e))?;
  debug!(key = %key, files = entries.len(), "build cache entry committed");

  Ok(FileSet::from_entries(entries))
}

fn parse_manifest_line(path: &Path, line: &str) -> EngineResult<(ContentHash, String, String)> {
  let malformed = |message: &str| EngineError::MalformedManifest {
    path: path.display().to_string(),
    message: message.to_string(),
  };
  let mut fields = line.split(' ');
  let hash = fields.next().ok_or_else(|| malformed("missing hash field"))?;
  let name = fields.next().ok_or_else(|| malformed("missing name field"))?;
  let file_path = fields.next().ok_or_else(|| malformed("missing path field"))?;
  if fields.next().is_some() {
    return Err(malformed("too many fields"));
  }
  if hash.len() != CONTENT_HASH_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
    return Err(malformed("bad content hash"));
  }
  let decode = |field: &str, what: &str| {
    percent_decode_str(field)
      .decode_utf8()
      .map(|s| s.into_owned())
      .map_err(|_| malformed(&format!("undecodable {what}")))
  };
  Ok((ContentHash(hash.to_string()), decode(name, "name")?, decode(file_path, "path")?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fileset::MemoryFile;
  use tempfile::tempdir;

  fn produced_set(dir: &Path) -> FileSet {
    let disk_path = dir.join("out.js");
    fs::write(&disk_path, "compiled").unwrap();
    FileSet::from_entries([
      ("out.js".to_string(), FileRef::new(DiskFile::open(&disk_path).unwrap())),
      ("meta data".to_string(), FileRef::new(MemoryFile::from_str("meta", "m"))),
    ])
  }

  #[test]
  fn miss_builds_and_hit_replays_without_producer() {
    let temp = tempdir().unwrap();

    let cache = BuildCache::new(temp.path());
    let built = cache.get_or_create("key1", |dir| Cell::of(produced_set(dir)));
    let built = built.value().unwrap();
    assert_eq!(built.len(), 2);
    assert_eq!(built.read_file("meta data").unwrap(), "m");

    // A fresh instance over the same root must replay the recorded set
    // without running the producer.
    let cache = BuildCache::new(temp.path());
    let replayed =
      cache.get_or_create("key1", |_dir| -> Cell<FileSet> { panic!("producer ran on a hit") });
    let replayed = replayed.value().unwrap();
    assert_eq!(replayed.to_manifest(), built.to_manifest());
    assert_eq!(replayed.read_file("out.js").unwrap(), "compiled");
    assert_eq!(replayed.read_file("meta data").unwrap(), "m");
  }

  #[test]
  fn distinct_keys_build_independently() {
    let temp = tempdir().unwrap();
    let cache = BuildCache::new(temp.path());

    let a = cache.get_or_create("key a", |dir| Cell::of(produced_set(dir)));
    let b = cache.get_or_create("key b", |_dir| Cell::of(FileSet::empty()));
    assert_eq!(a.value().unwrap().len(), 2);
    assert!(b.value().unwrap().is_empty());
  }

  #[test]
  fn manifest_is_written_after_outputs() {
    let temp = tempdir().unwrap();
    let cache = BuildCache::new(temp.path());

    let pending: Cell<FileSet> = Cell::root();
    let result = cache.get_or_create("slow", {
      let pending = pending.clone();
      move |_dir| pending
    });
    // Nothing committed while the producer is still pending.
    let key = hash::hash_str("slow");
    assert!(!temp.path().join(format!("{key}.{MANIFEST_EXT}")).exists());

    pending.resolve(FileSet::from_entries([(
      "f".to_string(),
      FileRef::new(MemoryFile::from_str("f", "data")),
    )]));
    assert!(result.value().is_some());
    assert!(temp.path().join(format!("{key}.{MANIFEST_EXT}")).exists());
  }

  #[test]
  fn default_root_resolves_on_this_platform() {
    assert!(BuildCache::default_root().is_ok());
  }

  #[test]
  fn corrupt_manifest_is_reported() {
    let temp = tempdir().unwrap();
    fs::write(
      temp.path().join(format!("{}.{MANIFEST_EXT}", hash::hash_str("bad"))),
      "nonsense line\n",
    )
    .unwrap();

    let cache = BuildCache::new(temp.path());
    let result = cache.get_or_create("bad", |_dir| Cell::of(FileSet::empty()));
    assert!(matches!(&*result.error().unwrap(), EngineError::MalformedManifest { .. }));
  }
}
