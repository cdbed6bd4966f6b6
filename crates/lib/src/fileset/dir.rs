//! A source-tree directory as a file source.

use std::path::PathBuf;
use std::rc::Rc;

use walkdir::WalkDir;

use crate::cell::Cell;
use crate::error::{EngineError, EngineResult};
use crate::fileset::{DiskFile, FileRef, FileSet, FileSource, compile_glob};
use crate::name::Name;

/// A directory on disk exposed as a file source. Logical paths are
/// slash-separated paths relative to the root; lookups walk the tree and
/// hash matching files at query time.
pub struct DirSource {
  root: PathBuf,
}

impl DirSource {
  pub fn new(root: impl Into<PathBuf>) -> Rc<DirSource> {
    Rc::new(DirSource { root: root.into() })
  }

  fn find_matching(&self, name: &Name) -> EngineResult<FileSet> {
    let matcher = compile_glob(&name.to_string())?;
    let mut entries = Vec::new();
    for entry in WalkDir::new(&self.root) {
      let entry =
        entry.map_err(|e| EngineError::io(format!("walk {}", self.root.display()), &e.into()))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let rel = entry
        .path()
        .strip_prefix(&self.root)
        .map_err(|e| EngineError::internal(format!("walk escaped root: {e}")))?;
      let logical = logical_path(rel);
      if matcher.is_match(&logical) {
        let file = DiskFile::open(entry.path())?;
        entries.push((logical, FileRef::new(file)));
      }
    }
    Ok(FileSet::from_entries(entries))
  }

  fn get_exact(&self, name: &str) -> EngineResult<Option<FileRef>> {
    let path = self.root.join(name);
    let meta = match std::fs::metadata(&path) {
      Ok(meta) => meta,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(EngineError::io(format!("stat {}", path.display()), &e)),
    };
    if !meta.is_file() {
      return Ok(None);
    }
    Ok(Some(FileRef::new(DiskFile::open(path)?)))
  }
}

fn logical_path(rel: &std::path::Path) -> String {
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

impl FileSource for DirSource {
  fn find(&self, name: &Name) -> Cell<FileSet> {
    match self.find_matching(name) {
      Ok(set) => Cell::of(set),
      Err(err) => Cell::failed(err),
    }
  }

  fn get(&self, name: &str) -> Cell<Option<FileRef>> {
    match self.get_exact(name) {
      Ok(found) => Cell::of(found),
      Err(err) => Cell::failed(err),
    }
  }
}
