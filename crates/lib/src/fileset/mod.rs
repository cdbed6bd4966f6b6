//! Logically-addressed, immutable collections of file handles.
//!
//! A [`FileSet`] maps logical relative paths to file handles. Sets are
//! never mutated in place; every transform returns a new set. The handles
//! themselves may live on disk, in memory, or anywhere else that can
//! produce bytes and a content hash.

mod dir;
mod file;

use std::rc::Rc;

use globset::GlobBuilder;
use indexmap::IndexMap;

use crate::cell::{Cell, Flow};
use crate::error::{EngineError, EngineResult};
use crate::name::Name;
use crate::util::hash::ContentHash;

pub use dir::DirSource;
pub use file::{DiskFile, MemoryFile};

/// A readable file abstraction: content bytes, a content digest, and an
/// absolute path if backed by real storage.
pub trait FileHandle {
  /// Full lowercase-hex SHA-256 of the raw file bytes.
  fn hash(&self) -> &ContentHash;

  fn bytes(&self) -> EngineResult<Vec<u8>>;

  fn read_to_string(&self) -> EngineResult<String> {
    let bytes = self.bytes()?;
    String::from_utf8(bytes).map_err(|e| EngineError::Io {
      context: format!("decode {}", self.display_name()),
      message: e.to_string(),
    })
  }

  /// The real, absolute path to the file, or `None` for purely in-memory
  /// content.
  fn abs_path(&self) -> Option<&std::path::Path>;

  /// A human readable string representing the file; not necessarily
  /// parseable in any sense.
  fn display_name(&self) -> String;

  /// Content identity, used for union conflict detection.
  fn is_same_file(&self, other: &dyn FileHandle) -> bool {
    self.hash() == other.hash()
  }
}

/// A shared file handle. Equality is handle identity; use
/// [`FileHandle::is_same_file`] for content identity.
#[derive(Clone)]
pub struct FileRef(pub Rc<dyn FileHandle>);

impl FileRef {
  pub fn new(file: impl FileHandle + 'static) -> FileRef {
    FileRef(Rc::new(file))
  }
}

impl std::ops::Deref for FileRef {
  type Target = dyn FileHandle;

  fn deref(&self) -> &Self::Target {
    &*self.0
  }
}

impl PartialEq for FileRef {
  fn eq(&self, other: &FileRef) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl std::fmt::Debug for FileRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "FileRef({})", self.display_name())
  }
}

/// Anything that can be queried for files by glob expression or exact
/// name: a file set, a source directory, a package repository.
pub trait FileSource {
  /// All files matching the given name. Yields the empty set when
  /// nothing matches; "not found" is never an error.
  fn find(&self, name: &Name) -> Cell<FileSet>;

  /// A single file by exact name, or `None` if it does not exist.
  fn get(&self, name: &str) -> Cell<Option<FileRef>>;

  /// Downcast hook for consumers that require concrete file sets.
  fn as_file_set(&self) -> Option<&FileSet> {
    None
  }
}

/// A shared file source as produced by target and property resolution.
#[derive(Clone)]
pub struct SourceRef(Rc<dyn FileSource>);

impl SourceRef {
  pub fn new(source: Rc<dyn FileSource>) -> SourceRef {
    SourceRef(source)
  }

  pub fn from_set(set: FileSet) -> SourceRef {
    SourceRef(Rc::new(set))
  }

  pub fn as_file_set(&self) -> Option<&FileSet> {
    self.0.as_file_set()
  }

  pub fn find(&self, name: &Name) -> Cell<FileSet> {
    self.0.find(name)
  }

  pub fn get(&self, name: &str) -> Cell<Option<FileRef>> {
    self.0.get(name)
  }
}

impl PartialEq for SourceRef {
  fn eq(&self, other: &SourceRef) -> bool {
    match (self.as_file_set(), other.as_file_set()) {
      (Some(a), Some(b)) => a == b,
      _ => Rc::ptr_eq(&self.0, &other.0),
    }
  }
}

impl std::fmt::Debug for SourceRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.as_file_set() {
      Some(set) => write!(f, "SourceRef({set:?})"),
      None => write!(f, "SourceRef(<repository>)"),
    }
  }
}

/// The value type produced by target resolution: an ordered list of file
/// sources whose union is the target's output.
pub type SourceList = Vec<SourceRef>;

/// An entry in a [`FileSet::layout`] specification.
pub enum LayoutEntry {
  /// A whole set placed under the prefix.
  Set(FileSet),
  /// Several optional sets placed under the same prefix.
  OptionalSets(Vec<Option<FileSet>>),
  /// A single file placed exactly at the prefix.
  File(FileRef),
}

type Content = IndexMap<String, FileRef>;

/// An immutable mapping from logical relative path to file handle.
/// Iteration follows insertion order; manifest serialization sorts.
///
/// Equality is content-map identity, which is what cell change
/// suppression keys on.
#[derive(Clone)]
pub struct FileSet {
  content: Rc<Content>,
}

impl PartialEq for FileSet {
  fn eq(&self, other: &FileSet) -> bool {
    Rc::ptr_eq(&self.content, &other.content)
  }
}

impl std::fmt::Debug for FileSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_set().entries(self.content.keys()).finish()
  }
}

impl Default for FileSet {
  fn default() -> FileSet {
    FileSet::empty()
  }
}

impl FileSet {
  pub fn empty() -> FileSet {
    FileSet { content: Rc::new(Content::new()) }
  }

  pub fn from_entries(entries: impl IntoIterator<Item = (String, FileRef)>) -> FileSet {
    FileSet { content: Rc::new(entries.into_iter().collect()) }
  }

  pub fn len(&self) -> usize {
    self.content.len()
  }

  pub fn is_empty(&self) -> bool {
    self.content.is_empty()
  }

  pub fn contains(&self, path: &str) -> bool {
    self.content.contains_key(path)
  }

  pub fn file(&self, path: &str) -> Option<&FileRef> {
    self.content.get(path)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &FileRef)> {
    self.content.iter()
  }

  /// Read the contents of a file in the set as a string. Errors if the
  /// path is not present.
  pub fn read_file(&self, path: &str) -> EngineResult<String> {
    match self.content.get(path) {
      Some(file) => file.read_to_string(),
      None => Err(EngineError::FileNotFound(path.to_string())),
    }
  }

  /// Filter by glob match on the logical path, producing a subset.
  pub fn glob(&self, name: &Name) -> EngineResult<FileSet> {
    let matcher = compile_glob(&name.to_string())?;
    let matched = self
      .content
      .iter()
      .filter(|(path, _)| matcher.is_match(path.as_str()))
      .map(|(path, file)| (path.clone(), file.clone()));
    Ok(FileSet::from_entries(matched))
  }

  /// Split into groups, every entry assigned to exactly one group by the
  /// classifier.
  pub fn partition(&self, classify: impl Fn(&str) -> String) -> IndexMap<String, FileSet> {
    let mut groups: IndexMap<String, Content> = IndexMap::new();
    for (path, file) in self.content.iter() {
      groups
        .entry(classify(path))
        .or_default()
        .insert(path.clone(), file.clone());
    }
    groups
      .into_iter()
      .map(|(label, content)| (label, FileSet { content: Rc::new(content) }))
      .collect()
  }

  /// Rename every path with `rename`, omitting entries for which it
  /// returns `None`.
  pub fn remap(&self, rename: impl Fn(&str, &FileRef) -> Option<String>) -> FileSet {
    let entries = self
      .content
      .iter()
      .filter_map(|(path, file)| rename(path, file).map(|new| (new, file.clone())));
    FileSet::from_entries(entries)
  }

  /// All entries of the receiver except those whose path appears in
  /// `other`, irrespective of content.
  pub fn minus(&self, other: &FileSet) -> FileSet {
    let entries = self
      .content
      .iter()
      .filter(|(path, _)| !other.contains(path))
      .map(|(path, file)| (path.clone(), file.clone()));
    FileSet::from_entries(entries)
  }

  /// Merge sets. Two sets contributing the same path is an error unless
  /// the entries are the same file by content identity.
  pub fn union_all(sets: &[FileSet]) -> EngineResult<FileSet> {
    match sets {
      [] => Ok(FileSet::empty()),
      [only] => Ok(only.clone()),
      _ => {
        let mut content = Content::new();
        for set in sets {
          for (path, file) in set.content.iter() {
            if let Some(existing) = content.get(path) {
              if !existing.is_same_file(&**file) {
                return Err(EngineError::ConflictingFiles(path.clone()));
              }
            }
            content.insert(path.clone(), file.clone());
          }
        }
        Ok(FileSet { content: Rc::new(content) })
      }
    }
  }

  /// Assemble a set from prefix-keyed pieces, concatenating logical
  /// paths. Used to lay out a synthetic working directory from
  /// heterogeneous sources before invoking a build step.
  pub fn layout(entries: impl IntoIterator<Item = (String, LayoutEntry)>) -> FileSet {
    let mut content = Content::new();
    for (prefix, entry) in entries {
      match entry {
        LayoutEntry::Set(set) => {
          for (path, file) in set.content.iter() {
            content.insert(join_logical(&prefix, path), file.clone());
          }
        }
        LayoutEntry::OptionalSets(sets) => {
          for set in sets.into_iter().flatten() {
            for (path, file) in set.content.iter() {
              content.insert(join_logical(&prefix, path), file.clone());
            }
          }
        }
        LayoutEntry::File(file) => {
          content.insert(prefix, file);
        }
      }
    }
    FileSet { content: Rc::new(content) }
  }

  /// Canonical serialization: sorted-by-path lines of
  /// `"<content-hash> <path>"`. Two sets with identical manifests are
  /// interchangeable build inputs, which is exactly what the build cache
  /// keys on.
  pub fn to_manifest(&self) -> String {
    let mut paths: Vec<&String> = self.content.keys().collect();
    paths.sort();
    let lines: Vec<String> = paths
      .iter()
      .map(|path| format!("{} {}", self.content[path.as_str()].hash(), path))
      .collect();
    lines.join("\n")
  }

  /// Search all sources for the given name and union the matches.
  pub fn find_all(sources: &[SourceRef], name: &Name) -> Cell<FileSet> {
    let finds: Vec<Cell<FileSet>> = sources.iter().map(|s| s.find(name)).collect();
    Cell::all(&finds, |sets: &[FileSet]| Ok(Flow::Value(FileSet::union_all(sets)?)))
  }
}

impl FileSource for FileSet {
  fn find(&self, name: &Name) -> Cell<FileSet> {
    match self.glob(name) {
      Ok(set) => Cell::of(set),
      Err(err) => Cell::failed(err),
    }
  }

  fn get(&self, name: &str) -> Cell<Option<FileRef>> {
    Cell::of(self.content.get(name).cloned())
  }

  fn as_file_set(&self) -> Option<&FileSet> {
    Some(self)
  }
}

/// Compile a rendered [`Name`] into a glob matcher with shell semantics:
/// `*` and `?` do not cross path separators, and backslash escapes
/// literal metacharacters.
pub(crate) fn compile_glob(pattern: &str) -> EngineResult<globset::GlobMatcher> {
  GlobBuilder::new(pattern)
    .literal_separator(true)
    .backslash_escape(true)
    .build()
    .map(|glob| glob.compile_matcher())
    .map_err(|e| EngineError::InvalidGlob { pattern: pattern.to_string(), message: e.to_string() })
}

fn join_logical(prefix: &str, path: &str) -> String {
  if prefix.is_empty() {
    path.to_string()
  } else {
    format!("{}/{}", prefix.trim_end_matches('/'), path)
  }
}
