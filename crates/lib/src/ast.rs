//! Declarations as they come out of the build-file parser.
//!
//! The resolver consumes these as a fixed, immutable tree. Everything
//! carries its originating file and byte offset so that diagnostics can be
//! reported as `file:line:column` without the parser tracking positions
//! eagerly.

use std::rc::Rc;

use crate::fileset::{FileSet, SourceRef};
use crate::name::Name;

/// A parsed build file: the text (kept for lazy position resolution) plus
/// the file source whose directory relative name lookups resolve against.
pub struct BuildFile {
  filename: String,
  text: String,
  source: SourceRef,
}

impl BuildFile {
  pub fn new(filename: impl Into<String>, text: impl Into<String>, source: SourceRef) -> Rc<BuildFile> {
    Rc::new(BuildFile { filename: filename.into(), text: text.into(), source })
  }

  /// A build file with no text and an empty backing source, for
  /// declarations constructed programmatically.
  pub fn synthetic(filename: impl Into<String>) -> Rc<BuildFile> {
    BuildFile::new(filename, "", SourceRef::from_set(FileSet::empty()))
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn source(&self) -> &SourceRef {
    &self.source
  }

  /// Resolve a byte offset to a 1-based (line, column) pair. Offsets past
  /// the end of the text land on the final position.
  pub fn resolve_position(&self, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (idx, ch) in self.text.char_indices() {
      if idx >= offset {
        break;
      }
      if ch == '\n' {
        line += 1;
        column = 1;
      } else {
        column += 1;
      }
    }
    (line, column)
  }

  /// Render an offset as `file:line:column`.
  pub fn loc(&self, offset: usize) -> String {
    let (line, column) = self.resolve_position(offset);
    format!("{}:{line}:{column}", self.filename)
  }
}

impl std::fmt::Debug for BuildFile {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "BuildFile({})", self.filename)
  }
}

/// A single value expression within a property declaration.
#[derive(Debug)]
pub struct ValueDecl {
  pub file: Rc<BuildFile>,
  pub offset: usize,
  pub value: Name,
}

impl ValueDecl {
  pub fn new(file: &Rc<BuildFile>, offset: usize, value: Name) -> Rc<ValueDecl> {
    Rc::new(ValueDecl { file: file.clone(), offset, value })
  }

  pub fn loc(&self) -> String {
    self.file.loc(self.offset)
  }
}

/// A named property declaration: `name = value value ...;`
#[derive(Debug)]
pub struct PropertyDecl {
  pub file: Rc<BuildFile>,
  pub offset: usize,
  /// Full slash-separated path of the declaration within the model.
  pub name: String,
  pub values: Vec<Rc<ValueDecl>>,
}

impl PropertyDecl {
  pub fn new(
    file: &Rc<BuildFile>,
    offset: usize,
    name: impl Into<String>,
    values: Vec<Rc<ValueDecl>>,
  ) -> Rc<PropertyDecl> {
    Rc::new(PropertyDecl { file: file.clone(), offset, name: name.into(), values })
  }

  pub fn loc(&self) -> String {
    self.file.loc(self.offset)
  }
}

/// A named, typed target declaration with its body properties.
#[derive(Debug)]
pub struct TargetDecl {
  pub file: Rc<BuildFile>,
  pub offset: usize,
  pub type_name: String,
  pub type_offset: usize,
  /// Full slash-separated path of the declaration within the model.
  pub name: String,
  pub properties: Vec<Rc<PropertyDecl>>,
}

impl TargetDecl {
  pub fn new(
    file: &Rc<BuildFile>,
    offset: usize,
    type_name: impl Into<String>,
    name: impl Into<String>,
    properties: Vec<Rc<PropertyDecl>>,
  ) -> Rc<TargetDecl> {
    Rc::new(TargetDecl {
      file: file.clone(),
      offset,
      type_name: type_name.into(),
      type_offset: offset,
      name: name.into(),
      properties,
    })
  }

  pub fn loc(&self) -> String {
    self.file.loc(self.offset)
  }
}

/// Any named declaration the model can hand back for a lookup.
#[derive(Debug, Clone)]
pub enum Decl {
  Property(Rc<PropertyDecl>),
  Target(Rc<TargetDecl>),
}

impl Decl {
  pub fn name(&self) -> &str {
    match self {
      Decl::Property(p) => &p.name,
      Decl::Target(t) => &t.name,
    }
  }

  pub fn loc(&self) -> String {
    match self {
      Decl::Property(p) => p.loc(),
      Decl::Target(t) => t.loc(),
    }
  }

  pub fn kind_name(&self) -> &'static str {
    match self {
      Decl::Property(_) => "property",
      Decl::Target(_) => "target",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn positions_are_one_based_lines_and_columns() {
    let file = BuildFile::new("TEST", "a = b;\ncc = d;\n", SourceRef::from_set(FileSet::empty()));
    assert_eq!(file.resolve_position(0), (1, 1));
    assert_eq!(file.resolve_position(4), (1, 5));
    assert_eq!(file.resolve_position(7), (2, 1));
    assert_eq!(file.resolve_position(12), (2, 6));
  }

  #[test]
  fn loc_renders_file_line_column() {
    let file = BuildFile::new("dir/BUILD", "x = y;", SourceRef::from_set(FileSet::empty()));
    assert_eq!(file.loc(4), "dir/BUILD:1:5");
  }

  #[test]
  fn offset_past_end_lands_on_final_position() {
    let file = BuildFile::new("TEST", "ab", SourceRef::from_set(FileSet::empty()));
    assert_eq!(file.resolve_position(100), (1, 3));
  }
}
