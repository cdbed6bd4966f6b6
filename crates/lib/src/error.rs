//! Engine-level error taxonomy.
//!
//! All resolution and evaluation failures collapse into [`EngineError`].
//! The enum is `Clone` and serde-serializable (io errors are carried as
//! stringified messages), because a single failure is shared by every cell
//! that transitively depends on the failed one.

use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error as stored in rejected cells.
///
/// Fanning one failure out to many dependants only clones the pointer.
pub type SharedError = Rc<EngineError>;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EngineError {
  /// A property or target resolution chain reached itself again.
  ///
  /// `trace` is the rendered dependency stack, one `at name (file:line:col)`
  /// line per frame, from the failing request down to and including the
  /// frame that started the cycle.
  #[error("circular dependency resolving '{name}'\n{trace}")]
  CircularDependency { name: String, trace: String },

  #[error("unresolved name '{0}'")]
  UnresolvedName(String),

  /// Two declarations claimed the same name, or a declaration collided
  /// with a namespace containing other declarations.
  #[error("conflicting declaration of '{name}' at {loc}")]
  DuplicateDeclaration { name: String, loc: String },

  #[error("unknown target type '{0}'")]
  UnknownTargetType(String),

  #[error("no rule found to build '{type_name}'\n{trace}")]
  NoRuleFound { type_name: String, trace: String },

  #[error("conflicting files for '{0}'")]
  ConflictingFiles(String),

  #[error("missing required property '{0}'")]
  MissingRequiredProperty(String),

  #[error("file not found: '{0}'")]
  FileNotFound(String),

  #[error("files required for property '{0}' but got a repository")]
  NotAFileSet(String),

  #[error("invalid glob pattern '{pattern}': {message}")]
  InvalidGlob { pattern: String, message: String },

  #[error("malformed cache manifest {path}: {message}")]
  MalformedManifest { path: String, message: String },

  #[error("{context}: {message}")]
  Io { context: String, message: String },

  /// A broken engine invariant, not a user error.
  #[error("internal error: {0}")]
  Internal(String),
}

impl EngineError {
  pub fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
    EngineError::Io {
      context: context.into(),
      message: err.to_string(),
    }
  }

  pub(crate) fn internal(message: impl Into<String>) -> Self {
    EngineError::Internal(message.into())
  }
}
