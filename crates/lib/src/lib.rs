//! weft-lib: the reactive incremental build engine behind weft.
//!
//! Build files declare named properties and typed targets; this crate
//! resolves those declarations on demand into a graph of reactive cells
//! that recomputes only what changed. Target outputs are memoized on disk
//! in a content-addressed build cache keyed by input manifests.

pub mod ast;
pub mod cache;
pub mod cell;
pub mod consts;
pub mod context;
pub mod error;
pub mod fileset;
pub mod model;
pub mod name;
pub mod property;
pub mod rules;
pub mod util;

pub use cache::BuildCache;
pub use cell::{Cell, CellState, Flow};
pub use context::{BuildContext, DependencyStack, TargetContext};
pub use error::{EngineError, EngineResult, SharedError};
pub use fileset::{DirSource, FileSet, SourceList, SourceRef};
pub use model::{BuildModel, Constraints, NamespaceBuilder};
pub use name::{Name, NameBuilder};
pub use property::Property;
pub use rules::{TargetRule, register_target_rule};
