//! The build model: the namespace tree of declarations as written in the
//! build files, plus the per-constraint-set context cache.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::{Decl, PropertyDecl, TargetDecl};
use crate::cache::BuildCache;
use crate::consts::NAME_SEPARATOR;
use crate::context::BuildContext;
use crate::error::{EngineError, EngineResult};
use crate::property::Property;

/// A fixed set of configuration-property values selecting a build variant.
/// Ordered so that canonical serialization is deterministic.
pub type Constraints = BTreeMap<String, Property>;

#[derive(Debug)]
enum NamespaceEntry {
  Namespace(Namespace),
  Target(Rc<TargetDecl>),
  Property(Rc<PropertyDecl>),
}

/// A target-like entity containing other targets, properties, or nested
/// namespaces, addressed by slash-separated paths.
#[derive(Debug, Default)]
pub struct Namespace {
  content: IndexMap<String, NamespaceEntry>,
}

impl Namespace {
  /// The declaration at the given slash-separated path, if any.
  pub fn get_decl(&self, name: &str) -> Option<Decl> {
    let mut parts: Vec<&str> = name.split(NAME_SEPARATOR).collect();
    let simple = parts.pop()?;
    let ns = self.descend(&parts)?;
    match ns.content.get(simple)? {
      NamespaceEntry::Target(t) => Some(Decl::Target(t.clone())),
      NamespaceEntry::Property(p) => Some(Decl::Property(p.clone())),
      NamespaceEntry::Namespace(_) => None,
    }
  }

  pub fn get_property(&self, name: &str) -> Option<Rc<PropertyDecl>> {
    match self.get_decl(name)? {
      Decl::Property(p) => Some(p),
      _ => None,
    }
  }

  pub fn get_target(&self, name: &str) -> Option<Rc<TargetDecl>> {
    match self.get_decl(name)? {
      Decl::Target(t) => Some(t),
      _ => None,
    }
  }

  /// The target whose full name is a separator-bounded prefix of the
  /// given path, along with the matched prefix. Segments are matched
  /// exactly, never as globs, so `mylibrary` does not match a declared
  /// `mylib`.
  pub fn get_prefix_target(&self, name: &str) -> Option<(Rc<TargetDecl>, String)> {
    let parts: Vec<&str> = name.split(NAME_SEPARATOR).collect();
    let mut node = self;
    for (idx, part) in parts.iter().enumerate() {
      match node.content.get(*part)? {
        NamespaceEntry::Namespace(next) => node = next,
        NamespaceEntry::Target(t) => {
          return Some((t.clone(), parts[..=idx].join(&NAME_SEPARATOR.to_string())));
        }
        NamespaceEntry::Property(_) => return None,
      }
    }
    None
  }

  fn descend(&self, parts: &[&str]) -> Option<&Namespace> {
    let mut node = self;
    for part in parts {
      match node.content.get(*part)? {
        NamespaceEntry::Namespace(next) => node = next,
        _ => return None,
      }
    }
    Some(node)
  }
}

/// Assembles the namespace tree from declarations, creating implicit
/// intermediate namespaces for path-named declarations and rejecting
/// conflicting names.
#[derive(Debug, Default)]
pub struct NamespaceBuilder {
  root: Namespace,
  target_types: HashSet<String>,
}

impl NamespaceBuilder {
  pub fn new() -> NamespaceBuilder {
    NamespaceBuilder::default()
  }

  /// Declare a target type name as known to the model. Rule lookup is
  /// separate; an unregistered rule for a declared type is reported at
  /// resolution time, not here.
  pub fn declare_target_type(&mut self, name: impl Into<String>) -> &mut Self {
    self.target_types.insert(name.into());
    self
  }

  pub fn add_property(&mut self, decl: Rc<PropertyDecl>) -> EngineResult<&mut Self> {
    let name = decl.name.clone();
    let loc = decl.loc();
    self.insert(&name, &loc, NamespaceEntry::Property(decl))?;
    Ok(self)
  }

  pub fn add_target(&mut self, decl: Rc<TargetDecl>) -> EngineResult<&mut Self> {
    let name = decl.name.clone();
    let loc = decl.loc();
    self.insert(&name, &loc, NamespaceEntry::Target(decl))?;
    Ok(self)
  }

  pub fn build(self, cache: BuildCache) -> BuildModel {
    BuildModel {
      inner: Rc::new(ModelInner {
        root: self.root,
        target_types: self.target_types,
        cache,
        contexts: RefCell::new(HashMap::new()),
      }),
    }
  }

  fn insert(&mut self, name: &str, loc: &str, entry: NamespaceEntry) -> EngineResult<()> {
    let mut parts: Vec<&str> = name.split(NAME_SEPARATOR).collect();
    let simple = parts
      .pop()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| EngineError::internal(format!("empty declaration name at {loc}")))?;

    let mut node = &mut self.root;
    for part in &parts {
      let next = node
        .content
        .entry(part.to_string())
        .or_insert_with(|| NamespaceEntry::Namespace(Namespace::default()));
      match next {
        NamespaceEntry::Namespace(ns) => node = ns,
        _ => {
          return Err(EngineError::DuplicateDeclaration {
            name: name.to_string(),
            loc: loc.to_string(),
          });
        }
      }
    }
    if node.content.contains_key(simple) {
      return Err(EngineError::DuplicateDeclaration {
        name: name.to_string(),
        loc: loc.to_string(),
      });
    }
    node.content.insert(simple.to_string(), entry);
    Ok(())
  }
}

pub(crate) struct ModelInner {
  pub(crate) root: Namespace,
  target_types: HashSet<String>,
  cache: BuildCache,
  contexts: RefCell<HashMap<String, BuildContext>>,
}

impl ModelInner {
  pub(crate) fn has_target_type(&self, name: &str) -> bool {
    self.target_types.contains(name)
  }

  pub(crate) fn build_cache(&self) -> &BuildCache {
    &self.cache
  }

  /// The canonical context for the given constraint set, creating it on
  /// first request. Two requests with equal constraint maps always get
  /// the same context instance, which is what makes per-context
  /// memoization effective across call sites.
  pub(crate) fn get_config(
    self: &Rc<ModelInner>,
    constraints: Constraints,
  ) -> EngineResult<BuildContext> {
    let key = serde_json::to_string(&constraints)
      .map_err(|e| EngineError::internal(format!("constraint serialization: {e}")))?;
    if let Some(existing) = self.contexts.borrow().get(&key) {
      return Ok(existing.clone());
    }
    debug!(constraints = %key, "creating build context");
    let context = BuildContext::new(Rc::downgrade(self), constraints);
    self.contexts.borrow_mut().insert(key, context.clone());
    Ok(context)
  }
}

/// The generalized model as it is written in the build files. Cheap to
/// clone; clones share the namespace tree and the context cache.
///
/// The model must outlive every context resolved from it; contexts hold
/// weak model references and fail resolution once it is gone.
#[derive(Clone)]
pub struct BuildModel {
  inner: Rc<ModelInner>,
}

impl BuildModel {
  /// The build configuration under the given (possibly empty) set of
  /// constraints.
  pub fn get_config(&self, constraints: Constraints) -> EngineResult<BuildContext> {
    self.inner.get_config(constraints)
  }

  pub fn get_decl(&self, name: &str) -> Option<Decl> {
    self.inner.root.get_decl(name)
  }

  pub fn get_target(&self, name: &str) -> Option<Rc<TargetDecl>> {
    self.inner.root.get_target(name)
  }

  pub fn has_target_type(&self, name: &str) -> bool {
    self.inner.has_target_type(name)
  }
}
