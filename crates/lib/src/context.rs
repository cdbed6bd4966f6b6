//! The build context: where names actually get resolved.
//!
//! A [`BuildContext`] is the build model instantiated with an explicit
//! (possibly empty) set of constraints. It memoizes one cell per resolved
//! property or target name, so every caller observes the same cell and
//! expensive work happens at most once per (context, name) pair. Cycle
//! detection threads an immutable [`DependencyStack`] through every
//! recursive resolution call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::ast::{BuildFile, Decl, PropertyDecl, TargetDecl, ValueDecl};
use crate::cell::{Cell, Flow};
use crate::error::{EngineError, EngineResult};
use crate::fileset::{FileSet, SourceList, SourceRef};
use crate::model::{Constraints, ModelInner};
use crate::name::Name;
use crate::property::Property;
use crate::rules;

/// One frame of the resolution call chain: which value of which property
/// (of which target, if any) asked for the current resolution.
struct Frame {
  target: Option<Rc<TargetDecl>>,
  property: Rc<PropertyDecl>,
  context: BuildContext,
  value: Rc<ValueDecl>,
  next: Option<Rc<Frame>>,
}

impl Frame {
  fn describe(&self) -> String {
    let name = match &self.target {
      Some(target) => format!("{}.{}", target.name, self.property.name),
      None => self.property.name.clone(),
    };
    format!("at {} ({})", name, self.value.loc())
  }
}

/// An immutable cons-list of resolution frames. Pushing shares the tail;
/// the stack is never stored beyond the duration of one resolution call
/// chain. Used purely for cycle detection and error traces.
#[derive(Clone, Default)]
pub struct DependencyStack {
  head: Option<Rc<Frame>>,
}

impl DependencyStack {
  pub fn empty() -> DependencyStack {
    DependencyStack { head: None }
  }

  fn push(
    &self,
    target: Option<Rc<TargetDecl>>,
    property: Rc<PropertyDecl>,
    context: BuildContext,
    value: Rc<ValueDecl>,
  ) -> DependencyStack {
    DependencyStack {
      head: Some(Rc::new(Frame { target, property, context, value, next: self.head.clone() })),
    }
  }

  fn find_property(&self, name: &str, context: &BuildContext) -> Option<Rc<Frame>> {
    let mut node = self.head.clone();
    while let Some(frame) = node {
      if frame.property.name == name && frame.context == *context {
        return Some(frame);
      }
      node = frame.next.clone();
    }
    None
  }

  fn find_target(&self, name: &str, context: &BuildContext) -> Option<Rc<Frame>> {
    let mut node = self.head.clone();
    while let Some(frame) = node {
      if let Some(target) = &frame.target
        && target.name == name
        && frame.context == *context
      {
        return Some(frame);
      }
      node = frame.next.clone();
    }
    None
  }

  /// Render the chain one `at name (file:line:col)` line per frame, from
  /// the most recent call down to and including `end` (or the whole chain
  /// if `end` is `None`).
  fn render_through(&self, end: Option<&Rc<Frame>>) -> String {
    let mut out = String::new();
    let mut node = self.head.clone();
    while let Some(frame) = node {
      out.push_str("    ");
      out.push_str(&frame.describe());
      out.push('\n');
      if let Some(end) = end
        && Rc::ptr_eq(&frame, end)
      {
        break;
      }
      node = frame.next.clone();
    }
    out
  }
}

struct ContextInner {
  model: Weak<ModelInner>,
  constraints: Constraints,
  prop_cache: RefCell<HashMap<String, Cell<Property>>>,
  target_cache: RefCell<HashMap<String, Cell<SourceList>>>,
}

/// The evaluation environment for one fixed constraint set. Cheap to
/// clone; clones share the caches. Two contexts compare equal iff they
/// are the same canonical instance, which the model guarantees for equal
/// constraint maps.
#[derive(Clone)]
pub struct BuildContext {
  inner: Rc<ContextInner>,
}

impl PartialEq for BuildContext {
  fn eq(&self, other: &BuildContext) -> bool {
    Rc::ptr_eq(&self.inner, &other.inner)
  }
}

impl std::fmt::Debug for BuildContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildContext").field("constraints", &self.inner.constraints.keys()).finish()
  }
}

impl BuildContext {
  pub(crate) fn new(model: Weak<ModelInner>, constraints: Constraints) -> BuildContext {
    // Pre-force the constraints so lookups never have to special-case them.
    let prop_cache = constraints
      .iter()
      .map(|(name, value)| (name.clone(), Cell::of(value.clone())))
      .collect();
    BuildContext {
      inner: Rc::new(ContextInner {
        model,
        constraints,
        prop_cache: RefCell::new(prop_cache),
        target_cache: RefCell::new(HashMap::new()),
      }),
    }
  }

  pub fn constraints(&self) -> &Constraints {
    &self.inner.constraints
  }

  pub fn has_constraints(&self, constraints: &Constraints) -> bool {
    self.inner.constraints == *constraints
  }

  /// The cell for a property's resolved value. The first request for a
  /// name creates and caches the cell; every later request observes the
  /// same instance.
  pub fn get_property(&self, name: &str, stack: &DependencyStack) -> EngineResult<Cell<Property>> {
    if let Some(frame) = stack.find_property(name, self) {
      return Err(EngineError::CircularDependency {
        name: name.to_string(),
        trace: stack.render_through(Some(&frame)),
      });
    }
    if let Some(cached) = self.inner.prop_cache.borrow().get(name) {
      return Ok(cached.clone());
    }
    let decl = self
      .model()?
      .root
      .get_property(name)
      .ok_or_else(|| EngineError::UnresolvedName(name.to_string()))?;
    let result = self.resolve_string_property(&decl, None, stack)?;
    self.inner.prop_cache.borrow_mut().insert(name.to_string(), result.clone());
    Ok(result)
  }

  /// The cell for a target's resolved file sources, with the same caching
  /// discipline as [`BuildContext::get_property`]. A property whose
  /// values are target-like names resolves each value as a file source
  /// and flattens the results.
  pub fn get_target(&self, name: &str, stack: &DependencyStack) -> EngineResult<Cell<SourceList>> {
    if let Some(frame) = stack.find_target(name, self) {
      return Err(EngineError::CircularDependency {
        name: name.to_string(),
        trace: stack.render_through(Some(&frame)),
      });
    }
    if let Some(cached) = self.inner.target_cache.borrow().get(name) {
      return Ok(cached.clone());
    }
    match self.model()?.root.get_decl(name) {
      Some(Decl::Target(target)) => {
        let output = self.resolve_target(&target, stack)?;
        let result =
          output.then(|set: &FileSet| Ok(Flow::Value(vec![SourceRef::from_set(set.clone())])));
        self.inner.target_cache.borrow_mut().insert(name.to_string(), result.clone());
        Ok(result)
      }
      Some(Decl::Property(prop)) => {
        let result = self.resolve_file_property(&prop, None, stack)?;
        self.inner.target_cache.borrow_mut().insert(name.to_string(), result.clone());
        Ok(result)
      }
      None => Err(EngineError::UnresolvedName(name.to_string())),
    }
  }

  /// Find a target from the literal leading path of `name` and return its
  /// resolution cell plus the unconsumed remainder.
  ///
  /// e.g. with a declared target `mylib`, the name `mylib/lib/*` yields
  /// the cell for `mylib` and the remainder `lib/*`. Target names are
  /// matched literally, never as globs.
  pub fn get_prefix_target_if_exists(
    &self,
    name: &Name,
    stack: &DependencyStack,
  ) -> EngineResult<Option<(Cell<SourceList>, Name)>> {
    let prefix = name.literal_path_prefix();
    if prefix.is_empty() {
      return Ok(None);
    }
    match self.model()?.root.get_prefix_target(prefix) {
      Some((_, matched)) => {
        let cell = self.get_target(&matched, stack)?;
        Ok(Some((cell, name.without_prefix(&matched))))
      }
      None => Ok(None),
    }
  }

  /// Pass-through to the shared build cache.
  pub fn get_cached_or_build(
    &self,
    manifest: &str,
    producer: impl FnOnce(&Path) -> Cell<FileSet>,
  ) -> EngineResult<Cell<FileSet>> {
    Ok(self.model()?.build_cache().get_or_create(manifest, producer))
  }

  /// The canonical context for this context's constraints merged with
  /// `overrides`. Any two call sites requesting the same effective
  /// constraint set share the resulting context and its caches.
  pub fn get_context_with_overrides(&self, overrides: &Constraints) -> EngineResult<BuildContext> {
    let mut combined = self.inner.constraints.clone();
    combined.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    self.model()?.get_config(combined)
  }

  pub fn get_property_with_overrides(
    &self,
    name: &str,
    overrides: &Constraints,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<Property>> {
    self.get_context_with_overrides(overrides)?.get_property(name, stack)
  }

  pub fn get_target_with_overrides(
    &self,
    name: &str,
    overrides: &Constraints,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<SourceList>> {
    self.get_context_with_overrides(overrides)?.get_target(name, stack)
  }

  /// Resolve a property declaration's values to strings, substituting
  /// referenced variables recursively.
  pub fn resolve_string_property(
    &self,
    prop: &Rc<PropertyDecl>,
    target: Option<&Rc<TargetDecl>>,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<Property>> {
    let mut parts = Vec::with_capacity(prop.values.len());
    for value in &prop.values {
      let frames = stack.push(target.cloned(), prop.clone(), self.clone(), value.clone());
      parts.push(self.substitute_name_vars(&value.value, &frames)?);
    }
    Ok(Cell::all(&parts, |names: &[Name]| {
      Ok(Flow::Value(names.iter().map(|n| n.to_string()).collect::<Property>()))
    }))
  }

  /// Resolve a property declaration's values as file sources: each value
  /// is substituted, matched against declared targets, and otherwise
  /// treated as a filesystem glob relative to its declaring file.
  pub fn resolve_file_property(
    &self,
    prop: &Rc<PropertyDecl>,
    target: Option<&Rc<TargetDecl>>,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<SourceList>> {
    let mut parts = Vec::with_capacity(prop.values.len());
    for value in &prop.values {
      let frames = stack.push(target.cloned(), prop.clone(), self.clone(), value.clone());
      parts.push(self.resolve_file_source(&value.value, &prop.file, &frames)?);
    }
    Ok(Cell::all(&parts, |lists: &[SourceList]| {
      Ok(Flow::Value(lists.iter().flatten().cloned().collect()))
    }))
  }

  fn resolve_file_source(
    &self,
    name: &Name,
    file: &Rc<BuildFile>,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<SourceList>> {
    let substituted = self.substitute_name_vars(name, stack)?;
    let ctx = self.clone();
    let stack = stack.clone();
    let file = file.clone();
    Ok(substituted.then(move |resolved: &Name| {
      if resolved.is_empty() {
        // Empty after substitution means "nothing here", deliberately.
        return Ok(Flow::Value(Vec::new()));
      }
      match ctx.get_prefix_target_if_exists(resolved, &stack)? {
        Some((target, rest)) => {
          if rest.is_empty() {
            Ok(Flow::Pending(target))
          } else {
            Ok(Flow::Pending(target.then(move |sources: &SourceList| {
              Ok(Flow::Pending(as_single_source(FileSet::find_all(sources, &rest))))
            })))
          }
        }
        None => {
          let relative = resolved.relative_to(file.filename());
          Ok(Flow::Pending(as_single_source(file.source().find(&relative))))
        }
      }
    }))
  }

  fn substitute_name_vars(
    &self,
    name: &Name,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<Name>> {
    let vars = name.variables();
    let mut resolved = Vec::with_capacity(vars.len());
    for var in &vars {
      resolved.push(self.get_property(var, stack)?);
    }
    let name = name.clone();
    Ok(Cell::all(&resolved, move |props: &[Property]| {
      let values: HashMap<String, String> =
        vars.iter().cloned().zip(props.iter().map(|p| p.to_string())).collect();
      Ok(Flow::Value(name.substitute(&values)?))
    }))
  }

  fn resolve_target(
    &self,
    target: &Rc<TargetDecl>,
    stack: &DependencyStack,
  ) -> EngineResult<Cell<FileSet>> {
    let model = self.model()?;
    if !model.has_target_type(&target.type_name) {
      return Err(EngineError::UnknownTargetType(target.type_name.clone()));
    }
    let rule = rules::lookup_target_rule(&target.type_name).ok_or_else(|| {
      EngineError::NoRuleFound {
        type_name: target.type_name.clone(),
        trace: format!(
          "    at {} ({})\n{}",
          target.name,
          target.loc(),
          stack.render_through(None)
        ),
      }
    })?;
    debug!(target = %target.name, target_type = %target.type_name, "evaluating target");
    rule.evaluate(TargetContext::new(target.clone(), self.clone(), stack.clone()))
  }

  fn model(&self) -> EngineResult<Rc<ModelInner>> {
    self
      .inner
      .model
      .upgrade()
      .ok_or_else(|| EngineError::internal("build model dropped while contexts were live"))
  }
}

fn as_single_source(found: Cell<FileSet>) -> Cell<SourceList> {
  found.then(|set: &FileSet| Ok(Flow::Value(vec![SourceRef::from_set(set.clone())])))
}

/// A rule's view of one target declaration: the target's own body
/// properties plus access back to the general context for global lookups.
pub struct TargetContext {
  target: Rc<TargetDecl>,
  props: HashMap<String, Rc<PropertyDecl>>,
  context: BuildContext,
  stack: DependencyStack,
}

impl TargetContext {
  pub(crate) fn new(
    target: Rc<TargetDecl>,
    context: BuildContext,
    stack: DependencyStack,
  ) -> TargetContext {
    let props = target
      .properties
      .iter()
      .map(|prop| (prop.name.clone(), prop.clone()))
      .collect();
    TargetContext { target, props, context, stack }
  }

  pub fn target_name(&self) -> &str {
    &self.target.name
  }

  pub fn target_type(&self) -> &str {
    &self.target.type_name
  }

  pub fn context(&self) -> &BuildContext {
    &self.context
  }

  /// A body property the rule cannot do without.
  pub fn get_required_property(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<Property>> {
    let prop = self
      .props
      .get(name)
      .ok_or_else(|| EngineError::MissingRequiredProperty(name.to_string()))?
      .clone();
    self.get_context(overrides)?.resolve_string_property(&prop, Some(&self.target), &self.stack)
  }

  pub fn get_property(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<Option<Property>>> {
    match self.props.get(name) {
      None => Ok(Cell::of(None)),
      Some(prop) => {
        let cell =
          self.get_context(overrides)?.resolve_string_property(prop, Some(&self.target), &self.stack)?;
        Ok(cell.then(|p: &Property| Ok(Flow::Value(Some(p.clone())))))
      }
    }
  }

  pub fn get_required_string(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<String>> {
    Ok(self.get_required_property(name, overrides)?.then(|p: &Property| Ok(Flow::Value(p.to_string()))))
  }

  /// A body property resolved as file sources. An absent property is the
  /// empty list.
  pub fn get_file_sources(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<SourceList>> {
    match self.props.get(name) {
      None => Ok(Cell::of(Vec::new())),
      Some(prop) => {
        self.get_context(overrides)?.resolve_file_property(prop, Some(&self.target), &self.stack)
      }
    }
  }

  /// A body property resolved as file sources and unioned into one
  /// concrete file set. Fails if any source is a repository rather than
  /// an enumerable set.
  pub fn get_file_set(&self, name: &str) -> EngineResult<Cell<FileSet>> {
    let sources = self.get_file_sources(name, None)?;
    let name = name.to_string();
    Ok(sources.then(move |sources: &SourceList| {
      let mut sets = Vec::with_capacity(sources.len());
      for source in sources {
        match source.as_file_set() {
          Some(set) => sets.push(set.clone()),
          None => return Err(EngineError::NotAFileSet(name.clone())),
        }
      }
      Ok(Flow::Value(FileSet::union_all(&sets)?))
    }))
  }

  pub fn get_cached_or_build(
    &self,
    manifest: &str,
    producer: impl FnOnce(&Path) -> Cell<FileSet>,
  ) -> EngineResult<Cell<FileSet>> {
    self.context.get_cached_or_build(manifest, producer)
  }

  pub fn get_global_property(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<Property>> {
    self.get_context(overrides)?.get_property(name, &self.stack)
  }

  pub fn get_global_string(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<String>> {
    Ok(self.get_global_property(name, overrides)?.then(|p: &Property| Ok(Flow::Value(p.to_string()))))
  }

  pub fn get_global_target(
    &self,
    name: &str,
    overrides: Option<&Constraints>,
  ) -> EngineResult<Cell<SourceList>> {
    self.get_context(overrides)?.get_target(name, &self.stack)
  }

  fn get_context(&self, overrides: Option<&Constraints>) -> EngineResult<BuildContext> {
    match overrides {
      Some(overrides) => self.context.get_context_with_overrides(overrides),
      None => Ok(self.context.clone()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::BuildFile;
  use crate::cache::BuildCache;
  use crate::fileset::{FileRef, MemoryFile};
  use crate::model::{BuildModel, NamespaceBuilder};
  use crate::name::NameBuilder;
  use crate::rules::register_target_rule;
  use std::cell::RefCell as StdRefCell;
  use tempfile::{TempDir, tempdir};

  fn prop_decl(file: &Rc<BuildFile>, name: &str, values: Vec<Name>) -> Rc<PropertyDecl> {
    let values = values.into_iter().map(|v| ValueDecl::new(file, 0, v)).collect();
    PropertyDecl::new(file, 0, name, values)
  }

  fn literal(text: &str) -> Name {
    Name::from_literal(text)
  }

  fn var(name: &str) -> Name {
    NameBuilder::new().subst_var(name).build()
  }

  fn model_with(
    builder_fn: impl FnOnce(&Rc<BuildFile>, &mut NamespaceBuilder),
  ) -> (TempDir, BuildModel) {
    let temp = tempdir().unwrap();
    let file = BuildFile::synthetic("TEST");
    let mut builder = NamespaceBuilder::new();
    builder_fn(&file, &mut builder);
    let model = builder.build(BuildCache::new(temp.path().join("cache")));
    (temp, model)
  }

  fn get_values(model: &BuildModel, name: &str, constraints: Constraints) -> Vec<String> {
    let context = model.get_config(constraints).unwrap();
    let cell = context.get_property(name, &DependencyStack::empty()).unwrap();
    cell.value().unwrap().values().to_vec()
  }

  #[test]
  fn string_properties_resolve_with_substitution() {
    let (_temp, model) = model_with(|file, b| {
      b.add_property(prop_decl(file, "a", vec![literal("b"), literal("c")])).unwrap();
      b.add_property(prop_decl(file, "d", vec![var("a")])).unwrap();
      b.add_property(prop_decl(file, "e", vec![var("a"), var("a")])).unwrap();
      let a_twice = NameBuilder::new().literal_str("a").subst_var("a").build();
      b.add_property(prop_decl(file, "f", vec![a_twice])).unwrap();
    });

    assert_eq!(get_values(&model, "a", Constraints::new()), ["b", "c"]);
    assert_eq!(get_values(&model, "d", Constraints::new()), ["b c"]);
    assert_eq!(get_values(&model, "e", Constraints::new()), ["b c", "b c"]);

    // A constraint shadows the declaration.
    let mut constraints = Constraints::new();
    constraints.insert("a".into(), Property::from_value("QUUX"));
    assert_eq!(get_values(&model, "f", constraints), ["aQUUX"]);
  }

  #[test]
  fn repeated_requests_observe_the_same_cell() {
    let (_temp, model) = model_with(|file, b| {
      b.add_property(prop_decl(file, "a", vec![literal("x")])).unwrap();
    });
    let context = model.get_config(Constraints::new()).unwrap();
    let first = context.get_property("a", &DependencyStack::empty()).unwrap();
    let second = context.get_property("a", &DependencyStack::empty()).unwrap();
    assert!(first.ptr_eq(&second));
  }

  #[test]
  fn circular_properties_fail_with_a_trace_naming_both() {
    let (_temp, model) = model_with(|file, b| {
      b.add_property(prop_decl(file, "a", vec![var("b")])).unwrap();
      b.add_property(prop_decl(file, "b", vec![var("a")])).unwrap();
    });
    let context = model.get_config(Constraints::new()).unwrap();
    let err = context.get_property("a", &DependencyStack::empty()).unwrap_err();
    match err {
      EngineError::CircularDependency { name, trace } => {
        assert_eq!(name, "a");
        assert!(trace.contains("at a (TEST:1:1)"), "trace was: {trace}");
        assert!(trace.contains("at b (TEST:1:1)"), "trace was: {trace}");
      }
      other => panic!("expected CircularDependency, got {other:?}"),
    }
  }

  #[test]
  fn undeclared_names_are_unresolved() {
    let (_temp, model) = model_with(|_file, _b| {});
    let context = model.get_config(Constraints::new()).unwrap();
    let err = context.get_property("nope", &DependencyStack::empty()).unwrap_err();
    assert_eq!(err, EngineError::UnresolvedName("nope".into()));
    let err = context.get_target("nope", &DependencyStack::empty()).unwrap_err();
    assert_eq!(err, EngineError::UnresolvedName("nope".into()));
  }

  #[test]
  fn target_rules_run_once_per_context() {
    let runs = Rc::new(StdRefCell::new(0usize));
    let (_temp, model) = model_with(|file, b| {
      b.declare_target_type("emit");
      b.add_target(crate::ast::TargetDecl::new(file, 0, "emit", "mylib", Vec::new())).unwrap();
    });
    {
      let runs = runs.clone();
      register_target_rule("emit", move |_target: TargetContext| {
        *runs.borrow_mut() += 1;
        Ok(Cell::of(FileSet::from_entries([(
          "lib/out.js".to_string(),
          FileRef::new(MemoryFile::from_str("out", "code")),
        )])))
      });
    }

    let context = model.get_config(Constraints::new()).unwrap();
    let first = context.get_target("mylib", &DependencyStack::empty()).unwrap();
    let second = context.get_target("mylib", &DependencyStack::empty()).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(*runs.borrow(), 1);

    let sources = first.value().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].as_file_set().unwrap().contains("lib/out.js"));
  }

  #[test]
  fn prefix_target_resolution_globs_the_remainder() {
    let (_temp, model) = model_with(|file, b| {
      b.declare_target_type("emit");
      b.add_target(crate::ast::TargetDecl::new(file, 0, "emit", "mylib", Vec::new())).unwrap();
      let dep = NameBuilder::new().literal_str("mylib/lib/").glob_metachars("*").build();
      b.add_property(prop_decl(file, "deps", vec![dep])).unwrap();
      let miss = NameBuilder::new().literal_str("mylibrary/lib/").glob_metachars("*").build();
      b.add_property(prop_decl(file, "missing", vec![miss])).unwrap();
    });
    register_target_rule("emit", |_target: TargetContext| {
      Ok(Cell::of(FileSet::from_entries([
        ("lib/a.js".to_string(), FileRef::new(MemoryFile::from_str("a", "a"))),
        ("lib/b.d.ts".to_string(), FileRef::new(MemoryFile::from_str("b", "b"))),
        ("README".to_string(), FileRef::new(MemoryFile::from_str("r", "r"))),
      ])))
    });

    let context = model.get_config(Constraints::new()).unwrap();
    let deps = context.get_target("deps", &DependencyStack::empty()).unwrap();
    let sources = deps.value().unwrap();
    assert_eq!(sources.len(), 1);
    let set = sources[0].as_file_set().unwrap();
    assert!(set.contains("lib/a.js"));
    assert!(set.contains("lib/b.d.ts"));
    assert!(!set.contains("README"));

    // No separator-bounded target match falls back to the (empty)
    // declaring file source.
    let missing = context.get_target("missing", &DependencyStack::empty()).unwrap();
    let sources = missing.value().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0].as_file_set().unwrap().is_empty());
  }

  #[test]
  fn values_empty_after_substitution_yield_no_sources() {
    let (_temp, model) = model_with(|file, b| {
      b.add_property(prop_decl(file, "empty", Vec::new())).unwrap();
      b.add_property(prop_decl(file, "uses", vec![var("empty")])).unwrap();
    });
    let context = model.get_config(Constraints::new()).unwrap();
    let cell = context.get_target("uses", &DependencyStack::empty()).unwrap();
    assert!(cell.value().unwrap().is_empty());
  }

  #[test]
  fn undeclared_and_unregistered_target_types_are_distinct_errors() {
    let (_temp, model) = model_with(|file, b| {
      b.declare_target_type("declared-but-no-rule");
      b.add_target(crate::ast::TargetDecl::new(file, 0, "declared-but-no-rule", "t1", Vec::new()))
        .unwrap();
      b.add_target(crate::ast::TargetDecl::new(file, 3, "never-declared", "t2", Vec::new()))
        .unwrap();
    });
    let context = model.get_config(Constraints::new()).unwrap();

    let err = context.get_target("t1", &DependencyStack::empty()).unwrap_err();
    match err {
      EngineError::NoRuleFound { type_name, trace } => {
        assert_eq!(type_name, "declared-but-no-rule");
        assert!(trace.contains("at t1 (TEST:1:1)"));
      }
      other => panic!("expected NoRuleFound, got {other:?}"),
    }

    let err = context.get_target("t2", &DependencyStack::empty()).unwrap_err();
    assert_eq!(err, EngineError::UnknownTargetType("never-declared".into()));
  }

  #[test]
  fn overrides_share_the_canonical_context() {
    let (_temp, model) = model_with(|file, b| {
      b.add_property(prop_decl(file, "opt", vec![literal("default")])).unwrap();
    });
    let base = model.get_config(Constraints::new()).unwrap();

    let mut overrides = Constraints::new();
    overrides.insert("opt".into(), Property::from_value("forced"));
    let forced = base
      .get_property_with_overrides("opt", &overrides, &DependencyStack::empty())
      .unwrap();
    assert_eq!(forced.value().unwrap().to_string(), "forced");

    let direct = model.get_config(overrides.clone()).unwrap();
    assert_eq!(base.get_context_with_overrides(&overrides).unwrap(), direct);
    assert!(direct.has_constraints(&overrides));
    assert!(!base.has_constraints(&overrides));
  }

  #[test]
  fn target_context_exposes_body_and_global_properties() {
    let (_temp, model) = model_with(|file, b| {
      b.declare_target_type("inspect");
      b.add_property(prop_decl(file, "global", vec![literal("g")])).unwrap();
      let body = vec![prop_decl(file, "srcs", vec![literal("main.ts")])];
      b.add_target(crate::ast::TargetDecl::new(file, 0, "inspect", "t", body)).unwrap();
    });

    let observed: Rc<StdRefCell<Vec<String>>> = Rc::new(StdRefCell::new(Vec::new()));
    {
      let observed = observed.clone();
      register_target_rule("inspect", move |target: TargetContext| {
        assert_eq!(target.target_name(), "t");
        assert_eq!(target.target_type(), "inspect");
        let srcs = target.get_required_string("srcs", None)?;
        let global = target.get_global_string("global", None)?;
        observed.borrow_mut().push(srcs.value().unwrap());
        observed.borrow_mut().push(global.value().unwrap());
        assert!(target.get_property("absent", None)?.value().unwrap().is_none());
        assert_eq!(
          target.get_required_property("absent", None).unwrap_err(),
          EngineError::MissingRequiredProperty("absent".into())
        );
        Ok(Cell::of(FileSet::empty()))
      });
    }

    let context = model.get_config(Constraints::new()).unwrap();
    let cell = context.get_target("t", &DependencyStack::empty()).unwrap();
    assert!(cell.value().is_some());
    assert_eq!(*observed.borrow(), vec!["main.ts".to_string(), "g".to_string()]);
  }
}
