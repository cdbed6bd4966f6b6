//! The target-rule registry.
//!
//! Rules are registered once during startup, before any resolution
//! begins, keyed by the target type name they build. The registry is
//! thread local because the whole evaluation graph is single threaded;
//! as a side effect, tests register rules without seeing each other.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::cell::Cell;
use crate::context::TargetContext;
use crate::error::EngineResult;
use crate::fileset::FileSet;

/// A build rule for one target type. Receives the target's own
/// properties (via the [`TargetContext`]) and produces a cell that
/// eventually yields the target's output file set.
///
/// Rules compose by recursively requesting other targets and properties
/// through the context; the resulting cell graph is the scheduler.
pub trait TargetRule {
  fn evaluate(&self, target: TargetContext) -> EngineResult<Cell<FileSet>>;
}

impl<F> TargetRule for F
where
  F: Fn(TargetContext) -> EngineResult<Cell<FileSet>>,
{
  fn evaluate(&self, target: TargetContext) -> EngineResult<Cell<FileSet>> {
    self(target)
  }
}

thread_local! {
  static REGISTRY: RefCell<HashMap<String, Rc<dyn TargetRule>>> = RefCell::new(HashMap::new());
}

/// Register the rule that builds targets of the given type, replacing any
/// previous registration.
pub fn register_target_rule(type_name: impl Into<String>, rule: impl TargetRule + 'static) {
  let type_name = type_name.into();
  debug!(target_type = %type_name, "registering target rule");
  REGISTRY.with(|r| r.borrow_mut().insert(type_name, Rc::new(rule)));
}

pub fn lookup_target_rule(type_name: &str) -> Option<Rc<dyn TargetRule>> {
  REGISTRY.with(|r| r.borrow().get(type_name).cloned())
}

pub fn has_target_rule(type_name: &str) -> bool {
  REGISTRY.with(|r| r.borrow().contains_key(type_name))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cell::Cell;

  #[test]
  fn registered_rules_are_found_by_type_name() {
    assert!(!has_target_rule("copy"));
    register_target_rule("copy", |_target: TargetContext| Ok(Cell::of(FileSet::empty())));
    assert!(has_target_rule("copy"));
    assert!(lookup_target_rule("copy").is_some());
    assert!(lookup_target_rule("other").is_none());
  }
}
