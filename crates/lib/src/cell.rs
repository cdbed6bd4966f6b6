//! The reactive computation node underlying every value in the engine.
//!
//! A [`Cell`] behaves much like a future, except that:
//!
//! - a cell may depend on any number of other cells;
//! - a cell is persistent: when a value it depends on changes, it is
//!   recomputed, and so on throughout the graph;
//! - a cell may be rejected, in which case the error propagates to every
//!   cell that transitively depends on it (there is no catch combinator;
//!   a broken chain is re-resolved by building fresh cells with corrected
//!   inputs).
//!
//! The graph is single-threaded: all state transitions and dependant
//! notifications happen synchronously inside one call stack. Fan-out and
//! fan-in ([`Cell::all`]) express concurrency across independent branches;
//! nothing here blocks.
//!
//! Ownership runs strictly downstream-to-upstream: a derived cell holds
//! strong references to its dependencies, while a cell holds only weak
//! references to its dependants. Dropping every handle to a derived cell
//! reclaims it even though its ancestors live on; dead weak edges are
//! pruned whenever dependants are notified.
//!
//! A recompute closure may itself yield another cell ([`Flow::Pending`]),
//! in which case the outer cell adopts the inner cell's eventual value and
//! re-adopts on every future change of it.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{EngineError, EngineResult, SharedError};

/// Lifecycle state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
  /// No value has been determined yet.
  Unresolved,
  /// An ancestor changed; this cell may or may not need recomputation.
  MaybeInvalid,
  /// This cell definitely requires recomputation.
  Invalid,
  /// The cell holds a current value.
  Valid,
  /// The cell holds an error.
  Error,
}

/// Result of a recompute closure: either a final value, or another cell
/// the receiver should adopt (transparent flattening).
pub enum Flow<T: CellValue> {
  Value(T),
  Pending(Cell<T>),
}

/// Values stored in cells. Equality is the change-suppression rule: a
/// recomputed value equal to the previous one does not disturb dependants.
/// Immutable value types compare structurally or by shared-pointer
/// identity, whichever is cheaper.
pub trait CellValue: Clone + PartialEq + 'static {}
impl<T: Clone + PartialEq + 'static> CellValue for T {}

type Compute<T> = Box<dyn FnMut() -> EngineResult<Flow<T>>>;

/// A handle to a reactive cell. Cloning the handle shares the node.
pub struct Cell<T: CellValue> {
  node: Rc<CellRepr<T>>,
}

impl<T: CellValue> Clone for Cell<T> {
  fn clone(&self) -> Self {
    Cell { node: self.node.clone() }
  }
}

impl<T: CellValue> std::fmt::Debug for Cell<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cell").field("state", &self.state()).finish()
  }
}

impl<T: CellValue> Cell<T> {
  /// An unresolved root cell, to be settled later with [`Cell::resolve`]
  /// or [`Cell::reject`]. Leaf cells backed by external state (file reads,
  /// fetches, process runs) start out like this.
  pub fn root() -> Self {
    Cell { node: CellRepr::new() }
  }

  /// A cell that is already valid with `value`.
  pub fn of(value: T) -> Self {
    let cell = Cell::root();
    cell.node.commit(value);
    cell
  }

  /// A cell that is already rejected with `err`.
  pub fn failed(err: EngineError) -> Self {
    let cell = Cell::root();
    cell.node.fail(Rc::new(err));
    cell
  }

  pub fn state(&self) -> CellState {
    self.node.state()
  }

  /// True if both handles refer to the same underlying node.
  pub fn ptr_eq(&self, other: &Cell<T>) -> bool {
    Rc::ptr_eq(&self.node, &other.node)
  }

  /// The current value, if the cell ever reached `Valid`. A `MaybeInvalid`
  /// or `Invalid` cell still reports its previous value.
  pub fn value(&self) -> Option<T> {
    self.node.inner.borrow().value.clone()
  }

  pub fn error(&self) -> Option<SharedError> {
    self.node.inner.borrow().error.clone()
  }

  /// Settle this cell with a value, notifying dependants. Re-resolving
  /// with a value equal to the current one re-marks the cell valid but
  /// does not propagate invalidation downstream.
  pub fn resolve(&self, value: T) {
    self.node.commit(value);
  }

  /// Settle this cell by adopting another cell's eventual value,
  /// re-adopting on every future change of it.
  pub fn resolve_cell(&self, inner: Cell<T>) {
    self.node.adopt(inner);
  }

  /// Reject this cell. The error is retained and propagates immediately
  /// to every transitive dependant (first error wins).
  pub fn reject(&self, err: EngineError) {
    self.node.fail(Rc::new(err));
  }

  /// Mark this cell's value stale without yet knowing the replacement.
  /// Dependants transition to `MaybeInvalid` until a fresh resolution
  /// arrives.
  pub fn invalidate(&self) {
    self.node.invalidate_node();
  }

  /// A derived cell that recomputes from this cell's value. If the
  /// receiver is already valid the closure runs immediately; if it is
  /// already rejected the error propagates; otherwise the derived cell
  /// waits.
  pub fn then<U, F>(&self, mut f: F) -> Cell<U>
  where
    U: CellValue,
    F: FnMut(&T) -> EngineResult<Flow<U>> + 'static,
  {
    let derived = Cell::<U>::root();
    let source = self.node.clone();
    {
      let mut n = derived.node.inner.borrow_mut();
      n.deps.push(source.clone() as Rc<dyn ErasedNode>);
      let src = source.clone();
      n.compute = Some(Box::new(move || {
        let value = src.inner.borrow().value.clone();
        match value {
          Some(v) => f(&v),
          None => Err(EngineError::internal("dependency ran without a value")),
        }
      }));
    }
    source.add_dependant(Rc::downgrade(&(derived.node.clone() as Rc<dyn ErasedNode>)));
    match source.state() {
      CellState::Valid => derived.node.run(),
      CellState::Error => {
        let err = source.inner.borrow().error.clone();
        if let Some(err) = err {
          derived.node.inherit_error(err);
        }
      }
      _ => {}
    }
    derived
  }

  /// Fan-in join: a derived cell over N cells whose closure runs only
  /// once every input is valid, and again each time any input's value
  /// actually changes. `N = 0` runs immediately.
  pub fn all<U, F>(deps: &[Cell<T>], mut f: F) -> Cell<U>
  where
    U: CellValue,
    F: FnMut(&[T]) -> EngineResult<Flow<U>> + 'static,
  {
    let derived = Cell::<U>::root();
    let handles: Vec<Rc<CellRepr<T>>> = deps.iter().map(|c| c.node.clone()).collect();
    {
      let mut n = derived.node.inner.borrow_mut();
      for h in &handles {
        n.deps.push(h.clone() as Rc<dyn ErasedNode>);
      }
      let hs = handles.clone();
      n.compute = Some(Box::new(move || {
        let mut values = Vec::with_capacity(hs.len());
        for h in &hs {
          match h.inner.borrow().value.clone() {
            Some(v) => values.push(v),
            None => return Err(EngineError::internal("dependency ran without a value")),
          }
        }
        f(&values)
      }));
    }
    for h in &handles {
      h.add_dependant(Rc::downgrade(&(derived.node.clone() as Rc<dyn ErasedNode>)));
    }
    let rejected = handles.iter().find_map(|h| {
      let n = h.inner.borrow();
      if n.state == CellState::Error { n.error.clone() } else { None }
    });
    if let Some(err) = rejected {
      derived.node.inherit_error(err);
    } else if derived.node.can_run() {
      derived.node.run();
    }
    derived
  }
}

/// Type-erased view of a cell node, as seen from its dependency and
/// dependant edges.
trait ErasedNode {
  fn state(&self) -> CellState;
  fn invalidate_node(&self);
  fn mark_maybe_invalid(&self);
  fn settle(&self);
  fn inherit_error(&self, err: SharedError);
}

struct Node<T: CellValue> {
  state: CellState,
  value: Option<T>,
  error: Option<SharedError>,
  /// Upstream cells, held strongly: a graph cannot be dropped out from
  /// under a live consumer.
  deps: Vec<Rc<dyn ErasedNode>>,
  /// Downstream cells, held weakly so an unreferenced derived cell can be
  /// reclaimed while its ancestors live on.
  dependants: Vec<Weak<dyn ErasedNode>>,
  compute: Option<Compute<T>>,
  /// Keeps the forwarder for the currently adopted inner cell alive.
  chain: Option<Rc<dyn ErasedNode>>,
}

struct CellRepr<T: CellValue> {
  this: Weak<CellRepr<T>>,
  inner: RefCell<Node<T>>,
}

impl<T: CellValue> CellRepr<T> {
  fn new() -> Rc<CellRepr<T>> {
    Rc::new_cyclic(|this| CellRepr {
      this: this.clone(),
      inner: RefCell::new(Node {
        state: CellState::Unresolved,
        value: None,
        error: None,
        deps: Vec::new(),
        dependants: Vec::new(),
        compute: None,
        chain: None,
      }),
    })
  }

  fn state(&self) -> CellState {
    self.inner.borrow().state
  }

  fn can_run(&self) -> bool {
    let deps: Vec<Rc<dyn ErasedNode>> = self.inner.borrow().deps.clone();
    deps.iter().all(|d| d.state() == CellState::Valid)
  }

  fn add_dependant(&self, dependant: Weak<dyn ErasedNode>) {
    self.inner.borrow_mut().dependants.push(dependant);
  }

  /// Upgrade the live dependants, pruning dead weak edges as we go. The
  /// returned snapshot is iterated outside the borrow so callbacks may
  /// freely register new dependants.
  fn dependants_snapshot(&self) -> Vec<Rc<dyn ErasedNode>> {
    let mut n = self.inner.borrow_mut();
    let mut live = Vec::with_capacity(n.dependants.len());
    n.dependants.retain(|w| match w.upgrade() {
      Some(rc) => {
        live.push(rc);
        true
      }
      None => false,
    });
    live
  }

  /// Recompute from current dependency values. Only called when every
  /// dependency is valid.
  fn run(&self) {
    let mut compute = match self.inner.borrow_mut().compute.take() {
      Some(f) => f,
      None => return,
    };
    let outcome = compute();
    self.inner.borrow_mut().compute = Some(compute);
    match outcome {
      Ok(Flow::Value(value)) => self.commit(value),
      Ok(Flow::Pending(cell)) => self.adopt(cell),
      Err(err) => self.fail(Rc::new(err)),
    }
  }

  /// Become valid with `value`. Dependants are invalidated only if the
  /// value actually changed, then given the chance to settle.
  fn commit(&self, value: T) {
    let changed;
    {
      let mut n = self.inner.borrow_mut();
      n.state = CellState::Valid;
      n.error = None;
      changed = n.value.as_ref() != Some(&value);
      if changed {
        n.value = Some(value);
      }
    }
    let dependants = self.dependants_snapshot();
    if changed {
      for d in &dependants {
        d.invalidate_node();
      }
    }
    for d in &dependants {
      d.settle();
    }
  }

  /// Adopt an inner cell produced by `resolve_cell` or a `Flow::Pending`
  /// outcome: forward its current and all future values into this cell.
  /// Re-running our own compute replaces the forwarder.
  fn adopt(&self, inner: Cell<T>) {
    let fwd = Rc::new(Forwarder { outer: self.this.clone(), inner: inner.node.clone() });
    inner
      .node
      .add_dependant(Rc::downgrade(&(fwd.clone() as Rc<dyn ErasedNode>)));
    self.inner.borrow_mut().chain = Some(fwd as Rc<dyn ErasedNode>);
    match inner.node.state() {
      CellState::Valid => {
        let value = inner.node.inner.borrow().value.clone();
        if let Some(value) = value {
          self.commit(value);
        }
      }
      CellState::Error => {
        let err = inner.node.inner.borrow().error.clone();
        if let Some(err) = err {
          self.fail(err);
        }
      }
      _ => {}
    }
  }

  fn fail(&self, err: SharedError) {
    {
      let mut n = self.inner.borrow_mut();
      n.state = CellState::Error;
      n.error = Some(err.clone());
    }
    tracing::error!(error = %err, "cell rejected");
    for d in self.dependants_snapshot() {
      d.inherit_error(err.clone());
    }
  }
}

impl<T: CellValue> ErasedNode for CellRepr<T> {
  fn state(&self) -> CellState {
    self.inner.borrow().state
  }

  fn invalidate_node(&self) {
    {
      let mut n = self.inner.borrow_mut();
      if n.state == CellState::Unresolved {
        return;
      }
      n.state = CellState::Invalid;
    }
    for d in self.dependants_snapshot() {
      d.mark_maybe_invalid();
    }
  }

  fn mark_maybe_invalid(&self) {
    {
      let mut n = self.inner.borrow_mut();
      if n.state != CellState::Valid && n.state != CellState::Error {
        return;
      }
      n.state = CellState::MaybeInvalid;
    }
    for d in self.dependants_snapshot() {
      d.mark_maybe_invalid();
    }
  }

  fn settle(&self) {
    let state = self.state();
    if state == CellState::Valid || !self.can_run() {
      return;
    }
    if state == CellState::MaybeInvalid {
      // Inputs settled back to their previous values; no recompute needed.
      {
        let mut n = self.inner.borrow_mut();
        n.state = if n.error.is_some() { CellState::Error } else { CellState::Valid };
      }
      for d in self.dependants_snapshot() {
        d.settle();
      }
    } else {
      self.run();
    }
  }

  fn inherit_error(&self, err: SharedError) {
    {
      let mut n = self.inner.borrow_mut();
      if n.state == CellState::Error {
        return;
      }
      n.state = CellState::Error;
      n.error = Some(err.clone());
    }
    for d in self.dependants_snapshot() {
      d.inherit_error(err.clone());
    }
  }
}

/// Dependant edge installed by [`CellRepr::adopt`]: copies the inner
/// cell's outcomes into the outer cell without touching the outer cell's
/// own compute closure.
struct Forwarder<T: CellValue> {
  outer: Weak<CellRepr<T>>,
  inner: Rc<CellRepr<T>>,
}

impl<T: CellValue> Forwarder<T> {
  fn is_active(&self, outer: &CellRepr<T>) -> bool {
    match &outer.inner.borrow().chain {
      Some(chain) => std::ptr::addr_eq(Rc::as_ptr(chain), self as *const Forwarder<T>),
      None => false,
    }
  }
}

impl<T: CellValue> ErasedNode for Forwarder<T> {
  fn state(&self) -> CellState {
    self.inner.state()
  }

  fn invalidate_node(&self) {}

  fn mark_maybe_invalid(&self) {}

  fn settle(&self) {
    let Some(outer) = self.outer.upgrade() else { return };
    if !self.is_active(&outer) {
      return;
    }
    if self.inner.state() == CellState::Valid {
      let value = self.inner.inner.borrow().value.clone();
      if let Some(value) = value {
        outer.commit(value);
      }
    }
  }

  fn inherit_error(&self, err: SharedError) {
    let Some(outer) = self.outer.upgrade() else { return };
    if !self.is_active(&outer) {
      return;
    }
    outer.inherit_error(err);
  }
}
