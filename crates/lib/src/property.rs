//! Resolved property values.

use serde::{Deserialize, Serialize};

/// An ordered list of resolved string values. Insertion order is
/// significant and duplicates are permitted. Consumed either as a list or
/// as a scalar (the values joined with single spaces).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property(Vec<String>);

impl Property {
  pub fn new(values: Vec<String>) -> Property {
    Property(values)
  }

  pub fn from_value(value: impl Into<String>) -> Property {
    Property(vec![value.into()])
  }

  pub fn values(&self) -> &[String] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl std::fmt::Display for Property {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0.join(" "))
  }
}

impl FromIterator<String> for Property {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Property {
    Property(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scalar_form_joins_with_spaces() {
    let prop = Property::new(vec!["b".into(), "c".into()]);
    assert_eq!(prop.to_string(), "b c");
    assert_eq!(prop.values(), ["b", "c"]);
  }

  #[test]
  fn duplicates_are_preserved_in_order() {
    let prop = Property::new(vec!["x".into(), "x".into(), "a".into()]);
    assert_eq!(prop.values(), ["x", "x", "a"]);
  }
}
