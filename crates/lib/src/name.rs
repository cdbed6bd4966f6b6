//! String expressions with literal, glob, and variable-substitution parts.
//!
//! A [`Name`] is what the build-file parser hands the resolver for every
//! value: an immutable sequence of parts that is substituted, prefix
//! matched, and finally rendered to a glob pattern. Name components are
//! separated by a forward slash on every platform.

use std::collections::HashMap;

use crate::consts::NAME_SEPARATOR;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum NamePart {
  /// Characters interpreted literally, even if they look like
  /// metacharacters.
  Literal(String),
  /// Characters where glob metacharacters (`*`, `?`, `[...]`) are live.
  Glob(String),
  /// A `${name}` variable reference, by variable name.
  VarSubst(String),
}

impl NamePart {
  fn merge_key(&self) -> u8 {
    match self {
      NamePart::Literal(_) => 0,
      NamePart::Glob(_) => 1,
      NamePart::VarSubst(_) => 2,
    }
  }

  fn text(&self) -> &str {
    match self {
      NamePart::Literal(s) | NamePart::Glob(s) | NamePart::VarSubst(s) => s,
    }
  }
}

/// A string expression, potentially consisting of literal, wildcard, and
/// variable substitution parts. Immutable; every transform returns a new
/// `Name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
  parts: Vec<NamePart>,
}

impl Name {
  /// The empty name.
  pub fn empty() -> Name {
    Name { parts: Vec::new() }
  }

  /// A name consisting of a single literal string.
  pub fn from_literal(value: impl Into<String>) -> Name {
    let value = value.into();
    if value.is_empty() {
      Name::empty()
    } else {
      Name { parts: vec![NamePart::Literal(value)] }
    }
  }

  pub fn is_empty(&self) -> bool {
    self.parts.iter().all(|p| p.text().is_empty())
  }

  /// True if the name consists of a single literal part (or is empty).
  pub fn is_simple(&self) -> bool {
    match self.parts.as_slice() {
      [] => true,
      [NamePart::Literal(_)] => true,
      _ => false,
    }
  }

  /// The literal string if this consists only of literal parts, otherwise
  /// `None`.
  pub fn simple_name(&self) -> Option<&str> {
    match self.parts.as_slice() {
      [] => Some(""),
      [NamePart::Literal(s)] => Some(s),
      _ => None,
    }
  }

  pub fn has_glob(&self) -> bool {
    self.parts.iter().any(|p| matches!(p, NamePart::Glob(_)))
  }

  pub fn has_var_subst(&self) -> bool {
    self.parts.iter().any(|p| matches!(p, NamePart::VarSubst(_)))
  }

  /// Referenced variable names, in order of first occurrence, each once.
  pub fn variables(&self) -> Vec<String> {
    let mut vars: Vec<String> = Vec::new();
    for part in &self.parts {
      if let NamePart::VarSubst(name) = part
        && !vars.iter().any(|v| v == name)
      {
        vars.push(name.clone());
      }
    }
    vars
  }

  /// Replace every variable reference with its resolved value and merge
  /// the result back into as few parts as possible. The original name is
  /// untouched. Every referenced variable must be present in the map;
  /// callers resolve them all first.
  pub fn substitute(&self, values: &HashMap<String, String>) -> EngineResult<Name> {
    let mut parts: Vec<NamePart> = Vec::new();
    for part in &self.parts {
      let new_part = match part {
        NamePart::VarSubst(var) => {
          let value = values
            .get(var)
            .ok_or_else(|| EngineError::UnresolvedName(var.clone()))?;
          NamePart::Literal(value.clone())
        }
        other => other.clone(),
      };
      match (parts.last_mut(), &new_part) {
        (Some(NamePart::Literal(prev)), NamePart::Literal(next)) => prev.push_str(next),
        (Some(NamePart::Glob(prev)), NamePart::Glob(next)) => prev.push_str(next),
        _ => parts.push(new_part),
      }
    }
    Ok(Name { parts })
  }

  /// The leading literal part, or the empty string if the name starts
  /// with a glob or variable part.
  pub fn literal_prefix(&self) -> &str {
    match self.parts.first() {
      Some(NamePart::Literal(s)) => s,
      _ => "",
    }
  }

  /// As [`Name::literal_prefix`], but excluding the final path component
  /// if a non-literal part follows it. Used to decide whether a name
  /// could refer to a declared target before falling back to a
  /// filesystem glob search.
  ///
  /// e.g. `src/bar/foo*.ts` yields `src/bar`.
  pub fn literal_path_prefix(&self) -> &str {
    let Some(NamePart::Literal(prefix)) = self.parts.first() else {
      return "";
    };
    if self.parts.len() == 1 {
      return prefix;
    }
    match prefix.rfind(NAME_SEPARATOR) {
      Some(idx) => &prefix[..idx],
      None => "",
    }
  }

  /// A new name with the given initial literal prefix removed, including
  /// any trailing separator. If the prefix does not match, the name is
  /// returned unchanged.
  ///
  /// e.g. `mylib/lib/*` without prefix `mylib` yields `lib/*`.
  pub fn without_prefix(&self, prefix: &str) -> Name {
    match self.parts.first() {
      Some(NamePart::Literal(head)) if head.starts_with(prefix) => {
        let mut end = prefix.len();
        if head[end..].starts_with(NAME_SEPARATOR) {
          end += NAME_SEPARATOR.len_utf8();
        }
        let rest = &head[end..];
        let mut parts: Vec<NamePart> = Vec::new();
        if !rest.is_empty() {
          parts.push(NamePart::Literal(rest.to_string()));
        }
        parts.extend(self.parts[1..].iter().cloned());
        Name { parts }
      }
      _ => self.clone(),
    }
  }

  /// A new name with the given literal prefix prepended.
  pub fn with_prefix(&self, prefix: &str) -> Name {
    if prefix.is_empty() {
      return self.clone();
    }
    let mut parts = self.parts.clone();
    match parts.first_mut() {
      Some(NamePart::Literal(head)) => {
        head.insert_str(0, prefix);
      }
      _ => parts.insert(0, NamePart::Literal(prefix.to_string())),
    }
    Name { parts }
  }

  /// A new name with the dirname of `filename` prepended.
  ///
  /// e.g. `mylib/lib/*` relative to `src/lib/BUILD` yields
  /// `src/lib/mylib/lib/*`. A bare filename leaves the name unchanged.
  /// Does not attempt to interpret `.` or `..`.
  pub fn relative_to(&self, filename: &str) -> Name {
    match filename.rfind(NAME_SEPARATOR) {
      None | Some(0) => self.clone(),
      Some(idx) => self.with_prefix(&filename[..=idx]),
    }
  }
}

impl std::fmt::Display for Name {
  /// Renders a string suitable for a glob matcher: metacharacters in
  /// literal parts are backslash-escaped, glob parts pass through, and an
  /// (abnormally) unsubstituted variable renders as `${name}`.
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for part in &self.parts {
      match part {
        NamePart::Literal(s) => write!(f, "{}", escape_glob(s))?,
        NamePart::Glob(s) => write!(f, "{s}")?,
        NamePart::VarSubst(s) => write!(f, "${{{s}}}")?,
      }
    }
    Ok(())
  }
}

fn escape_glob(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for ch in value.chars() {
    if matches!(ch, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
      out.push('\\');
    }
    out.push(ch);
  }
  out
}

/// Incremental construction of a [`Name`], part by part, as the parser
/// walks a value expression. Adjacent parts of the same kind merge, except
/// consecutive variable references, which never do.
#[derive(Default)]
pub struct NameBuilder {
  parts: Vec<NamePart>,
}

impl NameBuilder {
  pub fn new() -> NameBuilder {
    NameBuilder::default()
  }

  fn append(&mut self, part: NamePart) {
    if part.text().is_empty() {
      return;
    }
    let mergeable = !matches!(part, NamePart::VarSubst(_));
    match (self.parts.last_mut(), &part) {
      (Some(last), _) if mergeable && last.merge_key() == part.merge_key() => {
        match (last, part) {
          (NamePart::Literal(prev), NamePart::Literal(next))
          | (NamePart::Glob(prev), NamePart::Glob(next)) => prev.push_str(&next),
          _ => {}
        }
      }
      _ => self.parts.push(part),
    }
  }

  /// Characters to be interpreted literally (ie not as glob
  /// metacharacters), such as from a single-quoted string.
  pub fn literal_str(&mut self, value: &str) -> &mut Self {
    self.append(NamePart::Literal(value.to_string()));
    self
  }

  /// Characters from a double-quoted string: backslash sequences are
  /// unescaped and the result is treated literally. Does not extract
  /// substitution variables.
  pub fn escaped_str(&mut self, value: &str) -> &mut Self {
    self.append(NamePart::Literal(unescape_double_quoted(value)));
    self
  }

  /// Characters from an unquoted string: glob metacharacters are live and
  /// backslash sequences are interpreted as for double-quoted strings.
  pub fn glob_metachars(&mut self, value: &str) -> &mut Self {
    self.append(NamePart::Glob(value.to_string()));
    self
  }

  /// A substitution variable, by name.
  pub fn subst_var(&mut self, name: &str) -> &mut Self {
    self.append(NamePart::VarSubst(name.to_string()));
    self
  }

  pub fn reset(&mut self) {
    self.parts.clear();
  }

  /// Finish the name and reset the builder for reuse.
  pub fn build(&mut self) -> Name {
    Name { parts: std::mem::take(&mut self.parts) }
  }
}

/// Unescape the contents of a double-quoted string (excluding the
/// containing quotes): `\0NN` octal, `\xNN` hex, the usual single-letter
/// escapes, and `\c` for any other `c` yields `c`.
fn unescape_double_quoted(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars().peekable();
  while let Some(ch) = chars.next() {
    if ch != '\\' {
      out.push(ch);
      continue;
    }
    match chars.next() {
      None => out.push('\\'),
      Some('0') => {
        let mut code: u32 = 0;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(8)) {
          code = code * 8 + d;
          chars.next();
        }
        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
      }
      Some('x') => {
        let mut code: u32 = 0;
        let mut digits = 0;
        while digits < 2
          && let Some(d) = chars.peek().and_then(|c| c.to_digit(16))
        {
          code = code * 16 + d;
          digits += 1;
          chars.next();
        }
        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
      }
      Some('a') => out.push('\x07'),
      Some('b') => out.push('\x08'),
      Some('e') => out.push('\x1b'),
      Some('f') => out.push('\x0c'),
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('t') => out.push('\t'),
      Some('v') => out.push('\x0b'),
      Some(other) => out.push(other),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn subst_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn substitute_is_non_destructive() {
    let name = NameBuilder::new()
      .literal_str("ab")
      .subst_var("CD")
      .literal_str("ef")
      .build();
    let substituted = name.substitute(&subst_map(&[("CD", "actual value")])).unwrap();
    assert_eq!(substituted.to_string(), "abactual valueef");
    assert_eq!(name.to_string(), "ab${CD}ef");

    let name = NameBuilder::new().subst_var("CD").build();
    assert_eq!(
      name.substitute(&subst_map(&[("CD", "actual value")])).unwrap().to_string(),
      "actual value"
    );
    assert_eq!(name.to_string(), "${CD}");
  }

  #[test]
  fn substitute_requires_every_variable() {
    let name = NameBuilder::new().subst_var("missing").build();
    assert_eq!(
      name.substitute(&HashMap::new()).unwrap_err(),
      EngineError::UnresolvedName("missing".into())
    );
  }

  #[test]
  fn builder_merges_adjacent_same_kind_parts() {
    let name = NameBuilder::new()
      .literal_str("a")
      .literal_str("b")
      .glob_metachars("*")
      .glob_metachars("?")
      .build();
    assert_eq!(name.to_string(), "ab*?");
    assert!(name.has_glob());
    assert!(!name.is_simple());
  }

  #[test]
  fn consecutive_variables_never_merge() {
    let name = NameBuilder::new().subst_var("a").subst_var("b").build();
    assert_eq!(name.variables(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(name.to_string(), "${a}${b}");
  }

  #[test]
  fn variables_are_first_occurrence_ordered_and_unique() {
    let name = NameBuilder::new()
      .subst_var("x")
      .literal_str("/")
      .subst_var("y")
      .literal_str("/")
      .subst_var("x")
      .build();
    assert_eq!(name.variables(), vec!["x".to_string(), "y".to_string()]);
  }

  #[test]
  fn literal_path_prefix_excludes_partial_components() {
    let name = NameBuilder::new().literal_str("src/bar/foo").glob_metachars("*").build();
    assert_eq!(name.literal_path_prefix(), "src/bar");

    let simple = Name::from_literal("src/bar/foo.ts");
    assert_eq!(simple.literal_path_prefix(), "src/bar/foo.ts");

    let glob_only = NameBuilder::new().glob_metachars("*").build();
    assert_eq!(glob_only.literal_path_prefix(), "");

    let partial = NameBuilder::new().literal_str("foo").glob_metachars("*").build();
    assert_eq!(partial.literal_path_prefix(), "");
  }

  #[test]
  fn without_prefix_strips_the_separator() {
    let name = NameBuilder::new().literal_str("mylib/lib/").glob_metachars("*").build();
    assert_eq!(name.without_prefix("mylib").to_string(), "lib/*");
    assert_eq!(name.without_prefix("nothere").to_string(), "mylib/lib/*");

    let exact = Name::from_literal("mylib");
    assert!(exact.without_prefix("mylib").is_empty());
  }

  #[test]
  fn relative_to_prepends_the_dirname() {
    let name = NameBuilder::new().literal_str("mylib/lib/").glob_metachars("*").build();
    assert_eq!(name.relative_to("src/lib/BUILD").to_string(), "src/lib/mylib/lib/*");
    assert_eq!(name.relative_to("BUILD").to_string(), "mylib/lib/*");
    assert_eq!(name.relative_to("/BUILD").to_string(), "mylib/lib/*");
  }

  #[test]
  fn display_escapes_literal_metacharacters() {
    let name = NameBuilder::new().literal_str("a*b").glob_metachars("?").build();
    assert_eq!(name.to_string(), "a\\*b?");
  }

  #[test]
  fn unescape_handles_common_sequences() {
    let name = NameBuilder::new().escaped_str("a\\tb\\x41\\052c\\q").build();
    assert_eq!(name.simple_name(), Some("a\tbA*cq"));
  }
}
