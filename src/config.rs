//! Hierarchical string key/value configuration tree (C2).
//!
//! Every channel exposes one of these as its own subtree. Dotted paths
//! (`"open.block"`) address nested children without the caller having to
//! walk the tree by hand.

use indexmap::IndexMap;

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// A single node: an optional scalar value plus an ordered map of named
/// children. Cloning a node deep-clones the whole subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigNode {
  value: Option<String>,
  children: IndexMap<String, ConfigNode>,
}

/// A read-only view over a [`ConfigNode`]. `set`/`unlink` fail on a view;
/// used for the `info.*` and `url.*` subtrees spec.md §4.2 requires to be
/// write-protected. Does not copy the backing node, so it observes live
/// mutations (spec.md §3 invariant).
#[derive(Clone, Debug)]
pub struct ConfigView<'a> {
  node: &'a ConfigNode,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl ConfigNode {
  pub fn new() -> Self {
    ConfigNode::default()
  }

  pub fn leaf(value: impl Into<String>) -> Self {
    ConfigNode { value: Some(value.into()), children: IndexMap::new() }
  }

  /// Read the scalar value at `path`, or `default` if absent.
  pub fn get(&self, path: &str, default: &str) -> String {
    self.lookup(path).and_then(|n| n.value.clone()).unwrap_or_else(|| default.to_string())
  }

  /// Read the scalar value at `path`, or `None` if absent.
  pub fn get_opt(&self, path: &str) -> Option<String> {
    self.lookup(path).and_then(|n| n.value.clone())
  }

  /// Set the scalar value at `path`, creating intermediate nodes as needed.
  pub fn set(&mut self, path: &str, value: impl Into<String>) {
    let node = self.lookup_or_create(path);
    node.value = Some(value.into());
  }

  /// A writable view of the subtree rooted at `path`, creating it (and any
  /// intermediate nodes) if absent.
  pub fn sub_mut(&mut self, path: &str) -> &mut ConfigNode {
    self.lookup_or_create(path)
  }

  /// A read-only view of the subtree rooted at `path`. Returns `None` if
  /// the path does not exist.
  pub fn sub(&self, path: &str) -> Option<ConfigView<'_>> {
    self.lookup(path).map(|node| ConfigView { node })
  }

  /// Remove the node at `path`, returning whether anything was removed.
  pub fn unlink(&mut self, path: &str) -> bool {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return false };
    let Some(parent) = self.lookup_path_mut(&parts) else { return false };
    parent.children.shift_remove(last).is_some()
  }

  /// Flatten the subtree into a dotted-path -> value map, children first
  /// in insertion order.
  pub fn as_dict(&self) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    self.flatten_into("", &mut out);
    out
  }

  /// Deep-merge `other` into `self`; `other`'s scalar values win on
  /// conflict, children are merged recursively.
  pub fn merge(&mut self, other: &ConfigNode) {
    if other.value.is_some() {
      self.value = other.value.clone();
    }
    for (key, child) in &other.children {
      self.children.entry(key.clone()).or_default().merge(child);
    }
  }

  /// Parse a `"k=v;k=v"` string (or a bare comma list for repeated keys) into
  /// a node whose direct children are the parsed keys, in the order they
  /// first appear in `s`. Dotted keys create nested children.
  pub fn parse_kv(s: &str) -> ConfigNode {
    let mut node = ConfigNode::new();
    if s.is_empty() {
      return node;
    }
    for pair in s.split(';') {
      let pair = pair.trim();
      if pair.is_empty() {
        continue;
      }
      if let Some((k, v)) = pair.split_once('=') {
        node.set(k.trim(), v.trim());
      } else {
        node.set(pair, "");
      }
    }
    node
  }

  fn flatten_into(&self, prefix: &str, out: &mut IndexMap<String, String>) {
    if let Some(v) = &self.value {
      if !prefix.is_empty() {
        out.insert(prefix.to_string(), v.clone());
      }
    }
    for (key, child) in &self.children {
      let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
      child.flatten_into(&path, out);
    }
  }

  fn lookup(&self, path: &str) -> Option<&ConfigNode> {
    let mut node = self;
    for part in path.split('.').filter(|p| !p.is_empty()) {
      node = node.children.get(part)?;
    }
    Some(node)
  }

  fn lookup_path_mut(&mut self, parts: &[&str]) -> Option<&mut ConfigNode> {
    let mut node = self;
    for part in parts {
      if part.is_empty() {
        continue;
      }
      node = node.children.get_mut(*part)?;
    }
    Some(node)
  }

  fn lookup_or_create(&mut self, path: &str) -> &mut ConfigNode {
    let mut node = self;
    for part in path.split('.').filter(|p| !p.is_empty()) {
      node = node.children.entry(part.to_string()).or_default();
    }
    node
  }
}

impl<'a> ConfigView<'a> {
  pub fn get(&self, path: &str, default: &str) -> String {
    self.node.get(path, default)
  }

  pub fn get_opt(&self, path: &str) -> Option<String> {
    self.node.get_opt(path)
  }

  pub fn sub(&self, path: &str) -> Option<ConfigView<'a>> {
    self.node.sub(path)
  }

  pub fn as_dict(&self) -> IndexMap<String, String> {
    self.node.as_dict()
  }

  /// Always fails: views are write-protected (spec.md §4.2).
  pub fn set(&self, _path: &str, _value: &str) -> Result<(), WriteGuardError> {
    Err(WriteGuardError)
  }

  /// Always fails: views are write-protected (spec.md §4.2).
  pub fn unlink(&self, _path: &str) -> Result<(), WriteGuardError> {
    Err(WriteGuardError)
  }
}

/// Returned by mutating operations on a [`ConfigView`]; views never permit
/// writes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("cannot write through a read-only config view")]
pub struct WriteGuardError;

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_and_get_dotted_path() {
    let mut node = ConfigNode::new();
    node.set("open.block", "1024");
    assert_eq!(node.get("open.block", ""), "1024");
    assert_eq!(node.get("open.missing", "default"), "default");
  }

  #[test]
  fn view_observes_live_mutation() {
    let mut node = ConfigNode::new();
    node.set("info.echo", "yes");
    {
      let view = node.sub("info").unwrap();
      assert_eq!(view.get("echo", ""), "yes");
    }
    node.set("info.echo", "no");
    let view = node.sub("info").unwrap();
    assert_eq!(view.get("echo", ""), "no");
  }

  #[test]
  fn view_rejects_writes() {
    let mut node = ConfigNode::new();
    node.set("a", "1");
    let view = node.sub("").unwrap_or(ConfigView { node: &node });
    assert!(view.set("a", "2").is_err());
    assert!(view.unlink("a").is_err());
  }

  #[test]
  fn parse_kv_is_order_independent_after_normalization() {
    let a = ConfigNode::parse_kv("a=1;b=2;c=3");
    let b = ConfigNode::parse_kv("c=3;b=2;a=1");
    assert_eq!(a.as_dict().get("a"), b.as_dict().get("a"));
    assert_eq!(a.as_dict().get("b"), b.as_dict().get("b"));
    assert_eq!(a.as_dict().get("c"), b.as_dict().get("c"));
    assert_eq!(a.as_dict().len(), b.as_dict().len());
  }

  #[test]
  fn merge_is_deep() {
    let mut base = ConfigNode::new();
    base.set("a.x", "1");
    base.set("a.y", "2");
    let mut patch = ConfigNode::new();
    patch.set("a.y", "20");
    patch.set("a.z", "3");
    base.merge(&patch);
    assert_eq!(base.get("a.x", ""), "1");
    assert_eq!(base.get("a.y", ""), "20");
    assert_eq!(base.get("a.z", ""), "3");
  }

  #[test]
  fn unlink_removes_node() {
    let mut node = ConfigNode::new();
    node.set("a.b", "1");
    assert!(node.unlink("a.b"));
    assert_eq!(node.get_opt("a.b"), None);
  }
}
