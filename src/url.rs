//! URL grammar (§6): `(prefix '+')* tag '://' host? (';' key '=' value)*`.

use indexmap::IndexMap;

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// A parsed `scheme://host;k=v;k=v` URL. `scheme` may be a `+`-separated
/// chain of prefix tags followed by one leaf tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Url {
  /// Prefix tags, outermost-last parse order preserved (e.g. `["prefix"]`
  /// for `prefix+echo://`).
  pub prefixes: Vec<String>,
  /// The leaf tag, e.g. `"echo"`.
  pub tag: String,
  pub host: String,
  pub params: IndexMap<String, String>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Url {
  /// Parse a URL string. Fails on a missing `://` separator or a malformed
  /// `key=value` parameter.
  pub fn parse(s: &str) -> Result<Url, String> {
    let (scheme, rest) = s
      .split_once("://")
      .ok_or_else(|| format!("missing '://' in url {s:?}"))?;
    if scheme.is_empty() {
      return Err(format!("empty scheme in url {s:?}"));
    }
    let mut tokens: Vec<String> = scheme.split('+').map(str::to_string).collect();
    let tag = tokens.pop().expect("split always yields at least one token");
    let prefixes = tokens;

    let mut parts = rest.split(';');
    let host = parts.next().unwrap_or("").to_string();

    let mut params = IndexMap::new();
    for kv in parts {
      if kv.is_empty() {
        continue;
      }
      let (k, v) = kv
        .split_once('=')
        .ok_or_else(|| format!("malformed parameter {kv:?} in url {s:?}"))?;
      params.insert(k.to_string(), v.to_string());
    }

    Ok(Url { prefixes, tag, host, params })
  }

  /// Re-serialize, in the canonical form `prefix+...+tag://host;k=v;...`
  /// with parameters in insertion order. Used to populate `config.init`
  /// and `config.url`.
  pub fn to_string_canonical(&self) -> String {
    let mut scheme = String::new();
    for p in &self.prefixes {
      scheme.push_str(p);
      scheme.push('+');
    }
    scheme.push_str(&self.tag);
    let mut s = format!("{scheme}://{}", self.host);
    for (k, v) in &self.params {
      s.push(';');
      s.push_str(k);
      s.push('=');
      s.push_str(v);
    }
    s
  }

  pub fn param(&self, key: &str) -> Option<&str> {
    self.params.get(key).map(String::as_str)
  }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_plain_leaf() {
    let u = Url::parse("echo://;name=e").unwrap();
    assert!(u.prefixes.is_empty());
    assert_eq!(u.tag, "echo");
    assert_eq!(u.param("name"), Some("e"));
  }

  #[test]
  fn parses_prefix_chain() {
    let u = Url::parse("json+prefix+echo://host;block=1kb").unwrap();
    assert_eq!(u.prefixes, vec!["json".to_string(), "prefix".to_string()]);
    assert_eq!(u.tag, "echo");
    assert_eq!(u.host, "host");
    assert_eq!(u.param("block"), Some("1kb"));
  }

  #[test]
  fn rejects_missing_separator() {
    assert!(Url::parse("echo;name=e").is_err());
  }

  #[test]
  fn rejects_malformed_param() {
    assert!(Url::parse("echo://;name").is_err());
  }

  #[test]
  fn roundtrips_canonical_form() {
    let u = Url::parse("prefix+echo://;name=a").unwrap();
    assert_eq!(u.to_string_canonical(), "prefix+echo://;name=a");
  }
}
