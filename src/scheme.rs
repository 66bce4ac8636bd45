//! Parsed message schema handle (C3).
//!
//! A `Scheme` is built once, from `yamls://<literal yaml>` or
//! `yaml://<path>`, and shared read-only afterwards — no writers after
//! construction, concurrent readers are always safe.

use std::sync::Arc;

///////////////////////////////////////////////////////////////////////////////
//  enums
///////////////////////////////////////////////////////////////////////////////

/// Field wire types, per §6.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldType {
  Int8, Int16, Int32, Int64,
  Uint8, Uint16, Uint32,
  Double,
  /// `byte<N>`.
  Bytes(u32),
  String,
  /// `<T>[<N>]`.
  Array(Box<FieldType>, u32),
  /// `*<T>`.
  List(Box<FieldType>),
  /// A nested message, referenced by name.
  Message(String),
  /// An enum over an integer base type.
  Enum { base: Box<FieldType>, values: Vec<(String, i64)> },
}

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// One field of a [`SchemeMessage`].
#[derive(Clone, Debug)]
pub struct Field {
  pub name: String,
  pub ty: FieldType,
  pub options: FieldOptions,
}

/// `options.*` sub-keys relevant to this crate's consumers (the JSON
/// prefix, C9). Unknown options are preserved verbatim but otherwise
/// ignored.
#[derive(Clone, Debug, Default)]
pub struct FieldOptions {
  /// `options.type: string` on a `byte<N>` field.
  pub type_string: bool,
  /// `options.json.enum-as-int: yes`.
  pub json_enum_as_int: bool,
  /// `options.json.inline-message: yes`.
  pub json_inline_message: bool,
  /// `options.json.expected-list-size: N`.
  pub json_expected_list_size: Option<usize>,
}

/// One message definition.
#[derive(Clone, Debug)]
pub struct SchemeMessage {
  pub name: String,
  pub msgid: i32,
  pub fields: Vec<Field>,
  /// `options.json.message-as-list: yes`.
  pub json_message_as_list: bool,
}

/// An immutable, shareable parsed scheme.
#[derive(Clone, Debug)]
pub struct Scheme {
  inner: Arc<Vec<SchemeMessage>>,
}

///////////////////////////////////////////////////////////////////////////////
//  yaml wire shapes (serde_yaml only, not exposed publicly)
///////////////////////////////////////////////////////////////////////////////

#[derive(serde::Deserialize)]
struct YamlMessage {
  name: String,
  id: i32,
  fields: Vec<YamlField>,
  #[serde(default)]
  options: YamlOptions,
  #[serde(default)]
  enums: Vec<YamlEnum>,
}

/// A named enum declaration, scoped to the message that carries it; a
/// field's `type` referencing this name resolves to [`FieldType::Enum`].
#[derive(serde::Deserialize)]
struct YamlEnum {
  name: String,
  #[serde(rename = "type")]
  base: String,
  values: indexmap::IndexMap<String, i64>,
}

#[derive(serde::Deserialize)]
struct YamlField {
  name: String,
  #[serde(rename = "type")]
  ty: String,
  #[serde(default)]
  options: YamlFieldOptions,
}

#[derive(serde::Deserialize, Default)]
struct YamlOptions {
  #[serde(default)]
  json: YamlJsonMessageOptions,
}

#[derive(serde::Deserialize, Default)]
struct YamlJsonMessageOptions {
  #[serde(rename = "message-as-list", default)]
  message_as_list: bool,
}

#[derive(serde::Deserialize, Default)]
struct YamlFieldOptions {
  #[serde(rename = "type", default)]
  type_string: Option<String>,
  #[serde(default)]
  json: YamlJsonFieldOptions,
}

#[derive(serde::Deserialize, Default)]
struct YamlJsonFieldOptions {
  #[serde(rename = "enum-as-int", default)]
  enum_as_int: bool,
  #[serde(rename = "inline-message", default)]
  inline_message: bool,
  #[serde(rename = "expected-list-size", default)]
  expected_list_size: Option<usize>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Scheme {
  /// Parse `yamls://<literal yaml>` or `yaml://<path>`.
  pub fn parse(source: &str) -> Result<Scheme, String> {
    if let Some(body) = source.strip_prefix("yamls://") {
      Self::from_yaml_str(body)
    } else if let Some(path) = source.strip_prefix("yaml://") {
      let body = std::fs::read_to_string(path)
        .map_err(|e| format!("reading scheme file {path:?}: {e}"))?;
      Self::from_yaml_str(&body)
    } else {
      Err(format!("unrecognized scheme source tag in {source:?}"))
    }
  }

  pub fn from_yaml_str(body: &str) -> Result<Scheme, String> {
    let raw: Vec<YamlMessage> =
      serde_yaml::from_str(body).map_err(|e| format!("parsing scheme yaml: {e}"))?;
    let messages = raw.into_iter().map(convert_message).collect::<Result<Vec<_>, _>>()?;
    Ok(Scheme { inner: Arc::new(messages) })
  }

  pub fn messages(&self) -> &[SchemeMessage] {
    &self.inner
  }

  pub fn message(&self, name: &str) -> Option<&SchemeMessage> {
    self.inner.iter().find(|m| m.name == name)
  }

  pub fn message_by_id(&self, msgid: i32) -> Option<&SchemeMessage> {
    self.inner.iter().find(|m| m.msgid == msgid)
  }
}

impl SchemeMessage {
  pub fn field(&self, name: &str) -> Option<&Field> {
    self.fields.iter().find(|f| f.name == name)
  }
}

fn convert_message(raw: YamlMessage) -> Result<SchemeMessage, String> {
  let mut enums = std::collections::HashMap::new();
  for e in &raw.enums {
    let base = parse_field_type(&e.base)?;
    let values: Vec<(String, i64)> = e.values.iter().map(|(k, v)| (k.clone(), *v)).collect();
    enums.insert(e.name.clone(), (base, values));
  }
  let fields = raw
    .fields
    .into_iter()
    .map(|f| convert_field(f, &enums))
    .collect::<Result<Vec<_>, _>>()?;
  Ok(SchemeMessage {
    name: raw.name,
    msgid: raw.id,
    fields,
    json_message_as_list: raw.options.json.message_as_list,
  })
}

fn convert_field(
  raw: YamlField,
  enums: &std::collections::HashMap<String, (FieldType, Vec<(String, i64)>)>,
) -> Result<Field, String> {
  let ty = match enums.get(&raw.ty) {
    Some((base, values)) => FieldType::Enum { base: Box::new(base.clone()), values: values.clone() },
    None => parse_field_type(&raw.ty)?,
  };
  let options = FieldOptions {
    type_string: raw.options.type_string.as_deref() == Some("string"),
    json_enum_as_int: raw.options.json.enum_as_int,
    json_inline_message: raw.options.json.inline_message,
    json_expected_list_size: raw.options.json.expected_list_size,
  };
  Ok(Field { name: raw.name, ty, options })
}

fn parse_field_type(s: &str) -> Result<FieldType, String> {
  if let Some(inner) = s.strip_prefix('*') {
    return Ok(FieldType::List(Box::new(parse_field_type(inner)?)));
  }
  if let Some((base, n)) = s.strip_suffix(']').and_then(|s| s.split_once('[')) {
    let n: u32 = n.parse().map_err(|_| format!("bad array size in {s:?}"))?;
    return Ok(FieldType::Array(Box::new(parse_field_type(base)?), n));
  }
  if let Some(n) = s.strip_prefix("byte") {
    let n: u32 = n.parse().map_err(|_| format!("bad byte size in {s:?}"))?;
    return Ok(FieldType::Bytes(n));
  }
  Ok(match s {
    "int8" => FieldType::Int8,
    "int16" => FieldType::Int16,
    "int32" => FieldType::Int32,
    "int64" => FieldType::Int64,
    "uint8" => FieldType::Uint8,
    "uint16" => FieldType::Uint16,
    "uint32" => FieldType::Uint32,
    "double" => FieldType::Double,
    "string" => FieldType::String,
    other => FieldType::Message(other.to_string()),
  })
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  const YAML: &str = r#"
- name: Ping
  id: 1
  fields:
    - {name: seq, type: int32}
    - {name: text, type: string}
"#;

  #[test]
  fn parses_yamls_literal() {
    let scheme = Scheme::parse(&format!("yamls://{YAML}")).unwrap();
    let msg = scheme.message("Ping").unwrap();
    assert_eq!(msg.msgid, 1);
    assert_eq!(msg.fields.len(), 2);
    assert_eq!(msg.field("seq").unwrap().ty, FieldType::Int32);
  }

  #[test]
  fn parses_list_and_array_types() {
    assert_eq!(parse_field_type("*int32").unwrap(), FieldType::List(Box::new(FieldType::Int32)));
    assert_eq!(
      parse_field_type("int32[4]").unwrap(),
      FieldType::Array(Box::new(FieldType::Int32), 4)
    );
    assert_eq!(parse_field_type("byte16").unwrap(), FieldType::Bytes(16));
  }

  #[test]
  fn rejects_unrecognized_source_tag() {
    assert!(Scheme::parse("http://example").is_err());
  }

  #[test]
  fn enum_field_resolves_to_named_values() {
    let yaml = r#"
- name: Ping
  id: 1
  enums:
    - {name: Kind, type: int8, values: {Request: 0, Reply: 1}}
  fields:
    - {name: kind, type: Kind}
"#;
    let scheme = Scheme::parse(&format!("yamls://{yaml}")).unwrap();
    let msg = scheme.message("Ping").unwrap();
    let field = msg.field("kind").unwrap();
    match &field.ty {
      FieldType::Enum { base, values } => {
        assert_eq!(**base, FieldType::Int8);
        assert_eq!(values.iter().find(|(n, _)| n == "Reply").map(|(_, v)| *v), Some(1));
      }
      other => panic!("expected Enum, got {other:?}"),
    }
  }
}
