//! The JSON prefix codec (C9): translates between each message's scheme
//! definition and its JSON wire form. Built as a [`PrefixCodec`] plugged
//! into the generic [`crate::channel::prefix::Prefix`] mixin (C6) rather
//! than its own `ChannelImpl` — the wrapping mechanics (state propagation,
//! config grafting) are identical to any other prefix.
//!
//! Wire rules, grounded in `original_source/python/test/test_json.py`:
//! - every encoded message carries `_tll_name` and `_tll_seq`, except under
//!   `options.json.message-as-list`, where the message is a JSON array
//!   `[name, seq, field0, field1, ...]` in scheme field order instead;
//!   decode also accepts the legacy `_ce_name`/`_ce_seq` keys in object
//!   wire form.
//! - enum fields default to their variant *name* on the wire; the internal
//!   (pre-encode / post-decode) representation always uses the scheme's
//!   integer base type. `options.json.enum-as-int` keeps the wire integer
//!   too.
//! - `options.json.inline-message` on a nested-message field flattens that
//!   field's own keys into the parent object instead of nesting them under
//!   the field's name (object wire form only — `message-as-list` keeps
//!   every field, inlined or not, in its own positional slot).
//! - `options.json.expected-list-size` caps a `*T` field's JSON array
//!   length; exceeding it is a decode/encode error, not silent truncation.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::channel::prefix::PrefixCodec;
use crate::channel::ChannelBase;
use crate::error::{ProtocolError, Result};
use crate::message::Message;
use crate::scheme::{Field, FieldType, SchemeMessage};

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

#[derive(Default)]
pub struct JsonCodec;

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl JsonCodec {
  pub const TAG: &'static str = "json";

  fn lookup_by_id<'a>(base: &'a ChannelBase, msgid: i32) -> Result<&'a SchemeMessage> {
    base
      .scheme()
      .and_then(|s| s.message_by_id(msgid))
      .ok_or_else(|| ProtocolError::UnknownMessage(msgid.to_string()).into())
  }

  fn lookup_by_name<'a>(base: &'a ChannelBase, name: &str) -> Result<&'a SchemeMessage> {
    base
      .scheme()
      .and_then(|s| s.message(name))
      .ok_or_else(|| ProtocolError::UnknownMessage(name.to_string()).into())
  }
}

impl PrefixCodec for JsonCodec {
  fn tag(&self) -> &str { JsonCodec::TAG }

  fn encode(&mut self, base: &ChannelBase, message: &Message) -> Result<Vec<u8>> {
    let scheme_msg = Self::lookup_by_id(base, message.msgid())?;
    let parsed: Value = serde_json::from_slice(message.data()).map_err(ProtocolError::JsonDecode)?;
    let fields = parsed
      .as_object()
      .ok_or_else(|| ProtocolError::TypeMismatch("message body".into()))?;
    validate_list_sizes(scheme_msg, fields)?;

    let wire = if scheme_msg.json_message_as_list {
      let mut arr = Vec::with_capacity(scheme_msg.fields.len() + 2);
      arr.push(Value::String(scheme_msg.name.clone()));
      arr.push(Value::Number(message.seq().into()));
      for field in &scheme_msg.fields {
        let value = fields.get(&field.name).cloned().unwrap_or(Value::Null);
        arr.push(enum_to_wire(field, &value)?);
      }
      Value::Array(arr)
    } else {
      let mut obj = Map::new();
      obj.insert("_tll_name".into(), Value::String(scheme_msg.name.clone()));
      obj.insert("_tll_seq".into(), Value::Number(message.seq().into()));
      for field in &scheme_msg.fields {
        let Some(value) = fields.get(&field.name) else { continue };
        if field.options.json_inline_message {
          if let (FieldType::Message(inner_name), Some(inner_obj)) = (&field.ty, value.as_object()) {
            let inner_msg = Self::lookup_by_name(base, inner_name)?;
            for inner_field in &inner_msg.fields {
              if let Some(v) = inner_obj.get(&inner_field.name) {
                obj.insert(inner_field.name.clone(), enum_to_wire(inner_field, v)?);
              }
            }
            continue;
          }
        }
        obj.insert(field.name.clone(), enum_to_wire(field, value)?);
      }
      Value::Object(obj)
    };
    serde_json::to_vec(&wire).map_err(|e| ProtocolError::JsonDecode(e).into())
  }

  fn decode(&mut self, base: &ChannelBase, raw: &[u8]) -> Result<Message<'static>> {
    let value: Value = serde_json::from_slice(raw).map_err(ProtocolError::JsonDecode)?;
    let (scheme_msg, seq, wire_fields): (&SchemeMessage, i64, IndexMap<String, Value>) = match &value {
      Value::Array(arr) => {
        let name = arr
          .first()
          .and_then(Value::as_str)
          .ok_or_else(|| ProtocolError::TypeMismatch("_tll_name".into()))?;
        let scheme_msg = Self::lookup_by_name(base, name)?;
        let seq = arr.get(1).and_then(Value::as_i64).unwrap_or(0);
        let mut wire = IndexMap::new();
        for (i, field) in scheme_msg.fields.iter().enumerate() {
          if let Some(v) = arr.get(i + 2) {
            wire.insert(field.name.clone(), v.clone());
          }
        }
        (scheme_msg, seq, wire)
      }
      Value::Object(obj) => {
        let name = obj
          .get("_tll_name")
          .or_else(|| obj.get("_ce_name"))
          .and_then(Value::as_str)
          .ok_or_else(|| ProtocolError::TypeMismatch("_tll_name".into()))?;
        let scheme_msg = Self::lookup_by_name(base, name)?;
        let seq = obj.get("_tll_seq").or_else(|| obj.get("_ce_seq")).and_then(Value::as_i64).unwrap_or(0);
        let wire = obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        (scheme_msg, seq, wire)
      }
      _ => return Err(ProtocolError::TypeMismatch("message envelope".into()).into()),
    };

    let mut fields = Map::new();
    for field in &scheme_msg.fields {
      if field.options.json_inline_message {
        if let FieldType::Message(inner_name) = &field.ty {
          let inner_msg = Self::lookup_by_name(base, inner_name)?;
          let mut inner_obj = Map::new();
          for inner_field in &inner_msg.fields {
            if let Some(v) = wire_fields.get(&inner_field.name) {
              inner_obj.insert(inner_field.name.clone(), enum_from_wire(inner_field, v)?);
            }
          }
          fields.insert(field.name.clone(), Value::Object(inner_obj));
          continue;
        }
      }
      if let Some(v) = wire_fields.get(&field.name) {
        fields.insert(field.name.clone(), enum_from_wire(field, v)?);
      }
    }
    validate_list_sizes(scheme_msg, &fields)?;

    let body = serde_json::to_vec(&Value::Object(fields)).map_err(ProtocolError::JsonDecode)?;
    Ok(Message::new(scheme_msg.msgid, &body).with_seq(seq).into_owned())
  }
}

///////////////////////////////////////////////////////////////////////////////
//  free functions
///////////////////////////////////////////////////////////////////////////////

/// Default wire form is the variant *name*; `enum-as-int` keeps the scheme's
/// integer representation on the wire unchanged.
fn enum_to_wire(field: &Field, value: &Value) -> Result<Value> {
  let FieldType::Enum { values, .. } = &field.ty else { return Ok(value.clone()) };
  if field.options.json_enum_as_int {
    return Ok(value.clone());
  }
  let n = value.as_i64().ok_or_else(|| ProtocolError::TypeMismatch(field.name.clone()))?;
  values
    .iter()
    .find(|(_, v)| *v == n)
    .map(|(name, _)| Value::String(name.clone()))
    .ok_or_else(|| ProtocolError::TypeMismatch(field.name.clone()).into())
}

/// Inverse of [`enum_to_wire`]: the internal representation always stores
/// an enum as the scheme's integer base type.
fn enum_from_wire(field: &Field, value: &Value) -> Result<Value> {
  let FieldType::Enum { values, .. } = &field.ty else { return Ok(value.clone()) };
  if let Some(s) = value.as_str() {
    return values
      .iter()
      .find(|(name, _)| name == s)
      .map(|(_, v)| Value::Number((*v).into()))
      .ok_or_else(|| ProtocolError::TypeMismatch(field.name.clone()).into());
  }
  Ok(value.clone())
}

fn validate_list_sizes(scheme_msg: &SchemeMessage, fields: &Map<String, Value>) -> Result<()> {
  for field in &scheme_msg.fields {
    let FieldType::List(_) = &field.ty else { continue };
    let Some(limit) = field.options.json_expected_list_size else { continue };
    if let Some(Value::Array(arr)) = fields.get(&field.name) {
      if arr.len() > limit {
        return Err(
          ProtocolError::ListTooLong { field: field.name.clone(), got: arr.len(), expected: limit }.into(),
        );
      }
    }
  }
  Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::ChannelBase;
  use crate::scheme::Scheme;

  const YAML: &str = r#"
- name: Ping
  id: 1
  enums:
    - {name: Kind, type: int8, values: {Request: 0, Reply: 1}}
  fields:
    - {name: seq, type: int32}
    - {name: kind, type: Kind}
"#;

  fn base_with_scheme() -> ChannelBase {
    let mut base = ChannelBase::new("j");
    base.set_scheme(Scheme::parse(&format!("yamls://{YAML}")).unwrap());
    base
  }

  #[test]
  fn object_wire_carries_tll_envelope() {
    let base = base_with_scheme();
    let mut codec = JsonCodec;
    let msg = Message::new(1, br#"{"seq":5,"kind":1}"#).with_seq(7);
    let wire = codec.encode(&base, &msg).unwrap();
    let value: Value = serde_json::from_slice(&wire).unwrap();
    assert_eq!(value["_tll_name"], "Ping");
    assert_eq!(value["_tll_seq"], 7);
    assert_eq!(value["kind"], "Reply");

    let back = codec.decode(&base, &wire).unwrap();
    assert_eq!(back.msgid(), 1);
    assert_eq!(back.seq(), 7);
    let body: Value = serde_json::from_slice(back.data()).unwrap();
    assert_eq!(body["kind"], 1);
  }

  #[test]
  fn enum_as_int_option_keeps_wire_integer() {
    let yaml = r#"
- name: Ping
  id: 1
  enums:
    - {name: Kind, type: int8, values: {Request: 0, Reply: 1}}
  fields:
    - {name: kind, type: Kind, options: {json: {enum-as-int: yes}}}
"#;
    let mut base = ChannelBase::new("j");
    base.set_scheme(Scheme::parse(&format!("yamls://{yaml}")).unwrap());
    let mut codec = JsonCodec;
    let msg = Message::new(1, br#"{"kind":1}"#);
    let wire = codec.encode(&base, &msg).unwrap();
    let value: Value = serde_json::from_slice(&wire).unwrap();
    assert_eq!(value["kind"], 1);
  }

  #[test]
  fn legacy_ce_name_alias_is_accepted_on_decode() {
    let base = base_with_scheme();
    let mut codec = JsonCodec;
    let wire = br#"{"_ce_name":"Ping","_ce_seq":9,"seq":5,"kind":2}"#;
    let back = codec.decode(&base, wire).unwrap();
    assert_eq!(back.msgid(), 1);
    assert_eq!(back.seq(), 9);
  }

  #[test]
  fn list_as_array_form_round_trips() {
    let yaml = r#"
- name: Ping
  id: 1
  fields:
    - {name: seq, type: int32}
  options: {json: {message-as-list: yes}}
"#;
    let mut base = ChannelBase::new("j");
    base.set_scheme(Scheme::parse(&format!("yamls://{yaml}")).unwrap());
    let mut codec = JsonCodec;
    let msg = Message::new(1, br#"{"seq":42}"#).with_seq(3);
    let wire = codec.encode(&base, &msg).unwrap();
    let value: Value = serde_json::from_slice(&wire).unwrap();
    assert!(value.is_array());
    assert_eq!(value[0], "Ping");
    assert_eq!(value[1], 3);
  }

  #[test]
  fn oversized_list_is_rejected() {
    let yaml = r#"
- name: Batch
  id: 2
  fields:
    - {name: items, type: "*int32", options: {json: {expected-list-size: 2}}}
"#;
    let base = {
      let mut b = ChannelBase::new("j");
      b.set_scheme(Scheme::parse(&format!("yamls://{yaml}")).unwrap());
      b
    };
    let mut codec = JsonCodec;
    let msg = Message::new(2, br#"{"items":[1,2,3]}"#);
    assert!(codec.encode(&base, &msg).is_err());
  }
}
