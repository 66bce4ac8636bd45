//! The message type carried by every channel.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

///////////////////////////////////////////////////////////////////////////////
//  enums
///////////////////////////////////////////////////////////////////////////////

/// Discriminates the purpose of a [`Message`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display, strum::EnumString)]
pub enum MessageType {
  /// Carries payload data.
  Data,
  /// Out-of-band signalling.
  Control,
  /// Announces a channel state transition.
  State,
  /// Announces a child channel add/remove.
  Channel,
}

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// An immutable data + metadata carrier.
///
/// A `Message` may borrow its `data` from a caller-owned buffer; such a view
/// must not be retained past the call that delivered it. Use
/// [`Message::into_owned`] to take an explicit, independently-owned copy.
#[derive(Clone, Debug)]
pub struct Message<'a> {
  kind: MessageType,
  msgid: i32,
  seq: i64,
  addr: u64,
  time: i64,
  data: Cow<'a, [u8]>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl<'a> Message<'a> {
  /// Construct a `Data` message with `seq=0`, `addr=0`, and `time` set to
  /// now, borrowing `data`.
  pub fn new(msgid: i32, data: &'a [u8]) -> Self {
    Message {
      kind: MessageType::Data,
      msgid,
      seq: 0,
      addr: 0,
      time: now_ns(),
      data: Cow::Borrowed(data),
    }
  }

  pub fn with_kind(mut self, kind: MessageType) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_seq(mut self, seq: i64) -> Self {
    self.seq = seq;
    self
  }

  pub fn with_addr(mut self, addr: u64) -> Self {
    self.addr = addr;
    self
  }

  pub fn with_time(mut self, time: i64) -> Self {
    self.time = time;
    self
  }

  pub fn kind(&self) -> MessageType { self.kind }
  pub fn msgid(&self) -> i32 { self.msgid }
  pub fn seq(&self) -> i64 { self.seq }
  pub fn addr(&self) -> u64 { self.addr }
  pub fn time(&self) -> i64 { self.time }
  pub fn data(&self) -> &[u8] { &self.data }

  /// Produce a fully-owned copy, safe to retain beyond the current call.
  pub fn into_owned(self) -> Message<'static> {
    Message {
      kind: self.kind,
      msgid: self.msgid,
      seq: self.seq,
      addr: self.addr,
      time: self.time,
      data: Cow::Owned(self.data.into_owned()),
    }
  }

  /// Build a synthetic `State` message announcing a transition, carrying
  /// no payload.
  pub fn state(msgid: i32, seq: i64) -> Message<'static> {
    Message {
      kind: MessageType::State,
      msgid,
      seq,
      addr: 0,
      time: now_ns(),
      data: Cow::Owned(Vec::new()),
    }
  }

  /// Build a synthetic `Channel` message announcing `name`'s add
  /// (`added = true`) or removal (`added = false`) from its parent's child
  /// registry, carrying the child's full name as its payload.
  pub fn channel_event(name: &str, added: bool) -> Message<'static> {
    Message {
      kind: MessageType::Channel,
      msgid: if added { 1 } else { 0 },
      seq: 0,
      addr: 0,
      time: now_ns(),
      data: Cow::Owned(name.as_bytes().to_vec()),
    }
  }
}

fn now_ns() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos() as i64)
    .unwrap_or(0)
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn borrowed_view_copies_explicitly() {
    let buf = vec![1u8, 2, 3];
    let m = Message::new(1, &buf).with_seq(100);
    let owned = m.clone().into_owned();
    assert_eq!(owned.data(), &[1, 2, 3]);
    assert_eq!(owned.seq(), 100);
  }

  #[test]
  fn state_message_has_no_payload() {
    let m = Message::state(0, 1);
    assert_eq!(m.kind(), MessageType::State);
    assert!(m.data().is_empty());
  }

  #[test]
  fn channel_event_carries_name_and_add_remove_flag() {
    let added = Message::channel_event("p/child", true);
    assert_eq!(added.kind(), MessageType::Channel);
    assert_eq!(added.data(), b"p/child");
    assert_eq!(added.msgid(), 1);

    let removed = Message::channel_event("p/child", false);
    assert_eq!(removed.kind(), MessageType::Channel);
    assert_eq!(removed.msgid(), 0);
  }
}
