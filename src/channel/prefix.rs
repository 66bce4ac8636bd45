//! The generic prefix mixin (C6): wraps one already-constructed inner
//! channel, delegates its lifecycle, and optionally transforms message
//! payloads in each direction via a [`PrefixCodec`]. `json://` (C9) is
//! built as `Prefix` plus a JSON-specific codec rather than its own
//! `ChannelImpl`; a plain structural prefix (no data transform, only
//! config grafting) uses [`IdentityCodec`].
//!
//! State propagation follows spec.md §4.6: the outer wrapper reaches
//! `Active`/`Closed` only once the inner channel does, observed by polling
//! `inner.state()` from `do_process` — the same "outer transitions once the
//! inner state machine reaches its terminal state" shape as the teacher's
//! generated `run_loop` driving a mode `Session` before transitioning its
//! `Program`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{
  ChannelBase, ChannelHandle, ChannelImpl, ChannelState, ClosePolicy, OpenPolicy, ProcessOutcome,
};
use crate::config::ConfigNode;
use crate::error::Result;
use crate::message::{Message, MessageType};

///////////////////////////////////////////////////////////////////////////////
//  traits
///////////////////////////////////////////////////////////////////////////////

/// The payload transform a concrete prefix layer contributes. `base` is the
/// *outer* (prefix's own) channel base, so a codec can consult its scheme.
pub trait PrefixCodec: Send {
  fn tag(&self) -> &str;
  fn encode(&mut self, base: &ChannelBase, message: &Message) -> Result<Vec<u8>>;
  fn decode(&mut self, base: &ChannelBase, raw: &[u8]) -> Result<Message<'static>>;
}

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// A codec that passes payloads through unchanged; used by prefixes that
/// exist only to graft config (legacy `python.*` aliasing).
pub struct IdentityCodec;

impl PrefixCodec for IdentityCodec {
  fn tag(&self) -> &str { "identity" }

  fn encode(&mut self, _base: &ChannelBase, message: &Message) -> Result<Vec<u8>> {
    Ok(message.data().to_vec())
  }

  fn decode(&mut self, _base: &ChannelBase, raw: &[u8]) -> Result<Message<'static>> {
    Ok(Message::new(0, raw).into_owned())
  }
}

pub struct Prefix {
  inner: ChannelHandle,
  codec: Box<dyn PrefixCodec>,
  inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Prefix {
  /// Wrap `inner`, transforming payloads through `codec`. Subscribes on
  /// `inner` immediately so no inbound data is missed between construction
  /// and the prefix's own `open()`.
  pub fn new(name: impl Into<String>, mut inner: ChannelHandle, codec: Box<dyn PrefixCodec>) -> ChannelHandle {
    let inbound = Arc::new(Mutex::new(VecDeque::new()));
    let inbound_cb = Arc::clone(&inbound);
    inner.subscribe(Box::new(move |_name, msg| {
      if msg.kind() == MessageType::Data {
        inbound_cb.lock().push_back(msg.data().to_vec());
      }
    }));
    ChannelHandle::new(ChannelBase::new(name), Box::new(Prefix { inner, codec, inbound }))
  }

  pub fn inner(&self) -> &ChannelHandle { &self.inner }
  pub fn inner_mut(&mut self) -> &mut ChannelHandle { &mut self.inner }

  /// Mirror the inner channel's `info.*` under both the outer `info.*` and
  /// the legacy `python.*` alias (spec.md's carried-over compatibility
  /// requirement for clients still reading the old config path).
  fn graft_info(&self, base: &mut ChannelBase) {
    let info = self.inner.config().sub("info").map(|v| v.as_dict());
    let Some(info) = info else { return };
    for (key, value) in &info {
      base.config_mut().set(&format!("info.{key}"), value.clone());
      base.config_mut().set(&format!("python.{key}"), value.clone());
    }
  }
}

impl ChannelImpl for Prefix {
  // Always `Manual`/`Long`: the outer state only ever moves once
  // `do_process` observes the inner channel's state, whether or not the
  // inner transition itself happened synchronously inside `do_open`.
  fn open_policy(&self) -> OpenPolicy { OpenPolicy::Manual }
  fn close_policy(&self) -> ClosePolicy { ClosePolicy::Long }

  fn do_open(&mut self, base: &mut ChannelBase, params: &ConfigNode) -> Result<()> {
    self.inner.open("", Some(params))?;
    self.graft_info(base);
    Ok(())
  }

  fn do_close(&mut self, _base: &mut ChannelBase) -> Result<()> {
    self.inner.close()
  }

  fn do_process(&mut self, base: &mut ChannelBase) -> Result<ProcessOutcome> {
    self.inner.process()?;
    self.graft_info(base);
    loop {
      let raw = self.inbound.lock().pop_front();
      let Some(raw) = raw else { break };
      let msg = self.codec.decode(base, &raw)?;
      ChannelHandle::deliver_received(base, &msg);
    }
    Ok(match (base.state(), self.inner.state()) {
      (ChannelState::Opening, ChannelState::Active) => ProcessOutcome::Activated,
      (ChannelState::Closing, ChannelState::Closed) => ProcessOutcome::Closed,
      _ => ProcessOutcome::Pending,
    })
  }

  fn do_post(&mut self, base: &mut ChannelBase, message: &Message) -> Result<()> {
    let encoded = self.codec.encode(base, message)?;
    let wire = Message::new(message.msgid(), &encoded)
      .with_seq(message.seq())
      .with_addr(message.addr())
      .with_time(message.time());
    self.inner.post(&wire)
  }

  fn as_any(&self) -> &dyn std::any::Any { self }
  fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////
