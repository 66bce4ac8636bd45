//! The channel lifecycle, state machine, and child-ownership model (C5).
//!
//! A [`ChannelHandle`] is a generic wrapper (spec.md DESIGN NOTES §9: "each
//! channel type is a value implementing the [`ChannelImpl`] trait") around
//! whatever leaf, prefix, or logic behavior a factory constructed; the
//! wrapper itself owns the state machine, the child registry, the
//! subscriber list, and the stat block, so every concrete channel gets
//! those for free and only implements the parts that differ.

use std::sync::Arc;

use colored::Colorize;
use parking_lot::Mutex;

use crate::config::ConfigNode;
use crate::error::{ArgumentError, ConstructError, Error, Result, TransportError};
use crate::message::Message;
use crate::scheme::Scheme;
use crate::stat::StatBlock;

pub mod direct;
pub mod echo;
pub mod file;
pub mod json;
pub mod logic;
pub mod mem;
pub mod prefix;

///////////////////////////////////////////////////////////////////////////////
//  type aliases
///////////////////////////////////////////////////////////////////////////////

/// Shared ownership handle to a channel. `Arc` gives exactly the sharing
/// spec.md §3 asks for: the context holds a clone for top-level and orphan
/// channels, a parent holds a clone for each non-orphan child, and neither
/// side needs to know how many other clones exist.
pub type ChannelRef = Arc<Mutex<ChannelHandle>>;

/// `Fn(channel_name, message)`; receives `Data`/`Control`/`State` messages
/// in subscription order.
pub type Callback = Box<dyn FnMut(&str, &Message) + Send>;

///////////////////////////////////////////////////////////////////////////////
//  enums — state machine
///////////////////////////////////////////////////////////////////////////////

/// The channel lifecycle state (§3, §4.5). `Destroy` is deliberately not a
/// member: destroying a channel removes it from the context rather than
/// transitioning this enum (DESIGN NOTES §9, "Open ambiguity").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum ChannelState {
  Closed,
  Opening,
  Active,
  Closing,
  Error,
}

/// Named transition events, each legal only from specific source states —
/// the same transition-table discipline the teacher's state machines use
/// (`process::inner::Inner`, `session::Session`), applied by hand here
/// because these channels are `dyn` trait objects assembled at runtime
/// rather than one concrete type per state machine (see DESIGN.md).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChannelEvent {
  Open,
  OpenSync,
  Activate,
  Close,
  CloseSync,
  Closed,
  Fault,
}

impl ChannelState {
  /// Apply `event`, returning the new state or an error if the transition
  /// is not legal from the current state.
  pub fn apply(self, event: ChannelEvent) -> Result<ChannelState> {
    use ChannelEvent::*;
    use ChannelState::*;
    let next = match (self, event) {
      (Closed, Open) => Opening,
      (Closed, OpenSync) => Active,
      (Opening, Activate) => Active,
      (Active, Close) => Closing,
      (Active, CloseSync) => Closed,
      (Closing, Closed) => Closed,
      (_, Fault) => Error,
      (Error, Close) | (Error, CloseSync) => Closed,
      (from, ev) => {
        return Err(Error::InvalidState(format!("event {ev:?} is not legal from state {from:?}")));
      }
    };
    Ok(next)
  }
}

///////////////////////////////////////////////////////////////////////////////
//  enums — policies
///////////////////////////////////////////////////////////////////////////////

/// `Closed -> Active` happens synchronously inside `open()` (`Auto`), or
/// `open()` only reaches `Opening` and the implementation completes later
/// via `process()` (`Manual`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenPolicy {
  Auto,
  Manual,
}

/// `close()` is synchronous (`Short`), or enters `Closing` and is drained
/// later by `process()` (`Long`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClosePolicy {
  Short,
  Long,
}

/// Whether a channel accepts exactly one child or an arbitrary number.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChildPolicy {
  One,
  Many,
}

/// Whether `post` is accepted in a given non-`Active` state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PostPolicy {
  Enable,
  Disable,
}

/// What a leaf/prefix/logic implementation's `do_process` accomplished
/// this call; the wrapper uses this to drive the shared state machine so
/// the transition point stays in one place.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
  /// Nothing state-relevant happened.
  Pending,
  /// `Opening -> Active` may now happen.
  Activated,
  /// `Closing -> Closed` may now happen.
  Closed,
}

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

struct ChildSlot {
  suffix: String,
  /// Full name as it appears in the context's table: `"{parent}/{suffix}"`
  /// for a non-orphan child, or the child's own pre-existing name for an
  /// orphan (orphans are never reparented, per `original_source/python/
  /// test/test_channel.py`'s `assert [x.name for x in c.children] ==
  /// ['echo/child', 'orphan']`).
  name: String,
  channel: ChannelRef,
  orphan: bool,
}

struct Subscriber {
  id: u64,
  callback: Callback,
}

/// The shared, implementation-independent part of a channel: its name,
/// config tree, children, subscribers, and stats. Concrete behavior lives
/// in a [`ChannelImpl`]; the generic [`ChannelHandle`] drives both.
pub struct ChannelBase {
  name: String,
  state: ChannelState,
  config: ConfigNode,
  scheme: Option<Scheme>,
  scheme_control: Option<Scheme>,
  children: Vec<ChildSlot>,
  subscribers: Vec<Subscriber>,
  next_subscriber_id: u64,
  stat: Option<Arc<StatBlock>>,
  /// Construction-time open() defaults, seeded by a factory from the URL
  /// that built this channel (e.g. `file://`'s `host`/`dir`/`block`) so a
  /// later bare `open("", None)` sees the same config a caller who wrote
  /// those keys directly into `params` would. Lowest precedence in
  /// `ChannelHandle::open`'s merge: `params` and `overrides` both win.
  open_defaults: ConfigNode,
}

///////////////////////////////////////////////////////////////////////////////
//  traits
///////////////////////////////////////////////////////////////////////////////

/// What a concrete channel type (leaf, prefix, or logic) implements; the
/// wrapper in [`ChannelHandle`] supplies the rest (state machine, child
/// registry, callback fan-out, stats).
pub trait ChannelImpl: Send {
  fn open_policy(&self) -> OpenPolicy { OpenPolicy::Auto }
  fn close_policy(&self) -> ClosePolicy { ClosePolicy::Short }
  fn child_policy(&self) -> ChildPolicy { ChildPolicy::Many }

  /// Whether `post` is accepted while the channel is in `state` (only ever
  /// queried for non-`Active` states; `Active` is always `Enable` at the
  /// wrapper level unless this is overridden to say otherwise).
  fn post_policy(&self, state: ChannelState) -> PostPolicy {
    match state {
      ChannelState::Active => PostPolicy::Enable,
      _ => PostPolicy::Disable,
    }
  }

  /// Begin (or, under `Auto`, complete) opening. `params` is the merged,
  /// normalized open configuration. Any `info.*`/other config keys written
  /// here are visible immediately on return, before the wrapper commits
  /// the `Active` transition (spec.md §4.9 Open Question).
  fn do_open(&mut self, base: &mut ChannelBase, params: &ConfigNode) -> Result<()>;

  /// Begin (or, under `Short`, complete) closing.
  fn do_close(&mut self, base: &mut ChannelBase) -> Result<()> {
    let _ = base;
    Ok(())
  }

  /// Drive pending work; called at least once per loop iteration while
  /// `Opening`, `Closing`, or `Active`.
  fn do_process(&mut self, base: &mut ChannelBase) -> Result<ProcessOutcome> {
    let _ = base;
    Ok(ProcessOutcome::Pending)
  }

  /// Accept one outbound message.
  fn do_post(&mut self, base: &mut ChannelBase, message: &Message) -> Result<()>;

  fn as_any(&self) -> &dyn std::any::Any;
  fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

///////////////////////////////////////////////////////////////////////////////
//  impls — ChannelBase
///////////////////////////////////////////////////////////////////////////////

impl ChannelBase {
  pub fn new(name: impl Into<String>) -> Self {
    let mut config = ConfigNode::new();
    config.set("state", ChannelState::Closed.to_string());
    ChannelBase {
      name: name.into(),
      state: ChannelState::Closed,
      config,
      scheme: None,
      scheme_control: None,
      children: Vec::new(),
      subscribers: Vec::new(),
      next_subscriber_id: 0,
      stat: None,
      open_defaults: ConfigNode::new(),
    }
  }

  pub fn name(&self) -> &str { &self.name }
  pub fn state(&self) -> ChannelState { self.state }
  pub fn config(&self) -> &ConfigNode { &self.config }
  pub fn config_mut(&mut self) -> &mut ConfigNode { &mut self.config }

  /// Write access to the construction-time open() defaults; a
  /// [`crate::context::ChannelFactory`] populates this from the URL it was
  /// given before the first `open()` call.
  pub fn open_defaults_mut(&mut self) -> &mut ConfigNode { &mut self.open_defaults }

  /// Commit a state transition and mirror it into `config["state"]` in the
  /// same step, so `config.get("state", "")` never lags the accessor
  /// (spec.md §8 invariant 1).
  fn set_state(&mut self, state: ChannelState) {
    self.state = state;
    self.config.set("state", state.to_string());
  }
  pub fn scheme(&self) -> Option<&Scheme> { self.scheme.as_ref() }
  pub fn set_scheme(&mut self, scheme: Scheme) { self.scheme = Some(scheme); }
  pub fn scheme_control(&self) -> Option<&Scheme> { self.scheme_control.as_ref() }
  pub fn set_scheme_control(&mut self, scheme: Scheme) { self.scheme_control = Some(scheme); }
  pub fn stat(&self) -> Option<&Arc<StatBlock>> { self.stat.as_ref() }

  pub fn enable_stat(&mut self) -> Arc<StatBlock> {
    let block = Arc::new(StatBlock::new(self.name.clone()));
    self.stat = Some(Arc::clone(&block));
    block
  }

  /// Names of non-orphan children, in registration order.
  pub fn child_names(&self) -> Vec<String> {
    self.children.iter().filter(|c| !c.orphan).map(|c| c.suffix.clone()).collect()
  }

  pub fn child(&self, suffix: &str) -> Option<ChannelRef> {
    self.children.iter().find(|c| c.suffix == suffix).map(|c| Arc::clone(&c.channel))
  }

  /// Register `child` under this channel. If `orphan` is true it still
  /// lives in the context's name table under its own name (added there by
  /// the caller, see [`crate::context::Context::add_child`]) but is
  /// excluded from [`ChannelBase::child_names`].
  pub fn child_add(&mut self, suffix: impl Into<String>, child: ChannelRef, orphan: bool) {
    let suffix = suffix.into();
    let name = if orphan {
      child.lock().name().to_string()
    } else {
      format!("{}/{}", self.name, suffix)
    };
    self.children.push(ChildSlot { suffix, name: name.clone(), channel: child, orphan });
    self.deliver(&Message::channel_event(&name, true));
  }

  /// Full names of every child, orphan or not, in registration order
  /// (spec.md S1: `children == ['e/child', 'orphan']`).
  pub fn children(&self) -> Vec<String> {
    self.children.iter().map(|c| c.name.clone()).collect()
  }

  pub fn child_del(&mut self, suffix: &str) -> Option<ChannelRef> {
    let idx = self.children.iter().position(|c| c.suffix == suffix)?;
    let slot = self.children.remove(idx);
    self.deliver(&Message::channel_event(&slot.name, false));
    Some(slot.channel)
  }

  pub fn all_children(&self) -> impl Iterator<Item = &ChannelRef> {
    self.children.iter().map(|c| &c.channel)
  }

  pub fn non_orphan_children(&self) -> impl Iterator<Item = &ChannelRef> {
    self.children.iter().filter(|c| !c.orphan).map(|c| &c.channel)
  }

  /// Subscribe to Data/Control/State messages; returns an id usable with
  /// [`ChannelBase::unsubscribe`].
  pub fn subscribe(&mut self, callback: Callback) -> u64 {
    let id = self.next_subscriber_id;
    self.next_subscriber_id += 1;
    self.subscribers.push(Subscriber { id, callback });
    id
  }

  pub fn unsubscribe(&mut self, id: u64) {
    self.subscribers.retain(|s| s.id != id);
  }

  /// Deliver `message` to every subscriber registered at the start of this
  /// call, in subscription order. A subscriber added reentrantly from
  /// inside a callback is structurally impossible here (delivery already
  /// holds `&mut self`), so "takes effect on the next message" is enforced
  /// by ownership rather than a snapshot copy.
  pub fn deliver(&mut self, message: &Message) {
    let n = self.subscribers.len();
    for sub in self.subscribers.iter_mut().take(n) {
      (sub.callback)(&self.name, message);
    }
  }

  fn deliver_state(&mut self) {
    let msg = Message::state(0, 0);
    self.deliver(&msg);
  }
}

///////////////////////////////////////////////////////////////////////////////
//  structs — ChannelHandle
///////////////////////////////////////////////////////////////////////////////

/// A fully assembled channel: lifecycle + child registry + callbacks
/// (`ChannelBase`) driving a concrete behavior (`ChannelImpl`).
pub struct ChannelHandle {
  base: ChannelBase,
  imp: Box<dyn ChannelImpl>,
}

impl ChannelHandle {
  pub fn new(base: ChannelBase, imp: Box<dyn ChannelImpl>) -> Self {
    ChannelHandle { base, imp }
  }

  pub fn name(&self) -> &str { self.base.name() }
  pub fn state(&self) -> ChannelState { self.base.state() }
  pub fn config(&self) -> &ConfigNode { self.base.config() }
  pub fn base(&self) -> &ChannelBase { &self.base }
  pub fn base_mut(&mut self) -> &mut ChannelBase { &mut self.base }
  pub fn child_names(&self) -> Vec<String> { self.base.child_names() }
  pub fn children(&self) -> Vec<String> { self.base.children() }
  pub fn stat(&self) -> Option<&Arc<StatBlock>> { self.base.stat() }
  pub fn subscribe(&mut self, callback: Callback) -> u64 { self.base.subscribe(callback) }
  pub fn unsubscribe(&mut self, id: u64) { self.base.unsubscribe(id) }

  pub fn is_impl<T: ChannelImpl + 'static>(&self) -> bool {
    self.imp.as_any().is::<T>()
  }

  pub fn downcast_ref<T: ChannelImpl + 'static>(&self) -> Option<&T> {
    self.imp.as_any().downcast_ref::<T>()
  }

  pub fn downcast_mut<T: ChannelImpl + 'static>(&mut self) -> Option<&mut T> {
    self.imp.as_any_mut().downcast_mut::<T>()
  }

  /// Open the channel. `params` is a `"k=v;k=v"` string, possibly empty;
  /// `overrides` is merged on top (overrides win), covering every shape
  /// spec.md §4.5/§8 invariant 2 requires to normalize identically: a bare
  /// string, a string plus overrides, or a config built directly via
  /// [`ConfigNode::set`] and passed as `overrides` with an empty `params`.
  /// Construction-time defaults ([`ChannelBase::open_defaults_mut`]) seed
  /// the merge at the lowest precedence, so a bare `open("", None)` still
  /// sees whatever a factory stashed from the constructing URL.
  pub fn open(&mut self, params: &str, overrides: Option<&ConfigNode>) -> Result<()> {
    if self.base.state != ChannelState::Closed {
      return Err(Error::InvalidState(format!(
        "open() requires state Closed, found {:?} (Error requires an explicit close() first)",
        self.base.state
      )));
    }
    let mut merged = self.base.open_defaults.clone();
    merged.merge(&ConfigNode::parse_kv(params));
    if let Some(o) = overrides {
      merged.merge(o);
    }
    let open_policy = self.imp.open_policy();
    let event = match open_policy {
      OpenPolicy::Auto => ChannelEvent::OpenSync,
      OpenPolicy::Manual => ChannelEvent::Open,
    };
    self.base.set_state(self.base.state.apply(event)?);

    match self.imp.do_open(&mut self.base, &merged) {
      Ok(()) => {
        self.base.config_mut().unlink("open");
        self.base.config_mut().sub_mut("open").merge(&merged);
        debug!("channel[{}] state -> {}", self.base.name(), self.base.state.to_string().cyan().bold());
        if open_policy == OpenPolicy::Auto {
          self.base.deliver_state();
        }
        Ok(())
      }
      Err(err) => {
        self.base.set_state(ChannelState::Error);
        warn!("channel[{}] state -> {}: {err}", self.base.name(), "Error".red().bold());
        Err(err)
      }
    }
  }

  /// Close the channel. No-op (returns `Ok`) if already `Closed`.
  pub fn close(&mut self) -> Result<()> {
    if self.base.state == ChannelState::Closed {
      return Ok(());
    }
    let from_error = self.base.state == ChannelState::Error;
    let close_policy = self.imp.close_policy();
    let event = if from_error || close_policy == ClosePolicy::Short {
      ChannelEvent::CloseSync
    } else {
      ChannelEvent::Close
    };
    self.base.set_state(self.base.state.apply(event)?);
    self.imp.do_close(&mut self.base)?;
    if self.base.state == ChannelState::Closed {
      debug!("channel[{}] state -> {}", self.base.name(), "Closed".cyan().bold());
      self.close_non_orphan_children();
      self.base.deliver_state();
    }
    Ok(())
  }

  fn close_non_orphan_children(&mut self) {
    let names = self.base.child_names();
    for name in names {
      if let Some(child) = self.base.child_del(&name) {
        let _ = child.lock().close();
      }
    }
  }

  /// Drive pending work for at most one transport syscall's worth of time.
  pub fn process(&mut self) -> Result<()> {
    match self.base.state {
      ChannelState::Opening => {
        let outcome = self.imp.do_process(&mut self.base)?;
        if outcome == ProcessOutcome::Activated {
          self.base.set_state(self.base.state.apply(ChannelEvent::Activate)?);
          self.base.deliver_state();
        }
      }
      ChannelState::Closing => {
        let outcome = self.imp.do_process(&mut self.base)?;
        if outcome == ProcessOutcome::Closed {
          self.base.set_state(self.base.state.apply(ChannelEvent::Closed)?);
          self.close_non_orphan_children();
          self.base.deliver_state();
        }
      }
      ChannelState::Active => {
        self.imp.do_process(&mut self.base)?;
      }
      ChannelState::Closed | ChannelState::Error => {}
    }
    Ok(())
  }

  /// Post a message. Fails without effect if the post policy for the
  /// current state is `Disable`.
  pub fn post(&mut self, message: &Message) -> Result<()> {
    let policy = self.imp.post_policy(self.base.state);
    if policy == PostPolicy::Disable {
      return Err(TransportError::PostDisabled(self.base.state).into());
    }
    let start = std::time::Instant::now();
    let result = self.imp.do_post(&mut self.base, message);
    if let Some(stat) = self.base.stat.clone() {
      if result.is_ok() {
        stat.tx.add(1, message.data().len() as u64);
      }
      stat.time.observe(start.elapsed().as_nanos() as i64);
    }
    result
  }

  /// Record an inbound message against stats and deliver it to
  /// subscribers; called by implementations from inside `do_process`.
  pub fn deliver_received(base: &mut ChannelBase, message: &Message) {
    if let Some(stat) = &base.stat {
      stat.rx.add(1, message.data().len() as u64);
    }
    base.deliver(message);
  }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn legal_transitions() {
    use ChannelEvent::*;
    use ChannelState::*;
    assert_eq!(Closed.apply(OpenSync).unwrap(), Active);
    assert_eq!(Closed.apply(Open).unwrap(), Opening);
    assert_eq!(Opening.apply(Activate).unwrap(), Active);
    assert_eq!(Active.apply(Close).unwrap(), Closing);
    assert_eq!(Closing.apply(Closed).unwrap(), Closed);
    assert_eq!(Active.apply(CloseSync).unwrap(), Closed);
    assert_eq!(Opening.apply(Fault).unwrap(), Error);
  }

  #[test]
  fn illegal_transitions_rejected() {
    use ChannelEvent::*;
    use ChannelState::*;
    assert!(Closed.apply(Activate).is_err());
    assert!(Active.apply(Open).is_err());
    assert!(Closing.apply(Open).is_err());
  }

  #[test]
  fn error_requires_explicit_close_before_reopen() {
    // `Error` only transitions via `Close`/`CloseSync`, never back to
    // `Closed` implicitly and never directly to `Opening`/`Active`.
    assert!(ChannelState::Error.apply(ChannelEvent::Open).is_err());
    assert_eq!(
      ChannelState::Error.apply(ChannelEvent::CloseSync).unwrap(),
      ChannelState::Closed
    );
  }

  #[test]
  fn child_add_and_del_announce_via_channel_message() {
    use crate::channel::echo::Echo;
    use crate::message::MessageType;

    let mut base = ChannelBase::new("parent");
    let events: Arc<Mutex<Vec<(Vec<u8>, i32)>>> = Arc::new(Mutex::new(Vec::new()));
    let events_cb = Arc::clone(&events);
    base.subscribe(Box::new(move |_name, msg| {
      if msg.kind() == MessageType::Channel {
        events_cb.lock().push((msg.data().to_vec(), msg.msgid()));
      }
    }));

    let child = Arc::new(Mutex::new(Echo::create("parent/child")));
    base.child_add("child", child, false);
    assert_eq!(events.lock()[0], (b"parent/child".to_vec(), 1));

    base.child_del("child");
    assert_eq!(events.lock()[1], (b"parent/child".to_vec(), 0));
  }
}
