//! A trivial leaf channel that echoes every posted message straight back
//! to its own subscribers. Used as the minimal worked example for the
//! lifecycle (spec.md S1) and as the simplest possible `ChannelImpl`.

use crate::channel::{ChannelBase, ChannelHandle, ChannelImpl, ProcessOutcome};
use crate::config::ConfigNode;
use crate::error::Result;
use crate::message::Message;

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

pub struct Echo;

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Echo {
  pub const TAG: &'static str = "echo";

  pub fn create(name: impl Into<String>) -> ChannelHandle {
    ChannelHandle::new(ChannelBase::new(name), Box::new(Echo))
  }
}

impl ChannelImpl for Echo {
  fn do_open(&mut self, base: &mut ChannelBase, _params: &ConfigNode) -> Result<()> {
    // Written before the wrapper commits the `Active` transition, per the
    // Open Question resolution in DESIGN.md.
    base.config_mut().set("info.echo", "yes");
    Ok(())
  }

  fn do_process(&mut self, _base: &mut ChannelBase) -> Result<ProcessOutcome> {
    Ok(ProcessOutcome::Pending)
  }

  fn do_post(&mut self, base: &mut ChannelBase, message: &Message) -> Result<()> {
    ChannelHandle::deliver_received(base, message);
    Ok(())
  }

  fn as_any(&self) -> &dyn std::any::Any { self }
  fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::ChannelState;
  use std::sync::{Arc, Mutex};

  #[test]
  fn echo_lifecycle_and_roundtrip() {
    let mut handle = Echo::create("e");
    handle.open("", None).unwrap();
    assert_eq!(handle.state(), ChannelState::Active);
    assert_eq!(handle.config().get("info.echo", ""), "yes");

    let received: Arc<Mutex<Vec<(i64, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let received_cb = Arc::clone(&received);
    handle.subscribe(Box::new(move |_name, msg| {
      received_cb.lock().unwrap().push((msg.seq(), msg.data().to_vec()));
    }));

    let msg = Message::new(1, b"xxx").with_seq(100);
    handle.post(&msg).unwrap();
    assert_eq!(received.lock().unwrap().as_slice(), &[(100, b"xxx".to_vec())]);

    handle.close().unwrap();
    assert_eq!(handle.state(), ChannelState::Closed);
  }

  #[test]
  fn post_before_open_is_rejected() {
    let mut handle = Echo::create("e");
    let msg = Message::new(1, b"x");
    assert!(handle.post(&msg).is_err());
  }
}
