//! A single-producer single-consumer peer link (`direct://`), grounded in
//! the teacher's other backend choice (`channel::backend::{Sink, Source}`,
//! built on `std::sync::mpsc` rather than `unbounded_spsc`). Pairs the same
//! way `mem://` does (first constructed is the master, the peer names it
//! via `master=<name>`) but over `std::sync::mpsc`, giving a second,
//! independently-grounded in-process transport rather than a copy of
//! `mem://` with the serial numbers filed off.

use std::sync::mpsc::{Receiver, Sender};

use crate::channel::{ChannelBase, ChannelHandle, ChannelImpl, ProcessOutcome};
use crate::config::ConfigNode;
use crate::error::Result;
use crate::message::Message;

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// The half of a full-duplex pair handed from a master to its peer at
/// construction time.
pub struct DirectPairHalf {
  pub tx: Sender<Vec<u8>>,
  pub rx: Receiver<Vec<u8>>,
}

pub struct Direct {
  tx: Sender<Vec<u8>>,
  rx: Receiver<Vec<u8>>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Direct {
  pub const TAG: &'static str = "direct";

  pub fn new_pair() -> (DirectPairHalf, DirectPairHalf) {
    let (tx_a, rx_a) = std::sync::mpsc::channel();
    let (tx_b, rx_b) = std::sync::mpsc::channel();
    (DirectPairHalf { tx: tx_a, rx: rx_b }, DirectPairHalf { tx: tx_b, rx: rx_a })
  }

  pub fn create(name: impl Into<String>, half: DirectPairHalf) -> ChannelHandle {
    ChannelHandle::new(ChannelBase::new(name), Box::new(Direct { tx: half.tx, rx: half.rx }))
  }
}

impl ChannelImpl for Direct {
  fn do_open(&mut self, _base: &mut ChannelBase, _params: &ConfigNode) -> Result<()> {
    Ok(())
  }

  fn do_process(&mut self, base: &mut ChannelBase) -> Result<ProcessOutcome> {
    while let Ok(data) = self.rx.try_recv() {
      let msg = Message::new(0, &data).into_owned();
      ChannelHandle::deliver_received(base, &msg);
    }
    Ok(ProcessOutcome::Pending)
  }

  fn do_post(&mut self, _base: &mut ChannelBase, message: &Message) -> Result<()> {
    // The peer may already have hung up (its channel dropped); treat that
    // the same as any other disconnected transport rather than panicking.
    self
      .tx
      .send(message.data().to_vec())
      .map_err(|_| crate::error::TransportError::FrameCorrupt("peer disconnected".into()))?;
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

  #[test]
  fn peers_exchange_messages_both_ways() {
    let (a_half, b_half) = Direct::new_pair();
    let mut a = Direct::create("a", a_half);
    let mut b = Direct::create("b", b_half);
    a.open("", None).unwrap();
    b.open("", None).unwrap();

    let seen_b = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_b_cb = std::sync::Arc::clone(&seen_b);
    b.subscribe(Box::new(move |_name, msg| seen_b_cb.lock().unwrap().push(msg.data().to_vec())));

    a.post(&Message::new(1, b"ping")).unwrap();
    b.process().unwrap();
    assert_eq!(seen_b.lock().unwrap().as_slice(), &[b"ping".to_vec()]);
  }

  #[test]
  fn post_to_dropped_peer_is_an_error() {
    let (a_half, b_half) = Direct::new_pair();
    let mut a = Direct::create("a", a_half);
    a.open("", None).unwrap();
    drop(b_half);
    assert!(a.post(&Message::new(1, b"x")).is_err());
  }
}
