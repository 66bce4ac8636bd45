//! In-memory master/slave channel pair (`mem://`).
//!
//! Two `mem://` channels form a full-duplex link: the first constructed
//! (no `master=` parameter) is the *master*; a second, constructed with
//! `master=<master-name>`, is the *slave*. Each side posts into the other's
//! receive queue, using the teacher's own `unbounded_spsc` SPSC backend
//! (`channel::backend::Simplex` in the teacher built on the same crate).

use unbounded_spsc::{Receiver, Sender};

use crate::channel::{ChannelBase, ChannelHandle, ChannelImpl, ProcessOutcome};
use crate::config::ConfigNode;
use crate::error::Result;
use crate::message::Message;

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

/// The half of a full-duplex pair handed from a master to its slave at
/// construction time (see [`crate::context::Context::take_mem_pair`]).
pub struct MemPairHalf {
  pub tx: Sender<Vec<u8>>,
  pub rx: Receiver<Vec<u8>>,
}

pub struct Mem {
  tx: Sender<Vec<u8>>,
  rx: Receiver<Vec<u8>>,
}

///////////////////////////////////////////////////////////////////////////////
//  impls
///////////////////////////////////////////////////////////////////////////////

impl Mem {
  pub const TAG: &'static str = "mem";

  /// Build a fresh master/slave pair of queues; returns `(master_half,
  /// slave_half)` each already cross-wired to the other.
  pub fn new_pair() -> (MemPairHalf, MemPairHalf) {
    let (tx_a, rx_a) = unbounded_spsc::channel();
    let (tx_b, rx_b) = unbounded_spsc::channel();
    (MemPairHalf { tx: tx_a, rx: rx_b }, MemPairHalf { tx: tx_b, rx: rx_a })
  }

  pub fn create(name: impl Into<String>, half: MemPairHalf) -> ChannelHandle {
    ChannelHandle::new(ChannelBase::new(name), Box::new(Mem { tx: half.tx, rx: half.rx }))
  }
}

impl ChannelImpl for Mem {
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
    self.tx.send(message.data().to_vec());
    Ok(())
  }

  fn as_any(&self) -> &dyn std::any::Any { self }
  fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl std::fmt::Debug for MemPairHalf {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemPairHalf").finish_non_exhaustive()
  }
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////
