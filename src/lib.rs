//! A composable message-channel runtime.
//!
//! A [`ChannelHandle`](channel::ChannelHandle) is an addressable endpoint
//! that carries discrete, typed [`Message`]s between producers and
//! consumers over arbitrary transports. Channels are assembled from a
//! [`Context`] registry by URL, and can be stacked with
//! [`prefix`](channel::prefix) wrappers and coordinated with
//! [`logic`](channel::logic) channels.

#![allow(dead_code)]

#[macro_use] extern crate log;

///////////////////////////////////////////////////////////////////////////////
//  modules
///////////////////////////////////////////////////////////////////////////////

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod scheme;
pub mod stat;
pub mod url;

///////////////////////////////////////////////////////////////////////////////
//  reexports
///////////////////////////////////////////////////////////////////////////////

pub use channel::{ChannelHandle, ChannelState};
pub use config::ConfigNode;
pub use context::Context;
pub use message::Message;
pub use scheme::Scheme;
pub use url::Url;

///////////////////////////////////////////////////////////////////////////////
//  functions
///////////////////////////////////////////////////////////////////////////////

/// Print a short report of the sizes of the core runtime types.
pub fn report_sizes() {
  println!("tether report sizes...");
  println!("  size of Message:      {}", std::mem::size_of::<message::Message<'static>>());
  println!("  size of ChannelState: {}", std::mem::size_of::<ChannelState>());
  println!("...tether report sizes");
}
