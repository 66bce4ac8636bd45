//! Error taxonomy.
//!
//! One `thiserror` enum per layer (§7), unified by [`Error`] at the crate
//! boundary so callers can match on the coarse `Error` but a layer can also
//! be matched on directly via `#[from]`.

///////////////////////////////////////////////////////////////////////////////
//  enums
///////////////////////////////////////////////////////////////////////////////

/// Unknown tag, malformed URL, duplicate name — no channel is registered.
#[derive(thiserror::Error, Debug)]
pub enum ConstructError {
  #[error("no factory registered for tag {0:?}")]
  UnknownTag(String),
  #[error("duplicate tag {0:?}")]
  DuplicateTag(String),
  #[error("duplicate channel name {0:?}")]
  DuplicateName(String),
  #[error("malformed url: {0}")]
  MalformedUrl(String),
  #[error("alias expansion did not terminate (cycle involving {0:?})")]
  AliasCycle(String),
  #[error("prefix tag {0:?} requires an inner leaf channel")]
  PrefixRequiresLeaf(String),
  #[error("master channel {0:?} not found")]
  MissingMaster(String),
  #[error("logic role {0:?} has no bound channel")]
  MissingLogicRole(String),
  #[error("logic role {role:?} expects exactly one channel, got {count}")]
  RoleArity { role: String, count: usize },
  #[error("implementation does not match the requested factory")]
  CastMismatch,
  #[error("bad scheme: {0}")]
  BadScheme(String),
}

/// Bad parameters to `open` or `post`.
#[derive(thiserror::Error, Debug)]
pub enum ArgumentError {
  #[error("malformed open parameter string: {0:?}")]
  BadOpenParams(String),
  #[error("post rejected: {0}")]
  BadPostParams(String),
}

/// I/O failure, capacity exceeded, frame corruption.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("post capacity exceeded")]
  CapacityExceeded,
  #[error("corrupt frame: {0}")]
  FrameCorrupt(String),
  #[error("post is disabled in state {0:?}")]
  PostDisabled(crate::channel::ChannelState),
  #[error("record of {0} bytes exceeds the maximum frame size")]
  RecordTooLarge(usize),
  #[error("channel is not open")]
  NotOpen,
  #[error("bad meta record: {0}")]
  BadMeta(String),
}

/// Message doesn't match scheme, JSON decode failure.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
  #[error("message name {0:?} not found in scheme")]
  UnknownMessage(String),
  #[error("field {0:?} not found in message {1:?}")]
  UnknownField(String, String),
  #[error(transparent)]
  JsonDecode(#[from] serde_json::Error),
  #[error("json list for field {field:?} has length {got}, expected at most {expected}")]
  ListTooLong { field: String, got: usize, expected: usize },
  #[error("value for field {0:?} has the wrong type")]
  TypeMismatch(String),
}

/// Unifying error at the crate boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error(transparent)]
  Construct(#[from] ConstructError),
  #[error(transparent)]
  Argument(#[from] ArgumentError),
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  #[error("invalid state transition: {0}")]
  InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
