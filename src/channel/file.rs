//! The disk journal transport (`file://`, C8). Fixed-size blocks hold a
//! sequence of length-prefixed frames; each block's *first* frame's `seq`
//! doubles as a seek index, so seeking by sequence number is a binary
//! search over blocks rather than a linear scan of the whole file. Block
//! framing, the meta record, and the `Frame(size=-1)` end-of-block
//! sentinel are grounded directly in `original_source/python/test/
//! test_file.py` — the teacher has no disk I/O of its own to draw from.
//!
//! `write` mode always creates (truncating) a fresh file; resuming an
//! append to an existing journal is out of scope here, matching
//! SPEC_FULL.md's S3/S4 scenarios which only construct-then-write or
//! construct-then-read, never both against the same path in one run.

use std::io::{Read as IoRead, Seek, SeekFrom, Write as IoWrite};

use crate::channel::{ChannelBase, ChannelImpl, ChannelState, ProcessOutcome};
use crate::config::ConfigNode;
use crate::error::{ArgumentError, Error, Result, TransportError};
use crate::message::Message;

///////////////////////////////////////////////////////////////////////////////
//  constants
///////////////////////////////////////////////////////////////////////////////

const MAGIC: [u8; 4] = *b"TLRF";
const VERSION: u32 = 1;
const META_SIZE: u64 = 4 + 4 + 4;
const FRAME_HEADER_SIZE: u32 = 4 + 4 + 8;
/// `Frame { size: -1, msgid: 0, seq: 0 }`: "no more frames fit in this
/// block, skip to the next one".
const SENTINEL_SIZE: i32 = -1;
/// Every block after the first begins with a literal 4-byte marker whose
/// value equals its own size, matching `original_source/python/test/
/// test_file.py::test_block_boundary`'s `b'\x04\0\0\0'` at the new block's
/// first four bytes.
const BLOCK_HEADER_SIZE: u32 = 4;
const DEFAULT_BLOCK_SIZE: u32 = 4096;
/// Absolute payload cap regardless of `block_size` (spec.md §4.8: "Records
/// larger than 1 MiB fail unconditionally").
const MAX_RECORD_SIZE: usize = 1024 * 1024;

///////////////////////////////////////////////////////////////////////////////
//  enums
///////////////////////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum FileMode {
  Read,
  Write,
}

/// Direction capability bits a scheduler would consult to decide whether a
/// channel needs another `process()` call without having to call it
/// speculatively. `file://` only ever reports these two.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct DCaps {
  /// More frames may already be on disk, unread.
  pub pending: bool,
  /// Call `process()` again this tick; more work is immediately available.
  pub process: bool,
}

///////////////////////////////////////////////////////////////////////////////
//  structs
///////////////////////////////////////////////////////////////////////////////

pub struct File {
  file: Option<std::fs::File>,
  mode: FileMode,
  block_size: u32,
  num_blocks: u64,
  cur_block: u64,
  cur_offset: u32,
  autoclose: bool,
  end_reached: bool,
}

struct FrameHeader {
  size: i32,
  msgid: i32,
  seq: i64,
}

///////////////////////////////////////////////////////////////////////////////
//  impls — File
///////////////////////////////////////////////////////////////////////////////

impl Default for File {
  fn default() -> Self {
    File {
      file: None,
      mode: FileMode::Write,
      block_size: DEFAULT_BLOCK_SIZE,
      num_blocks: 0,
      cur_block: 0,
      cur_offset: 0,
      autoclose: false,
      end_reached: false,
    }
  }
}

impl File {
  pub const TAG: &'static str = "file";

  pub fn new() -> Self { File::default() }

  /// Best-effort scheduling hint; see [`DCaps`].
  pub fn dcaps(&self) -> DCaps {
    match self.mode {
      FileMode::Write => DCaps::default(),
      FileMode::Read => DCaps { pending: !self.end_reached, process: !self.end_reached },
    }
  }

  pub fn is_finished(&self) -> bool { self.mode == FileMode::Read && self.end_reached }

  fn file_mut(&mut self) -> Result<&mut std::fs::File> {
    self.file.as_mut().ok_or_else(|| TransportError::NotOpen.into())
  }

  /// Absolute byte offset of the start of `block`, counted from 0. Blocks
  /// are aligned to literal multiples of `block_size` from the start of
  /// the file; the meta record lives inside block 0's own budget rather
  /// than pushing every later block out by `META_SIZE`, matching
  /// `test_file.py::test_block_boundary`'s `offset 1028` for `block=1kb`.
  fn block_offset(&self, block: u64) -> u64 { block * self.block_size as u64 }

  /// Bytes this block's own header consumes before any frame may start:
  /// block 0 carries the meta record, every later block carries the
  /// literal [`BLOCK_HEADER_SIZE`]-byte marker the writer lays down the
  /// first time it crosses into that block.
  fn block_header_len(block: u64) -> u64 {
    if block == 0 { META_SIZE } else { u64::from(BLOCK_HEADER_SIZE) }
  }

  /// Absolute offset where frames for `block` begin.
  fn block_content_offset(&self, block: u64) -> u64 {
    self.block_offset(block) + Self::block_header_len(block)
  }

  fn write_meta(&mut self) -> Result<()> {
    let block_size = self.block_size;
    let f = self.file_mut()?;
    f.seek(SeekFrom::Start(0))?;
    f.write_all(&MAGIC)?;
    f.write_all(&VERSION.to_le_bytes())?;
    f.write_all(&block_size.to_le_bytes())?;
    Ok(())
  }

  fn read_meta(f: &mut std::fs::File) -> Result<u32> {
    f.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    f.read_exact(&mut magic).map_err(TransportError::Io)?;
    if magic != MAGIC {
      return Err(TransportError::FrameCorrupt("bad meta magic".into()).into());
    }
    let mut buf4 = [0u8; 4];
    f.read_exact(&mut buf4)?;
    let version = u32::from_le_bytes(buf4);
    if version != VERSION {
      return Err(Error::Transport(TransportError::FrameCorrupt(format!(
        "unsupported meta version {version}"
      ))));
    }
    f.read_exact(&mut buf4)?;
    Ok(u32::from_le_bytes(buf4))
  }

  fn refresh_num_blocks(&mut self) -> Result<()> {
    let block_size = u64::from(self.block_size);
    let f = self.file_mut()?;
    let len = f.metadata().map_err(TransportError::Io)?.len();
    self.num_blocks = len.div_ceil(block_size).max(1);
    Ok(())
  }

  /// Read the frame header at `(block, 0)`, or `None` if the block is
  /// unwritten (past EOF) or starts with the end-of-block sentinel.
  fn first_header_of_block(&mut self, block: u64) -> Result<Option<FrameHeader>> {
    let offset = self.block_content_offset(block);
    let f = self.file_mut()?;
    if f.metadata().map_err(TransportError::Io)?.len() < offset + u64::from(FRAME_HEADER_SIZE) {
      return Ok(None);
    }
    f.seek(SeekFrom::Start(offset))?;
    let header = read_frame_header(f)?;
    if header.size == SENTINEL_SIZE {
      return Ok(None);
    }
    Ok(Some(header))
  }

  /// Binary search over block-first-seq (spec.md S4): find the block that
  /// would contain `target_seq`, then linear-scan forward within it to the
  /// exact frame. Leaves the read cursor positioned at the first frame
  /// whose `seq >= target_seq`.
  pub fn seek(&mut self, target_seq: i64) -> Result<()> {
    if self.mode != FileMode::Read {
      return Err(ArgumentError::BadOpenParams("seek is only valid in read mode".into()).into());
    }
    self.refresh_num_blocks()?;
    let mut lo = 0u64;
    let mut hi = self.num_blocks;
    while lo < hi {
      let mid = lo + (hi - lo) / 2;
      match self.first_header_of_block(mid)? {
        Some(h) if h.seq <= target_seq => lo = mid + 1,
        _ => hi = mid,
      }
    }
    self.cur_block = lo.saturating_sub(1);
    self.cur_offset = 0;
    self.end_reached = false;

    // Advance within the block to the first frame at or past target_seq.
    loop {
      let capacity = u64::from(self.block_size) - Self::block_header_len(self.cur_block);
      if u64::from(self.cur_offset) + u64::from(FRAME_HEADER_SIZE) > capacity {
        break;
      }
      let offset = self.block_content_offset(self.cur_block) + u64::from(self.cur_offset);
      let f = self.file_mut()?;
      if f.metadata().map_err(TransportError::Io)?.len() < offset + u64::from(FRAME_HEADER_SIZE) {
        break;
      }
      f.seek(SeekFrom::Start(offset))?;
      let header = read_frame_header(f)?;
      if header.size == SENTINEL_SIZE || header.seq >= target_seq {
        break;
      }
      self.cur_offset += FRAME_HEADER_SIZE + header.size as u32;
    }
    Ok(())
  }
}

impl ChannelImpl for File {
  fn post_policy(&self, state: ChannelState) -> crate::channel::PostPolicy {
    use crate::channel::PostPolicy::*;
    match (state, self.mode) {
      (ChannelState::Active, FileMode::Write) => Enable,
      _ => Disable,
    }
  }

  fn do_open(&mut self, base: &mut ChannelBase, params: &ConfigNode) -> Result<()> {
    let path = params
      .get_opt("filename")
      .ok_or_else(|| ArgumentError::BadOpenParams("filename is required".into()))?;
    let dir = params.get("dir", "write");
    self.autoclose = params.get("autoclose", "no") == "yes";
    self.end_reached = false;

    match dir.as_str() {
      "write" => {
        let block_size: u32 = params
          .get("block", &DEFAULT_BLOCK_SIZE.to_string())
          .parse()
          .map_err(|_| ArgumentError::BadOpenParams("block must be an integer".into()))?;
        if block_size <= FRAME_HEADER_SIZE + BLOCK_HEADER_SIZE {
          return Err(
            ArgumentError::BadOpenParams("block must exceed the frame and block header size".into()).into(),
          );
        }
        let file = std::fs::OpenOptions::new()
          .create(true)
          .truncate(true)
          .read(true)
          .write(true)
          .open(&path)
          .map_err(TransportError::Io)?;
        self.mode = FileMode::Write;
        self.block_size = block_size;
        self.file = Some(file);
        self.cur_block = 0;
        self.cur_offset = 0;
        self.num_blocks = 1;
        self.write_meta()?;
      }
      "read" => {
        let mut file = std::fs::OpenOptions::new().read(true).open(&path).map_err(TransportError::Io)?;
        let block_size = File::read_meta(&mut file)?;
        self.mode = FileMode::Read;
        self.block_size = block_size;
        self.file = Some(file);
        self.cur_block = 0;
        self.cur_offset = 0;
        self.refresh_num_blocks()?;
        if let Some(seq_str) = params.get_opt("seq") {
          let seq: i64 =
            seq_str.parse().map_err(|_| ArgumentError::BadOpenParams("seq must be an integer".into()))?;
          self.seek(seq)?;
        }
      }
      other => return Err(ArgumentError::BadOpenParams(format!("unknown dir {other:?}")).into()),
    }
    base.config_mut().set("info.dir", dir);
    Ok(())
  }

  fn do_process(&mut self, base: &mut ChannelBase) -> Result<ProcessOutcome> {
    if self.mode != FileMode::Read {
      return Ok(ProcessOutcome::Pending);
    }
    loop {
      let file_len = {
        let f = self.file_mut()?;
        f.metadata().map_err(TransportError::Io)?.len()
      };
      // A block boundary is reached either by an explicit sentinel or,
      // when there wasn't room to write one, by simply running out of
      // space in the current block — check the block-local bound first so
      // an unwritten tail is never mistaken for a zero-sized frame.
      let capacity = u64::from(self.block_size) - Self::block_header_len(self.cur_block);
      if u64::from(self.cur_offset) + u64::from(FRAME_HEADER_SIZE) > capacity {
        if self.has_next_block(file_len) {
          self.cur_block += 1;
          self.cur_offset = 0;
          continue;
        }
        self.end_reached = true;
        break;
      }
      let offset = self.block_content_offset(self.cur_block) + u64::from(self.cur_offset);
      if offset + u64::from(FRAME_HEADER_SIZE) > file_len {
        self.end_reached = true;
        break;
      }
      let f = self.file_mut()?;
      f.seek(SeekFrom::Start(offset))?;
      let header = read_frame_header(f)?;
      if header.size == SENTINEL_SIZE {
        self.cur_block += 1;
        self.cur_offset = 0;
        continue;
      }
      if header.size < 0 {
        return Err(TransportError::FrameCorrupt(format!("negative frame size {}", header.size)).into());
      }
      if offset + u64::from(FRAME_HEADER_SIZE) + header.size as u64 > file_len {
        self.end_reached = true;
        break;
      }
      let mut payload = vec![0u8; header.size as usize];
      f.read_exact(&mut payload).map_err(TransportError::Io)?;
      self.cur_offset += FRAME_HEADER_SIZE + header.size as u32;
      let msg = Message::new(header.msgid, &payload).with_seq(header.seq);
      let msg = msg.into_owned();
      crate::channel::ChannelHandle::deliver_received(base, &msg);
    }
    if self.autoclose && self.end_reached {
      return Ok(ProcessOutcome::Closed);
    }
    Ok(ProcessOutcome::Pending)
  }

  fn do_post(&mut self, _base: &mut ChannelBase, message: &Message) -> Result<()> {
    let payload = message.data();
    if payload.len() > MAX_RECORD_SIZE {
      return Err(TransportError::RecordTooLarge(payload.len()).into());
    }
    let frame_len = u64::from(FRAME_HEADER_SIZE) + payload.len() as u64;
    // A record must fit some block's content area even fresh off a
    // boundary crossing, which reserves BLOCK_HEADER_SIZE bytes for the
    // next block's own marker (spec.md §4.8: "records larger than
    // block_size - 16 - 4 fail").
    if frame_len + u64::from(BLOCK_HEADER_SIZE) > u64::from(self.block_size) {
      return Err(TransportError::RecordTooLarge(payload.len()).into());
    }
    let capacity = u64::from(self.block_size) - Self::block_header_len(self.cur_block);
    if u64::from(self.cur_offset) + frame_len > capacity {
      if u64::from(self.cur_offset) + u64::from(FRAME_HEADER_SIZE) <= capacity {
        self.write_frame_header(SENTINEL_SIZE, 0, 0)?;
      }
      self.cur_block += 1;
      self.cur_offset = 0;
      self.num_blocks = self.num_blocks.max(self.cur_block + 1);
      self.write_block_header(self.cur_block)?;
    }
    self.write_frame_header(payload.len() as i32, message.msgid(), message.seq())?;
    let f = self.file_mut()?;
    f.write_all(payload).map_err(TransportError::Io)?;
    self.cur_offset += frame_len as u32;
    Ok(())
  }

  fn as_any(&self) -> &dyn std::any::Any { self }
  fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
}

impl File {
  fn write_frame_header(&mut self, size: i32, msgid: i32, seq: i64) -> Result<()> {
    let offset = self.block_content_offset(self.cur_block) + u64::from(self.cur_offset);
    let f = self.file_mut()?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&size.to_le_bytes()).map_err(TransportError::Io)?;
    f.write_all(&msgid.to_le_bytes()).map_err(TransportError::Io)?;
    f.write_all(&seq.to_le_bytes()).map_err(TransportError::Io)?;
    Ok(())
  }

  /// Lay down the literal marker every block past the first begins with
  /// (spec.md §4.8: "the next block begins with a 4-byte block header
  /// whose value equals the block header size (4)").
  fn write_block_header(&mut self, block: u64) -> Result<()> {
    let offset = self.block_offset(block);
    let f = self.file_mut()?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(&BLOCK_HEADER_SIZE.to_le_bytes()).map_err(TransportError::Io)?;
    Ok(())
  }

  fn has_next_block(&mut self, file_len: u64) -> bool {
    self.block_content_offset(self.cur_block + 1) + u64::from(FRAME_HEADER_SIZE) <= file_len
  }
}

fn read_frame_header(f: &mut std::fs::File) -> Result<FrameHeader> {
  let mut buf4 = [0u8; 4];
  let mut buf8 = [0u8; 8];
  f.read_exact(&mut buf4).map_err(TransportError::Io)?;
  let size = i32::from_le_bytes(buf4);
  f.read_exact(&mut buf4).map_err(TransportError::Io)?;
  let msgid = i32::from_le_bytes(buf4);
  f.read_exact(&mut buf8).map_err(TransportError::Io)?;
  let seq = i64::from_le_bytes(buf8);
  Ok(FrameHeader { size, msgid, seq })
}

///////////////////////////////////////////////////////////////////////////////
//  tests
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::{ChannelBase, ChannelHandle};
  use std::sync::{Arc, Mutex};

  fn writer(path: &str, block: u32) -> ChannelHandle {
    let mut h = ChannelHandle::new(ChannelBase::new("w"), Box::new(File::new()));
    h.open(&format!("filename={path};dir=write;block={block}"), None).unwrap();
    h
  }

  fn reader(path: &str) -> ChannelHandle {
    let mut h = ChannelHandle::new(ChannelBase::new("r"), Box::new(File::new()));
    h.open(&format!("filename={path};dir=read"), None).unwrap();
    h
  }

  #[test]
  fn write_then_read_back_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("j.tll").to_string_lossy().to_string();
    let mut w = writer(&path, 128);
    for i in 0..20i64 {
      w.post(&Message::new(1, b"payload").with_seq(i)).unwrap();
    }
    w.close().unwrap();

    let mut r = reader(&path);
    let received = Arc::new(Mutex::new(Vec::new()));
    let cb = Arc::clone(&received);
    r.subscribe(Box::new(move |_name, msg| cb.lock().unwrap().push(msg.seq())));
    r.process().unwrap();
    assert_eq!(received.lock().unwrap().as_slice(), &(0..20i64).collect::<Vec<_>>());
  }

  #[test]
  fn block_boundary_sentinel_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("j.tll").to_string_lossy().to_string();
    // frame is header(16) + 10 bytes = 26; block of 40 fits one frame plus
    // a sentinel but not two frames, forcing a boundary crossing.
    let mut w = writer(&path, 40);
    w.post(&Message::new(1, b"0123456789").with_seq(0)).unwrap();
    w.post(&Message::new(1, b"0123456789").with_seq(1)).unwrap();
    w.close().unwrap();

    let mut r = reader(&path);
    let received = Arc::new(Mutex::new(Vec::new()));
    let cb = Arc::clone(&received);
    r.subscribe(Box::new(move |_name, msg| cb.lock().unwrap().push(msg.seq())));
    r.process().unwrap();
    assert_eq!(received.lock().unwrap().as_slice(), &[0, 1]);
  }

  #[test]
  fn record_over_one_mib_is_rejected_even_with_a_huge_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("j.tll").to_string_lossy().to_string();
    let mut w = writer(&path, 2 * 1024 * 1024);
    let payload = vec![0u8; MAX_RECORD_SIZE + 1];
    assert!(w.post(&Message::new(1, &payload)).is_err());
  }

  #[test]
  fn seek_by_seq_lands_on_the_right_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("j.tll").to_string_lossy().to_string();
    let mut w = writer(&path, 48);
    for i in 0..50i64 {
      w.post(&Message::new(1, b"0123456789").with_seq(i)).unwrap();
    }
    w.close().unwrap();

    let mut r = reader(&path);
    r.downcast_mut::<File>().unwrap().seek(30).unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let cb = Arc::clone(&received);
    r.subscribe(Box::new(move |_name, msg| cb.lock().unwrap().push(msg.seq())));
    r.process().unwrap();
    assert_eq!(received.lock().unwrap().first(), Some(&30));
    assert_eq!(received.lock().unwrap().last(), Some(&49));
  }
}
