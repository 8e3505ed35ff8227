//! Frame extraction: a 4-byte big-endian length prefix followed by exactly
//! that many payload bytes.
//!
//! No error condition exists at this layer — any `u32` length is accepted.
//! Bounding `N` against some maximum is a policy decision left to callers
//! (e.g. a `Processor` or a wrapping transport), not this core.

use bytes::{Buf, Bytes, BytesMut};

const LENGTH_PREFIX_LEN: usize = 4;

/// Attempts to remove one complete frame from the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched if fewer than 4 bytes are
/// buffered, or if the declared payload hasn't fully arrived yet. On
/// success, the length prefix and payload are both removed from `buf` and
/// the payload is returned on its own.
pub fn extract_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return None;
    }

    let len = u32::from_be_bytes(buf[0..LENGTH_PREFIX_LEN].try_into().unwrap()) as usize;
    let total = LENGTH_PREFIX_LEN + len;
    if buf.len() < total {
        return None;
    }

    buf.advance(LENGTH_PREFIX_LEN);
    Some(buf.split_to(len).freeze())
}

/// Repeatedly applies [`extract_frame`] until the buffer is starved,
/// returning every complete frame found, so a single read pass drains every
/// frame that arrived together rather than leaving a pipelined second frame
/// for the next wakeup.
pub fn extract_all_frames(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut frames = Vec::new();
    while let Some(frame) = extract_frame(buf) {
        frames.push(frame);
    }
    frames
}
