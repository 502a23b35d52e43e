//! Frame boundary recovery from an arbitrary byte stream.
//!
//! Serial reads deliver bytes with no respect for frame boundaries: a read
//! may start inside a frame the previous read began, carry line noise before
//! the first real frame, or end before a frame's declared length has
//! arrived. The reassembler owns the per-connection receive buffer and turns
//! each read into zero or more [`FrameRecord`]s, keeping its place in the
//! stream across corrupt and partial data.
//!
//! Recovery strategy per pass:
//!
//! - bytes before the first sync word are junk and are dropped,
//! - a sync word with an unreadable length field stays buffered
//!   ([`Classification::MaybeMore`]),
//! - a candidate is sliced to its declared length even when the buffer is
//!   short; validation flags mark it rather than stalling the stream,
//! - once the final candidate of a pass closes exactly and checks out, any
//!   residual bytes are noise from a dead exchange and the buffer is
//!   dropped entirely (full resynchronization).

use log::{debug, trace};

use crate::protocol::frame::{self, Frame, MIN_FRAME_LEN, SYNC};

/// How a record left the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Full candidate sliced; nothing more is expected from this buffer.
    Complete,
    /// Full candidate sliced and further frames follow in the same buffer.
    CompleteWithRemainder,
    /// The buffer ended before the frame's length field was readable; the
    /// bytes stay buffered for the next read.
    MaybeMore,
}

/// One reassembled candidate frame with its validation flags.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// How the candidate was terminated.
    pub classification: Classification,
    /// Candidate starts with the sync word.
    pub valid_sync: bool,
    /// Checksum trailer re-validated to the zero sentinel.
    pub valid_checksum: bool,
    /// The declared length was fully present in the buffer.
    pub valid_tail: bool,
    bytes: Vec<u8>,
}

impl FrameRecord {
    fn maybe_more(bytes: Vec<u8>) -> Self {
        Self {
            classification: Classification::MaybeMore,
            valid_sync: true,
            valid_checksum: false,
            valid_tail: false,
            bytes,
        }
    }

    /// A record that can be acted on: complete with intact sync and checksum.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.classification != Classification::MaybeMore
            && self.valid_sync
            && self.valid_tail
            && self.valid_checksum
    }

    /// Raw candidate bytes, sync word included.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Pack index, when the header got far enough to carry one.
    #[must_use]
    pub fn pack_index(&self) -> Option<u8> {
        self.bytes.get(3).copied()
    }

    /// Device identifier, when present.
    #[must_use]
    pub fn device_id(&self) -> Option<u8> {
        self.bytes.get(4).copied()
    }

    /// Command code, when present.
    #[must_use]
    pub fn command(&self) -> Option<u8> {
        self.bytes.get(5).copied()
    }

    /// Payload span of a valid record.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        if !self.is_valid() {
            return None;
        }
        self.bytes.get(6..self.bytes.len() - 1)
    }

    /// Decode into a [`Frame`], if the record is valid.
    #[must_use]
    pub fn to_frame(&self) -> Option<Frame> {
        Frame::decode(&self.bytes).ok()
    }
}

/// Incremental reassembler owning the connection's receive buffer.
///
/// The buffer is appended by [`feed`](Self::feed) and truncated to the
/// unconsumed remainder after every pass; it lives as long as the
/// connection.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    buffer: Vec<u8>,
}

impl StreamReassembler {
    /// Create an empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes retained from previous reads, pending more data.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append freshly read bytes and extract all recoverable records.
    pub fn feed(&mut self, new_bytes: &[u8]) -> Vec<FrameRecord> {
        self.buffer.extend_from_slice(new_bytes);
        let mut records = Vec::new();

        loop {
            let Some(sync_pos) = find_sync(&self.buffer) else {
                if !self.buffer.is_empty() {
                    debug!(
                        "no sync word in {} buffered bytes, dropping as junk",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                return records;
            };
            if sync_pos > 0 {
                debug!("dropping {sync_pos} junk bytes before sync word");
                self.buffer.drain(..sync_pos);
            }

            // Sync word present but the length field has not arrived yet.
            if self.buffer.len() < SYNC.len() + 3 {
                trace!(
                    "header cut short at {} bytes, keeping for next read",
                    self.buffer.len()
                );
                records.push(FrameRecord::maybe_more(self.buffer.clone()));
                return records;
            }

            let declared = frame::wire_len(self.buffer[2]);
            let take = declared.min(self.buffer.len());
            let candidate: Vec<u8> = self.buffer.drain(..take).collect();
            let valid_tail = candidate.len() == declared;
            let valid_checksum = valid_tail && Frame::verify(&candidate);
            if !valid_checksum {
                trace!(
                    "candidate of {} bytes failed validation (tail: {valid_tail})",
                    candidate.len()
                );
            }

            // Another pass is worthwhile only while a minimal frame could
            // still fit in the remainder.
            let remaining = self.buffer.len();
            let more = remaining >= MIN_FRAME_LEN;
            let record = FrameRecord {
                classification: if more {
                    Classification::CompleteWithRemainder
                } else {
                    Classification::Complete
                },
                valid_sync: true,
                valid_checksum,
                valid_tail,
                bytes: candidate,
            };
            let resynchronized = record.is_valid();
            records.push(record);

            if !more {
                if resynchronized && remaining > 0 {
                    debug!("resynchronized, dropping {remaining} residual bytes");
                }
                if resynchronized {
                    self.buffer.clear();
                }
                return records;
            }
        }
    }
}

fn find_sync(buffer: &[u8]) -> Option<usize> {
    buffer.windows(SYNC.len()).position(|w| w == SYNC)
}
