//! Sender and receiver loops behind [`Transport`](super::Transport).
//!
//! Ownership is strict: the sender loop is the only writer of command
//! frames and the only reader of the dispatch queue; the receiver loop is
//! the only reader of the link and the only writer of auto-acks. The
//! in-flight request slot lives on the sender's stack and is never shared.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::frame::{Frame, MAX_PAYLOAD};
use crate::protocol::{Classification, FrameRecord, StreamReassembler, cmd, correlate};

use super::{FrameCallback, Outcome};

/// Read poll interval for the receiver; it must never block indefinitely.
pub(super) const READ_POLL: Duration = Duration::from_millis(50);

/// Poll interval for the command queue and the stop flag.
const QUEUE_POLL: Duration = Duration::from_millis(50);

/// One queued command exchange.
pub(super) struct Dispatch {
    pub device_id: u8,
    pub command: u8,
    pub payload: Vec<u8>,
    pub deadline: Duration,
    pub reply: SyncSender<Result<Outcome>>,
}

/// Message on the matched-response channel.
pub(super) enum Matched {
    /// A valid frame published by the receiver.
    Record(FrameRecord),
    /// Wake-up sentinel pushed during shutdown.
    Shutdown,
}

/// The single in-flight request. Exactly one exists at a time, owned by the
/// sender loop between write and match/timeout.
struct PendingRequest {
    command: u8,
    expected_replies: &'static [u8],
    deadline: Duration,
}

/// Sender half: encodes and writes command frames, waits for the
/// correlated reply.
pub(super) struct SenderLoop {
    port: Box<dyn Port>,
    dispatch_rx: Receiver<Dispatch>,
    matched_rx: Receiver<Matched>,
    stop: Arc<AtomicBool>,
    pack_index: u8,
}

impl SenderLoop {
    pub(super) fn new(
        port: Box<dyn Port>,
        dispatch_rx: Receiver<Dispatch>,
        matched_rx: Receiver<Matched>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            port,
            dispatch_rx,
            matched_rx,
            stop,
            pack_index: 0,
        }
    }

    pub(super) fn run(mut self) {
        debug!("sender loop started");
        while !self.stop.load(Ordering::SeqCst) {
            match self.dispatch_rx.recv_timeout(QUEUE_POLL) {
                Ok(dispatch) => self.exchange(dispatch),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("sender loop stopped");
    }

    /// Sequence index, wrapping in 1..=255; 0 stays reserved.
    fn next_index(&mut self) -> u8 {
        self.pack_index = if self.pack_index >= 0xFF {
            1
        } else {
            self.pack_index + 1
        };
        self.pack_index
    }

    fn exchange(&mut self, dispatch: Dispatch) {
        let Dispatch {
            device_id,
            command,
            payload,
            deadline,
            reply,
        } = dispatch;

        // A reply left over from a previous cycle must never satisfy this
        // request.
        let mut stale = 0;
        while self.matched_rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("dropped {stale} stale response(s) before send");
        }

        let index = self.next_index();
        let frame = if command == cmd::FW_CHUNK && payload.len() > MAX_PAYLOAD {
            // Firmware chunks carry their true length in-band (leading
            // chunk-size byte); the header length field goes out as the 0
            // sentinel. No other command may use the oversized form.
            Frame::encode_extended(device_id, index, command, &payload)
        } else {
            match Frame::encode(device_id, index, command, Some(&payload)) {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                },
            }
        };

        trace!(
            "writing cmd {command:#04X} index {index} ({} bytes)",
            frame.len()
        );
        if let Err(e) = self.port.write_all_bytes(&frame) {
            warn!("link write failed: {e}");
            let _ = reply.send(Err(e));
            self.stop.store(true, Ordering::SeqCst);
            return;
        }

        if correlate::expects_no_reply(command, &payload) {
            trace!("cmd {command:#04X} expects no reply, reporting sent");
            let _ = reply.send(Ok(Outcome::Sent));
            return;
        }

        let pending = PendingRequest {
            command,
            expected_replies: correlate::expected_replies(command),
            deadline,
        };
        let outcome = self.await_reply(&pending);
        let _ = reply.send(outcome);
    }

    /// Block on the matched-response channel until a reply in the expected
    /// set arrives, the deadline elapses, or shutdown is signaled.
    fn await_reply(&mut self, pending: &PendingRequest) -> Result<Outcome> {
        let deadline_at = Instant::now() + pending.deadline;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            let now = Instant::now();
            if now >= deadline_at {
                debug!(
                    "cmd {:#04X}: no matching reply within {:?}",
                    pending.command, pending.deadline
                );
                return Ok(Outcome::Timeout);
            }
            // Short slices keep the stop flag responsive even when the
            // shutdown sentinel was swallowed by a pre-send drain.
            let slice = (deadline_at - now).min(QUEUE_POLL);
            match self.matched_rx.recv_timeout(slice) {
                Ok(Matched::Record(record)) => {
                    let matched = record
                        .command()
                        .is_some_and(|c| pending.expected_replies.contains(&c));
                    if matched {
                        trace!("cmd {:#04X} matched by {:?}", pending.command, record.command());
                        return Ok(Outcome::Success(record));
                    }
                    debug!(
                        "discarding reply {:?} not expected by cmd {:#04X}",
                        record.command(),
                        pending.command
                    );
                },
                Ok(Matched::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Closed);
                },
                Err(RecvTimeoutError::Timeout) => {},
            }
        }
    }
}

/// Receiver half: reads the link, reassembles frames, auto-acks, and
/// publishes valid records.
pub(super) struct ReceiverLoop {
    reader: Box<dyn Port>,
    ack_writer: Box<dyn Port>,
    matched_tx: SyncSender<Matched>,
    on_frame: Option<FrameCallback>,
    stop: Arc<AtomicBool>,
    reassembler: StreamReassembler,
}

impl ReceiverLoop {
    pub(super) fn new(
        reader: Box<dyn Port>,
        ack_writer: Box<dyn Port>,
        matched_tx: SyncSender<Matched>,
        on_frame: Option<FrameCallback>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader,
            ack_writer,
            matched_tx,
            on_frame,
            stop,
            reassembler: StreamReassembler::new(),
        }
    }

    pub(super) fn run(mut self) {
        debug!("receiver loop started");
        let mut chunk = [0u8; 256];
        while !self.stop.load(Ordering::SeqCst) {
            match self.reader.read(&mut chunk) {
                Ok(0) => {},
                Ok(n) => self.ingest(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                    ) => {},
                Err(e) => {
                    warn!("link read failed: {e}");
                    self.stop.store(true, Ordering::SeqCst);
                    let _ = self.matched_tx.try_send(Matched::Shutdown);
                    break;
                },
            }
        }
        debug!("receiver loop stopped");
    }

    fn ingest(&mut self, bytes: &[u8]) {
        trace!("read {} bytes from link", bytes.len());
        for record in self.reassembler.feed(bytes) {
            if !record.is_valid() {
                // MaybeMore candidates stay buffered inside the
                // reassembler; anything else invalid is dropped here.
                if record.classification != Classification::MaybeMore {
                    warn!(
                        "discarding invalid frame candidate ({} bytes, checksum ok: {})",
                        record.bytes().len(),
                        record.valid_checksum
                    );
                }
                continue;
            }
            self.route(record);
        }
    }

    fn route(&mut self, record: FrameRecord) {
        let (Some(index), Some(device_id), Some(command)) = (
            record.pack_index(),
            record.device_id(),
            record.command(),
        ) else {
            return;
        };

        if command != cmd::ACK {
            // Every valid application frame is acknowledged immediately,
            // whether or not anyone is waiting for it.
            let ack = Frame::ack(device_id, index);
            if let Err(e) = self.ack_writer.write_all_bytes(&ack) {
                warn!("link write failed while acking: {e}");
                self.stop.store(true, Ordering::SeqCst);
                let _ = self.matched_tx.try_send(Matched::Shutdown);
                return;
            }
            trace!("auto-acked cmd {command:#04X} index {index}");

            if let Some(on_frame) = self.on_frame.as_mut() {
                on_frame(&record);
            }
        }

        // Publish toward the pending request, if any. A full channel means
        // nothing is draining; the frame has been acked and can be dropped.
        if self.matched_tx.try_send(Matched::Record(record)).is_err() {
            trace!("no waiter for cmd {command:#04X}, dropped after ack");
        }
    }
}
