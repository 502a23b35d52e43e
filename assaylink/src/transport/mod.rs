//! Duplex transport engine for the analyzer link.
//!
//! One open connection runs exactly two long-lived loops:
//!
//! - the **sender** owns the write handle, the outgoing command queue, and
//!   the single in-flight request slot;
//! - the **receiver** owns a cloned read handle with a short poll timeout,
//!   feeds every read into the [`StreamReassembler`](crate::protocol::StreamReassembler),
//!   auto-acknowledges valid frames, and publishes them on the
//!   matched-response channel.
//!
//! The two loops share nothing but those two bounded channels and a stop
//! flag. Responses are matched against the currently pending request only:
//! the sender drains the matched-response channel before every write and
//! filters by the expected reply codes while waiting, so a frame that
//! arrived before its request was sent can never satisfy it.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
#[cfg(feature = "native")]
use crate::port::NativePort;
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::SerialConfig;
use crate::protocol::{FrameRecord, correlate};

use worker::{Dispatch, Matched, ReceiverLoop, SenderLoop};

/// Depth of the outgoing command queue.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Depth of the matched-response channel. Unsolicited frames beyond this
/// are dropped after their auto-ack; nothing is waiting for them.
const MATCHED_QUEUE_DEPTH: usize = 8;

/// Outcome of a single command exchange.
#[derive(Debug)]
pub enum Outcome {
    /// A correlated reply arrived before the deadline.
    Success(FrameRecord),
    /// The command expects no reply and was written to the link.
    Sent,
    /// The deadline elapsed without a matching reply. The core never
    /// retries; retry policy belongs to the caller.
    Timeout,
}

/// Subscriber invoked by the receiver for every valid non-acknowledgment
/// frame, after its auto-ack has been written.
pub type FrameCallback = Box<dyn FnMut(&FrameRecord) + Send>;

/// Handle to an open analyzer connection.
///
/// Dropping the transport closes it; [`close`](Self::close) does the same
/// explicitly and guarantees both loops have stopped and the link is
/// released before returning.
pub struct Transport {
    dispatch_tx: SyncSender<Dispatch>,
    matched_tx: SyncSender<Matched>,
    stop: Arc<AtomicBool>,
    sender: Mutex<Option<JoinHandle<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    port_name: String,
}

impl Transport {
    /// Open a serial port and start the worker loops.
    #[cfg(feature = "native")]
    pub fn open(config: &SerialConfig) -> Result<Self> {
        Self::open_with(config, None)
    }

    /// Open with a frame subscriber for unsolicited traffic.
    #[cfg(feature = "native")]
    pub fn open_with_callback(config: &SerialConfig, on_frame: FrameCallback) -> Result<Self> {
        Self::open_with(config, Some(on_frame))
    }

    #[cfg(feature = "native")]
    fn open_with(config: &SerialConfig, on_frame: Option<FrameCallback>) -> Result<Self> {
        let port = NativePort::open(config)?;
        info!("opened analyzer link on {}", config.port_name);
        Self::with_port(Box::new(port), on_frame)
    }

    /// Start the worker loops over an already opened port.
    ///
    /// The port is cloned twice: a read handle with a short poll timeout
    /// for the receiver and an ack write handle; the original stays with
    /// the sender for command frames.
    pub fn with_port(port: Box<dyn Port>, on_frame: Option<FrameCallback>) -> Result<Self> {
        let mut reader = port.try_clone()?;
        reader.set_timeout(worker::READ_POLL)?;
        let ack_writer = port.try_clone()?;
        let port_name = port.name().to_string();

        let stop = Arc::new(AtomicBool::new(false));
        let (dispatch_tx, dispatch_rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
        let (matched_tx, matched_rx) = mpsc::sync_channel(MATCHED_QUEUE_DEPTH);

        let receiver = ReceiverLoop::new(
            reader,
            ack_writer,
            matched_tx.clone(),
            on_frame,
            Arc::clone(&stop),
        );
        let receiver = std::thread::Builder::new()
            .name("assaylink-recv".into())
            .spawn(move || receiver.run())?;

        let sender = SenderLoop::new(port, dispatch_rx, matched_rx, Arc::clone(&stop));
        let sender = std::thread::Builder::new()
            .name("assaylink-send".into())
            .spawn(move || sender.run())?;

        Ok(Self {
            dispatch_tx,
            matched_tx,
            stop,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            port_name,
        })
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Send a command and wait for its correlated reply.
    ///
    /// The reply set and deadline come from the correlation table; commands
    /// without a table entry complete on the generic acknowledgment within
    /// the default deadline.
    pub fn send(&self, device_id: u8, command: u8, payload: Option<&[u8]>) -> Result<Outcome> {
        self.send_with_deadline(device_id, command, payload, correlate::reply_deadline(command))
    }

    /// Send a command with an explicit reply deadline.
    pub fn send_with_deadline(
        &self,
        device_id: u8,
        command: u8,
        payload: Option<&[u8]>,
        deadline: Duration,
    ) -> Result<Outcome> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.dispatch_tx
            .send(Dispatch {
                device_id,
                command,
                payload: payload.map(<[u8]>::to_vec).unwrap_or_default(),
                deadline,
                reply: reply_tx,
            })
            .map_err(|_| Error::Closed)?;
        reply_rx.recv().map_err(|_| Error::Closed)?
    }

    /// Stop both loops and release the link.
    ///
    /// Safe to call more than once. A sender blocked on a reply is woken
    /// through the matched-response channel sentinel; its caller observes
    /// [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.stop.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("stopping transport loops on {}", self.port_name);
        let _ = self.matched_tx.try_send(Matched::Shutdown);
        if let Some(handle) = take_handle(&self.sender) {
            let _ = handle.join();
        }
        if let Some(handle) = take_handle(&self.receiver) {
            let _ = handle.join();
        }
        info!("closed analyzer link on {}", self.port_name);
        Ok(())
    }
}

fn take_handle(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take()
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::protocol::frame::Frame;
    use crate::protocol::{StreamReassembler, cmd};
    use std::time::Instant;

    /// Peer behavior: confirm every non-ack command with the generic ack.
    fn acking_responder(buf: &[u8]) -> Vec<u8> {
        let Ok(frame) = Frame::decode(buf) else {
            return Vec::new();
        };
        if frame.cmd == cmd::ACK {
            return Vec::new();
        }
        Frame::ack(frame.device_id, frame.pack_index)
    }

    /// Build a transport over a mock port, keeping a handle to the shared
    /// buffers for injection and inspection.
    fn mock_transport(
        responder: Option<fn(&[u8]) -> Vec<u8>>,
        on_frame: Option<FrameCallback>,
    ) -> (MockPort, Transport) {
        let _ = env_logger::Builder::from_default_env()
            .is_test(true)
            .try_init();
        let mock = match responder {
            Some(f) => MockPort::with_responder(f),
            None => MockPort::new(),
        };
        let port = mock.try_clone().unwrap();
        let transport = Transport::with_port(port, on_frame).unwrap();
        (mock, transport)
    }

    fn wait_for_receiver() {
        std::thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn test_send_completes_on_generic_ack() {
        let (_mock, transport) = mock_transport(Some(acking_responder), None);

        let outcome = transport.send(0x13, cmd::STATUS, None).unwrap();
        let Outcome::Success(record) = outcome else {
            panic!("expected Success, got {outcome:?}");
        };
        assert_eq!(record.command(), Some(cmd::ACK));

        transport.close().unwrap();
    }

    #[test]
    fn test_pack_index_increments_per_send() {
        let (mock, transport) = mock_transport(Some(acking_responder), None);

        for _ in 0..3 {
            transport.send(0x13, cmd::STATUS, None).unwrap();
        }
        transport.close().unwrap();

        let mut reassembler = StreamReassembler::new();
        let indices: Vec<u8> = reassembler
            .feed(&mock.written())
            .iter()
            .filter(|rec| rec.is_valid())
            .filter_map(FrameRecord::pack_index)
            .collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_unsolicited_frame_is_auto_acked_and_delivered() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::default();
        let seen_cb = Arc::clone(&seen);
        let (mock, transport) = mock_transport(
            None,
            Some(Box::new(move |record: &FrameRecord| {
                if let Some(command) = record.command() {
                    seen_cb
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(command);
                }
            })),
        );

        // Peer pushes an unsolicited measurement report (cmd 0x70)
        let unsolicited = Frame::encode(0x13, 0x07, 0x70, Some(&[0x21, 0x05])).unwrap();
        mock.inject_rx(&unsolicited);
        wait_for_receiver();

        // Subscriber saw it
        assert_eq!(
            seen.lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .as_slice(),
            &[0x70]
        );

        // And the auto-ack went out with the transformed index
        let ack = Frame::decode(&mock.written()).unwrap();
        assert_eq!(ack.cmd, cmd::ACK);
        assert_eq!(ack.device_id, 0x13);
        assert_eq!(ack.pack_index, 0xFF - 0x07);
        assert_eq!(ack.payload, vec![0x07]);

        transport.close().unwrap();
    }

    #[test]
    fn test_stale_reply_never_matches_later_request() {
        let (mock, transport) = mock_transport(None, None);

        // A stray reply arrives before any request is pending
        let stray = Frame::encode(0x13, 0x09, cmd::REBOOT_DONE, None).unwrap();
        mock.inject_rx(&stray);
        wait_for_receiver();

        // The next request expects a different code; the stray must not
        // short-circuit its wait
        let outcome = transport
            .send_with_deadline(0x13, cmd::STATUS, None, Duration::from_millis(150))
            .unwrap();
        assert!(matches!(outcome, Outcome::Timeout), "got {outcome:?}");

        transport.close().unwrap();
    }

    #[test]
    fn test_timeout_fires_within_deadline() {
        let (_mock, transport) = mock_transport(None, None);

        let deadline = Duration::from_millis(200);
        let start = Instant::now();
        let outcome = transport
            .send_with_deadline(0x13, cmd::STATUS, None, deadline)
            .unwrap();
        let elapsed = start.elapsed();

        assert!(matches!(outcome, Outcome::Timeout));
        assert!(elapsed >= deadline, "timed out early: {elapsed:?}");
        assert!(
            elapsed < deadline + Duration::from_millis(500),
            "timed out late: {elapsed:?}"
        );

        transport.close().unwrap();
    }

    #[test]
    fn test_terminator_chunk_returns_without_waiting() {
        let (mock, transport) = mock_transport(None, None);

        let start = Instant::now();
        let outcome = transport.send(0x13, cmd::FW_CHUNK, Some(&[0])).unwrap();
        assert!(matches!(outcome, Outcome::Sent), "got {outcome:?}");
        assert!(start.elapsed() < Duration::from_millis(500));

        // The frame still went out on the wire
        let frame = Frame::decode(&mock.written()).unwrap();
        assert_eq!(frame.cmd, cmd::FW_CHUNK);
        assert_eq!(frame.payload, vec![0]);

        transport.close().unwrap();
    }

    #[test]
    fn test_close_unblocks_pending_send() {
        let (_mock, transport) = mock_transport(None, None);

        std::thread::scope(|s| {
            let pending = s.spawn(|| {
                transport.send_with_deadline(0x13, cmd::STATUS, None, Duration::from_secs(30))
            });
            std::thread::sleep(Duration::from_millis(150));

            let start = Instant::now();
            transport.close().unwrap();
            assert!(start.elapsed() < Duration::from_secs(2));

            let result = pending.join().unwrap();
            assert!(matches!(result, Err(Error::Closed)), "got {result:?}");
        });
    }

    #[test]
    fn test_send_after_close_fails() {
        let (_mock, transport) = mock_transport(Some(acking_responder), None);
        transport.close().unwrap();
        let result = transport.send(0x13, cmd::STATUS, None);
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[test]
    fn test_link_failure_is_fatal() {
        let (mut mock, transport) = mock_transport(None, None);

        // Simulate the link dying under the loops
        crate::port::Port::close(&mut mock).unwrap();
        wait_for_receiver();

        let result = transport.send(0x13, cmd::STATUS, None);
        assert!(result.is_err());

        transport.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_mock, transport) = mock_transport(None, None);
        transport.close().unwrap();
        transport.close().unwrap();
    }
}
