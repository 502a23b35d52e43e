//! In-memory duplex port for exercising the transport without hardware.
//!
//! Reads and writes are backed by shared buffers; an optional responder
//! closure plays the analyzer's role by turning every host write into reply
//! bytes queued for the next read.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::port::Port;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

#[derive(Default)]
struct Shared {
    /// Bytes queued for the host to read (peer -> host).
    rx: VecDeque<u8>,
    /// Every byte the host has written (host -> peer).
    tx: Vec<u8>,
    /// Scripted peer, invoked once per host write.
    responder: Option<Responder>,
    closed: bool,
}

/// A cloneable in-memory port; clones share the same buffers.
pub(crate) struct MockPort {
    shared: Arc<Mutex<Shared>>,
    timeout: Duration,
    baud_rate: u32,
    name: String,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            timeout: Duration::from_millis(1000),
            baud_rate: 115200,
            name: "mock".to_string(),
        }
    }

    /// Create a port whose peer side is played by `responder`.
    pub(crate) fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let port = Self::new();
        port.lock().responder = Some(Box::new(responder));
        port
    }

    /// Queue bytes as if the peer had sent them unprompted.
    pub(crate) fn inject_rx(&self, bytes: &[u8]) {
        self.lock().rx.extend(bytes.iter().copied());
    }

    /// Everything the host has written so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.lock().tx.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        loop {
            {
                let mut shared = self.lock();
                if shared.closed {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        "port closed",
                    ));
                }
                if !shared.rx.is_empty() {
                    let n = buf.len().min(shared.rx.len());
                    for b in buf.iter_mut().take(n) {
                        *b = shared.rx.pop_front().unwrap_or_default();
                    }
                    return Ok(n);
                }
            }
            if Instant::now() >= deadline {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut shared = self.lock();
        if shared.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ));
        }
        shared.tx.extend_from_slice(buf);
        if let Some(mut responder) = shared.responder.take() {
            let reply = responder(buf);
            shared.rx.extend(reply);
            shared.responder = Some(responder);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut shared = self.lock();
        shared.rx.clear();
        shared.tx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(Self {
            shared: Arc::clone(&self.shared),
            timeout: self.timeout,
            baud_rate: self.baud_rate,
            name: self.name.clone(),
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
