//! Chunked firmware transfer.
//!
//! A firmware image is streamed to the analyzer as an ordered sequence of
//! chunk commands. Full chunks carry 1024 bytes; the final partial chunk
//! shrinks to the smallest of 1024/512/256 that still holds the remaining
//! bytes and is zero-padded to that boundary. Every chunk payload leads
//! with `chunk_size / 256`, which is how the peer learns the true payload
//! length (the frame header's one-byte length field cannot express it).
//! One terminating chunk with payload `[0]` closes the sequence; the peer
//! does not acknowledge it.
//!
//! Chunks are strictly sequential: the next one is dispatched only after
//! the previous confirmation. The peer's chunk cursor is implicit, so any
//! timeout aborts the whole transfer; there is no partial resume across a
//! power cycle.

use std::path::Path;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{cmd, correlate};
use crate::transport::{Outcome, Transport};

/// Full chunk size in bytes.
pub const CHUNK_SIZE: usize = 1024;

/// Allowed boundaries for the final partial chunk, smallest first.
const CHUNK_BOUNDARIES: [usize; 3] = [256, 512, 1024];

/// Divisor turning a chunk size into its one-byte payload marker.
pub const SIZE_UNIT: usize = 256;

/// Payload of the terminating chunk.
pub const TERMINATOR_PAYLOAD: [u8; 1] = [0];

/// Transfer tuning knobs.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// How long to wait for each chunk confirmation.
    pub chunk_deadline: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            chunk_deadline: correlate::LONG_REPLY_DEADLINE,
        }
    }
}

/// Split an image into chunk command payloads (terminator not included).
///
/// Concatenating the payload bodies reconstructs the image exactly, with
/// zero padding only past the end of the final chunk.
#[must_use]
pub fn plan_chunks(image: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::with_capacity(image.len().div_ceil(CHUNK_SIZE));
    let mut offset = 0;

    while offset < image.len() {
        let remaining = image.len() - offset;
        let size = if remaining >= CHUNK_SIZE {
            CHUNK_SIZE
        } else {
            boundary_for(remaining)
        };
        let take = remaining.min(size);

        // Safe cast: size is one of 256/512/1024, marker fits a byte
        #[allow(clippy::cast_possible_truncation)]
        let marker = (size / SIZE_UNIT) as u8;
        let mut payload = Vec::with_capacity(1 + size);
        payload.push(marker);
        payload.extend_from_slice(&image[offset..offset + take]);
        payload.resize(1 + size, 0);

        chunks.push(payload);
        offset += take;
    }

    chunks
}

/// Smallest allowed boundary that fully contains `remaining` bytes.
fn boundary_for(remaining: usize) -> usize {
    for boundary in CHUNK_BOUNDARIES {
        if remaining <= boundary {
            return boundary;
        }
    }
    CHUNK_SIZE
}

/// Drives a firmware image through an open transport.
pub struct FirmwareUpgrade<'a> {
    transport: &'a Transport,
    device_id: u8,
    config: UpgradeConfig,
}

impl<'a> FirmwareUpgrade<'a> {
    /// Create an upgrade session with default timing.
    pub fn new(transport: &'a Transport, device_id: u8) -> Self {
        Self::with_config(transport, device_id, UpgradeConfig::default())
    }

    /// Create an upgrade session with custom timing.
    pub fn with_config(transport: &'a Transport, device_id: u8, config: UpgradeConfig) -> Self {
        Self {
            transport,
            device_id,
            config,
        }
    }

    /// Read an image file and transfer it.
    pub fn transfer_file<F>(&self, path: &Path, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let image = std::fs::read(path)?;
        info!(
            "transferring firmware {} ({} bytes)",
            path.display(),
            image.len()
        );
        self.transfer(&image, progress)
    }

    /// Transfer image bytes chunk by chunk.
    ///
    /// `progress(sent_bytes, total_bytes)` runs after every confirmed
    /// chunk. Any chunk timeout aborts the sequence; already transferred
    /// chunks are not unwound.
    pub fn transfer<F>(&self, image: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let chunks = plan_chunks(image);
        let total = image.len();
        debug!("image planned as {} chunk(s)", chunks.len());

        let mut sent = 0usize;
        for (index, payload) in chunks.iter().enumerate() {
            let outcome = self.transport.send_with_deadline(
                self.device_id,
                cmd::FW_CHUNK,
                Some(payload),
                self.config.chunk_deadline,
            )?;
            if let Outcome::Timeout = outcome {
                return Err(Error::Upgrade {
                    chunk: index,
                    total: chunks.len(),
                    reason: "no confirmation before deadline".into(),
                });
            }
            sent = (sent + payload.len() - 1).min(total);
            progress(sent, total);
        }

        // Close the sequence; the peer never confirms the terminator.
        self.transport.send_with_deadline(
            self.device_id,
            cmd::FW_CHUNK,
            Some(&TERMINATOR_PAYLOAD),
            self.config.chunk_deadline,
        )?;
        info!("firmware transfer complete ({total} bytes)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::port::Port;
    use crate::protocol::frame::Frame;
    use crate::transport::Transport;
    use std::io::Write as _;

    #[test]
    fn test_plan_full_chunks_only() {
        let image = vec![0xAB; CHUNK_SIZE * 2];
        let chunks = plan_chunks(&image);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.len(), 1 + CHUNK_SIZE);
            assert_eq!(chunk[0], 4);
        }
    }

    #[test]
    fn test_plan_final_chunk_boundaries() {
        // remaining 200 -> 256, 300 -> 512, 600 -> 1024
        for (tail, boundary, marker) in [(200, 256, 1u8), (300, 512, 2), (600, 1024, 4)] {
            let image = vec![0x11; CHUNK_SIZE + tail];
            let chunks = plan_chunks(&image);
            assert_eq!(chunks.len(), 2);
            let last = chunks.last().unwrap();
            assert_eq!(last.len(), 1 + boundary, "tail {tail}");
            assert_eq!(last[0], marker, "tail {tail}");
            // Padding is zero
            assert!(last[1 + tail..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_plan_empty_image() {
        assert!(plan_chunks(&[]).is_empty());
    }

    #[test]
    fn test_plan_reconstructs_image() {
        for size in [1usize, 255, 256, 257, 1023, 1024, 1025, 3000] {
            // Safe cast: test pattern bytes
            #[allow(clippy::cast_possible_truncation)]
            let image: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let chunks = plan_chunks(&image);

            let mut rebuilt = Vec::new();
            for chunk in &chunks {
                assert_eq!(chunk[0] as usize * SIZE_UNIT + 1, chunk.len());
                rebuilt.extend_from_slice(&chunk[1..]);
            }
            assert_eq!(&rebuilt[..size], &image[..], "size {size}");
            assert!(
                rebuilt[size..].iter().all(|b| *b == 0),
                "padding not zero for size {size}"
            );
        }
    }

    /// Peer behavior: confirm each data chunk, stay silent on the
    /// terminator, ignore our acks.
    fn chunk_responder(buf: &[u8]) -> Vec<u8> {
        if buf.len() < 7 || buf[5] != cmd::FW_CHUNK {
            return Vec::new();
        }
        if buf[6] == 0 {
            // Terminator: no confirmation
            return Vec::new();
        }
        Frame::encode(buf[4], buf[3], cmd::FW_CHUNK_STORED, None).unwrap()
    }

    fn mock_transport() -> (MockPort, Transport) {
        let mock = MockPort::with_responder(chunk_responder);
        let port = mock.try_clone().unwrap();
        let transport = Transport::with_port(port, None).unwrap();
        (mock, transport)
    }

    #[test]
    fn test_transfer_drives_chunks_sequentially() {
        let (mock, transport) = mock_transport();
        // Safe cast: test pattern bytes
        #[allow(clippy::cast_possible_truncation)]
        let image: Vec<u8> = (0..2600usize).map(|i| (i % 256) as u8).collect();

        let mut reports = Vec::new();
        let upgrade = FirmwareUpgrade::new(&transport, 0x13);
        upgrade
            .transfer(&image, |sent, total| reports.push((sent, total)))
            .unwrap();
        transport.close().unwrap();

        // 1024 + 1024 + 552 (padded to 1024) = 3 data chunks
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.last(), Some(&(2600, 2600)));

        // The wire carried 3 data chunks and exactly one terminator
        let written = mock.written();
        let mut data_chunks = 0;
        let mut terminators = 0;
        let mut i = 0;
        while i + 7 <= written.len() {
            if written[i] == 0xAA && written[i + 1] == 0x55 && written[i + 5] == cmd::FW_CHUNK {
                if written[i + 6] == 0 {
                    terminators += 1;
                    i += 8;
                } else {
                    data_chunks += 1;
                    i += 7 + written[i + 6] as usize * SIZE_UNIT + 1;
                }
            } else {
                i += 1;
            }
        }
        assert_eq!(data_chunks, 3);
        assert_eq!(terminators, 1);
    }

    #[test]
    fn test_transfer_aborts_on_timeout() {
        // Peer that never confirms anything
        let mock = MockPort::new();
        let port = mock.try_clone().unwrap();
        let transport = Transport::with_port(port, None).unwrap();

        let config = UpgradeConfig {
            chunk_deadline: Duration::from_millis(150),
        };
        let upgrade = FirmwareUpgrade::with_config(&transport, 0x13, config);
        let mut calls = 0;
        let err = upgrade
            .transfer(&[0x55; 300], |_, _| calls += 1)
            .unwrap_err();

        assert!(
            matches!(err, Error::Upgrade { chunk: 0, total: 1, .. }),
            "got {err:?}"
        );
        assert_eq!(calls, 0);
        transport.close().unwrap();
    }

    #[test]
    fn test_transfer_file_roundtrip() {
        let (_mock, transport) = mock_transport();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xC3; 700]).unwrap();
        file.flush().unwrap();

        let upgrade = FirmwareUpgrade::new(&transport, 0x13);
        let mut last = (0, 0);
        upgrade
            .transfer_file(file.path(), |sent, total| last = (sent, total))
            .unwrap();
        assert_eq!(last, (700, 700));
        transport.close().unwrap();
    }

    #[test]
    fn test_transfer_empty_image_sends_only_terminator() {
        let (mock, transport) = mock_transport();
        let upgrade = FirmwareUpgrade::new(&transport, 0x13);
        let mut calls = 0;
        upgrade.transfer(&[], |_, _| calls += 1).unwrap();
        transport.close().unwrap();

        assert_eq!(calls, 0);
        let frame = Frame::decode(&mock.written()).unwrap();
        assert_eq!(frame.cmd, cmd::FW_CHUNK);
        assert_eq!(frame.payload, vec![0]);
    }
}
