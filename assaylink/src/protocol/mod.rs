//! Analyzer link protocol: framing, reassembly, and response correlation.

pub mod correlate;
pub mod frame;
pub mod reassembly;

/// Command codes understood by the analyzer link.
///
/// Only codes with transport-level meaning are named here; payload semantics
/// belong to the business layer. Codes not listed are forwarded verbatim and
/// correlate to the generic [`ACK`](cmd::ACK).
pub mod cmd {
    /// Generic transport-level acknowledgment.
    pub const ACK: u8 = 0x06;

    /// Status poll; replied to with a generic acknowledgment.
    pub const STATUS: u8 = 0x07;

    /// Reboot request. The analyzer answers with [`REBOOT_DONE`] once it is
    /// back up, not with a generic acknowledgment.
    pub const REBOOT: u8 = 0x2A;

    /// Reboot completion notice.
    pub const REBOOT_DONE: u8 = 0x2B;

    /// Debug mode toggle.
    pub const DEBUG_MODE: u8 = 0x3C;

    /// Debug mode state report.
    pub const DEBUG_MODE_STATE: u8 = 0x3D;

    /// Firmware chunk transfer.
    pub const FW_CHUNK: u8 = 0x4D;

    /// Firmware chunk stored confirmation.
    pub const FW_CHUNK_STORED: u8 = 0x4E;
}

// Re-export common types
pub use correlate::{expected_replies, expects_no_reply, reply_deadline};
pub use frame::{Frame, SYNC, checksum};
pub use reassembly::{Classification, FrameRecord, StreamReassembler};
