//! Response correlation for outgoing commands.
//!
//! Most commands are satisfied by the generic transport-level
//! acknowledgment. Long-running or side-effecting commands answer with a
//! dedicated reply code instead; the fixed table here maps each such command
//! to the codes that complete it, and assigns the longer deadline the
//! analyzer needs while erasing or writing flash.

use std::time::Duration;

use crate::protocol::cmd;

/// Default wait for a correlated reply.
pub const DEFAULT_REPLY_DEADLINE: Duration = Duration::from_secs(2);

/// Wait for commands that trigger a reboot or a flash write on the peer.
pub const LONG_REPLY_DEADLINE: Duration = Duration::from_secs(8);

/// Command codes that complete the given outgoing command.
///
/// Commands without a table entry correlate to the generic
/// acknowledgment.
#[must_use]
pub fn expected_replies(command: u8) -> &'static [u8] {
    match command {
        cmd::REBOOT => &[cmd::REBOOT_DONE],
        cmd::DEBUG_MODE => &[cmd::DEBUG_MODE_STATE],
        cmd::FW_CHUNK => &[cmd::FW_CHUNK_STORED],
        _ => &[cmd::ACK],
    }
}

/// How long to wait for the reply to the given command.
///
/// Reboot and firmware chunk commands keep the peer busy with flash
/// erase/write cycles well past the generic deadline.
#[must_use]
pub fn reply_deadline(command: u8) -> Duration {
    match command {
        cmd::REBOOT | cmd::FW_CHUNK => LONG_REPLY_DEADLINE,
        _ => DEFAULT_REPLY_DEADLINE,
    }
}

/// Whether the command completes without any reply from the peer.
///
/// The terminating empty firmware chunk is written and forgotten; the
/// analyzer never acknowledges it.
#[must_use]
pub fn expects_no_reply(command: u8, payload: &[u8]) -> bool {
    command == cmd::FW_CHUNK && payload == [0]
}
