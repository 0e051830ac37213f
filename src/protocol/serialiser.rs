//! Message serialiser
//!
//! Serialises outgoing messages into radio frames. Header fields are written
//! as text; `OTA_DATA` payload bytes are appended verbatim.

use crate::config::protocol::MAX_FRAME_SIZE;
use crate::protocol::message::{Message, Tag};
use core::fmt::Write;
use heapless::{String, Vec};

/// One outgoing radio frame
pub type Frame = Vec<u8, MAX_FRAME_SIZE>;

/// Longest text header: `CFG F=... BW=... SF=.. CR=. TX=..` with margin
const MAX_HEADER_LEN: usize = 64;

/// The message does not fit in one radio frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTooLong;

/// Serialiser for radio frames
pub struct FrameSerialiser;

impl FrameSerialiser {
    /// Create a new frame serialiser
    pub fn new() -> Self {
        Self
    }

    /// Serialise a message into one radio frame
    pub fn serialise(&self, message: &Message) -> Result<Frame, FrameTooLong> {
        let mut header: String<MAX_HEADER_LEN> = String::new();
        let tag = message.tag().as_str();

        let written = match message {
            Message::Ping { seq } => write!(header, "{} seq={}", tag, seq),
            Message::Config(p) => write!(
                header,
                "{} F={:.3} BW={:.1} SF={} CR={} TX={}",
                tag,
                p.frequency_mhz,
                p.bandwidth.khz(),
                p.spreading_factor,
                p.coding_rate,
                p.tx_power_dbm
            ),
            Message::OtaStart { size, timeout_ms } => {
                write!(header, "{}:{}:{}", tag, size, timeout_ms)
            }
            Message::OtaData { index, .. } => write!(header, "{}:{}:", tag, index),
            Message::OtaEnd { checksum: Some(crc) } => write!(header, "{}:{:08x}", tag, crc),
            Message::OtaEnd { checksum: None } => write!(header, "{}:", tag),
            Message::FwVersion(version) => write!(header, "{}:{}", tag, version),
            Message::FwUpdateAvailable
            | Message::UpdateNow
            | Message::RequestUpdate
            | Message::UpdateAck
            | Message::NoFirmware => header.push_str(tag).map_err(|_| core::fmt::Error),
        };
        written.map_err(|_| FrameTooLong)?;

        let mut frame = Frame::new();
        frame
            .extend_from_slice(header.as_bytes())
            .map_err(|_| FrameTooLong)?;
        if let Message::OtaData { payload, .. } = message {
            frame.extend_from_slice(payload).map_err(|_| FrameTooLong)?;
        }
        Ok(frame)
    }

    /// Serialise a bare tag message (`UPDATE_ACK`, `REQUEST_UPDATE`, ...)
    pub fn bare(&self, tag: Tag) -> Frame {
        let mut frame = Frame::new();
        // Longest bare tag is far below MAX_FRAME_SIZE
        let _ = frame.extend_from_slice(tag.as_str().as_bytes());
        frame
    }
}

impl Default for FrameSerialiser {
    fn default() -> Self {
        Self::new()
    }
}
