//! Distributing side of a firmware transfer
//!
//! The image is sent once, front to back: `UPDATE_ACK`, `OTA_START`, every
//! `OTA_DATA` chunk, then `OTA_END` with the image CRC-32. One frame goes
//! out per step, spaced by the chunk gap, and nothing is acknowledged.

use crate::config::cascade::{CHUNK_SIZE, SESSION_TIMEOUT_BASE_MS, SESSION_TIMEOUT_PER_CHUNK_MS};
use crate::firmware::image_checksum;
use crate::protocol::{Frame, FrameSerialiser, FrameTooLong, Message};

/// Next frame of an outbound transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundStep {
    Ack,
    Start,
    Data(u32),
    End,
}

/// Outbound transfer plan for one image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound {
    step: OutboundStep,
    size: u32,
    checksum: u32,
    timeout_ms: u32,
    last_tx_ms: Option<u64>,
}

/// Number of chunks an image of `size` bytes is cut into
pub fn chunk_count(size: u32) -> u32 {
    size.div_ceil(CHUNK_SIZE as u32)
}

/// Session timeout advertised in `OTA_START` for an image of `size` bytes
pub fn session_timeout_ms(size: u32) -> u32 {
    SESSION_TIMEOUT_BASE_MS.saturating_add(chunk_count(size).saturating_mul(SESSION_TIMEOUT_PER_CHUNK_MS))
}

/// Byte range of chunk `index`, if it lies inside the image
pub fn chunk_range(index: u32, size: u32) -> Option<core::ops::Range<usize>> {
    let start = (index as usize).checked_mul(CHUNK_SIZE)?;
    if start >= size as usize {
        return None;
    }
    let end = (start + CHUNK_SIZE).min(size as usize);
    Some(start..end)
}

impl Outbound {
    /// Plan a transfer of `image`, starting with the acknowledgement
    pub fn new(image: &[u8]) -> Self {
        let size = image.len() as u32;
        Self {
            step: OutboundStep::Ack,
            size,
            checksum: image_checksum(image),
            timeout_ms: session_timeout_ms(size),
            last_tx_ms: None,
        }
    }

    pub fn step(&self) -> OutboundStep {
        self.step
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// True once the chunk gap has passed since this transfer's last frame
    pub fn is_due(&self, gap_ms: u64, now_ms: u64) -> bool {
        self.last_tx_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= gap_ms)
    }

    /// Build the frame for the current step.
    ///
    /// `image` must be the same image the plan was made from; a data step
    /// past its end yields `None`.
    pub fn frame(&self, image: &[u8]) -> Option<Result<Frame, FrameTooLong>> {
        let serialiser = FrameSerialiser::new();
        let message = match self.step {
            OutboundStep::Ack => Message::UpdateAck,
            OutboundStep::Start => Message::OtaStart {
                size: self.size,
                timeout_ms: self.timeout_ms,
            },
            OutboundStep::Data(index) => {
                let range = chunk_range(index, self.size)?;
                Message::OtaData {
                    index,
                    payload: image.get(range)?,
                }
            }
            OutboundStep::End => Message::OtaEnd {
                checksum: Some(self.checksum),
            },
        };
        Some(serialiser.serialise(&message))
    }

    /// Record that the current step went out and move to the next.
    ///
    /// Returns false once the `OTA_END` step has been sent.
    pub fn advance(&mut self, now_ms: u64) -> bool {
        self.last_tx_ms = Some(now_ms);
        self.step = match self.step {
            OutboundStep::Ack => OutboundStep::Start,
            OutboundStep::Start | OutboundStep::Data(_) => {
                let next = match self.step {
                    OutboundStep::Data(index) => index + 1,
                    _ => 0,
                };
                if next < chunk_count(self.size) {
                    OutboundStep::Data(next)
                } else {
                    OutboundStep::End
                }
            }
            OutboundStep::End => return false,
        };
        true
    }

    /// Bytes covered by the chunks already sent
    pub fn bytes_sent(&self) -> u32 {
        match self.step {
            OutboundStep::Ack | OutboundStep::Start => 0,
            OutboundStep::Data(index) => (index * CHUNK_SIZE as u32).min(self.size),
            OutboundStep::End => self.size,
        }
    }
}
