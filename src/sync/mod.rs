//! Radio parameter synchronisation
//!
//! The originating node repeats a `CFG` frame a fixed number of times and
//! then applies the new profile itself. There is no acknowledgement; the
//! repeat count is the only reliability mechanism. A receiving node applies
//! the first `CFG` it parses and never rebroadcasts.

pub mod discovery;

use crate::config::sync::{INTER_FRAME_GUARD_MS, REPEAT_COUNT, REPEAT_INTERVAL_MS};
use crate::protocol::{FrameSerialiser, Message, MessageParser, ParseError};
use crate::radio::params::{ParamError, RadioParameters};
use crate::radio::{Link, Transport};
use log::{info, warn};

/// Why a change request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// A field is outside its legal set
    InvalidParameters(ParamError),
    /// A firmware cascade currently owns the channel
    Busy,
}

/// Originator-side repeat state for one requested change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingBroadcast {
    pub target: RadioParameters,
    pub remaining_repeats: u8,
    pub last_send_ms: Option<u64>,
}

/// Parameter synchronisation engine
pub struct ParameterSync {
    pending: Option<PendingBroadcast>,
    parse_errors: u32,
    parser: MessageParser,
    serialiser: FrameSerialiser,
}

impl ParameterSync {
    pub fn new() -> Self {
        Self {
            pending: None,
            parse_errors: 0,
            parser: MessageParser::new(),
            serialiser: FrameSerialiser::new(),
        }
    }

    /// Start broadcasting a new profile.
    ///
    /// Live parameters are untouched until the repeats are exhausted. A
    /// request made while another is pending replaces it and restarts the
    /// repeat count.
    pub fn request_change(&mut self, candidate: RadioParameters) -> Result<(), SyncError> {
        if let Err(e) = candidate.validate() {
            warn!("Sync: rejected change request ({:?})", e);
            return Err(SyncError::InvalidParameters(e));
        }

        if self.pending.is_some() {
            info!("Sync: replacing pending broadcast");
        }
        info!(
            "Sync: broadcasting SF{} BW{} x{}",
            candidate.spreading_factor,
            candidate.bandwidth.khz(),
            REPEAT_COUNT
        );
        self.pending = Some(PendingBroadcast {
            target: candidate,
            remaining_repeats: REPEAT_COUNT,
            last_send_ms: None,
        });
        Ok(())
    }

    /// Send the next `CFG` repeat if it is due.
    ///
    /// Returns the target profile once the last repeat has gone out; the
    /// caller applies it. A failed transmit still consumes a repeat.
    pub async fn poll<T: Transport>(
        &mut self,
        link: &mut Link<T>,
        now_ms: u64,
    ) -> Option<RadioParameters> {
        let pending = self.pending.as_mut()?;

        let due = pending
            .last_send_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= REPEAT_INTERVAL_MS);
        if !due || !link.quiet_for(INTER_FRAME_GUARD_MS, now_ms) {
            return None;
        }

        match self.serialiser.serialise(&Message::Config(pending.target)) {
            Ok(frame) => {
                // Failures are counted by the link; repetition is the retry policy
                let _ = link.send(&frame, now_ms).await;
            }
            Err(_) => warn!("Sync: CFG frame did not fit"),
        }
        pending.last_send_ms = Some(now_ms);
        pending.remaining_repeats = pending.remaining_repeats.saturating_sub(1);

        if pending.remaining_repeats > 0 {
            return None;
        }

        let target = pending.target;
        self.pending = None;
        info!("Sync: repeats exhausted, applying locally");
        Some(target)
    }

    /// Handle a received `CFG` frame.
    ///
    /// Returns the profile to apply, or `None` (and counts a parse error)
    /// if the frame is malformed or names an illegal profile.
    pub fn on_config_frame(&mut self, frame: &[u8]) -> Option<RadioParameters> {
        match self.parser.parse(frame) {
            Ok(Message::Config(params)) => {
                info!(
                    "Sync: received CFG SF{} BW{} CR{} TX{}",
                    params.spreading_factor,
                    params.bandwidth.khz(),
                    params.coding_rate,
                    params.tx_power_dbm
                );
                Some(params)
            }
            Ok(_) | Err(ParseError::Empty) | Err(ParseError::UnknownTag) => {
                self.record_parse_error();
                None
            }
            Err(e) => {
                warn!("Sync: CFG discarded ({:?})", e);
                self.record_parse_error();
                None
            }
        }
    }

    fn record_parse_error(&mut self) {
        self.parse_errors = self.parse_errors.wrapping_add(1);
    }

    pub fn pending(&self) -> Option<&PendingBroadcast> {
        self.pending.as_ref()
    }

    pub fn is_broadcasting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn parse_errors(&self) -> u32 {
        self.parse_errors
    }
}

impl Default for ParameterSync {
    fn default() -> Self {
        Self::new()
    }
}
