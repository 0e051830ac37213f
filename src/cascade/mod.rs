//! Firmware cascade over the operational channel
//!
//! A Receiver that obtained a new image announces it with a repeated
//! notify burst, then waits for `REQUEST_UPDATE`. On a request it streams
//! the whole image once, in fixed-size chunks, and returns to idle whatever
//! the outcome. A Sender answers an announcement with a single
//! `REQUEST_UPDATE`, reassembles the stream, verifies it on `OTA_END` and
//! hands it to the installer.
//!
//! Known limitation: chunks are never acknowledged or retransmitted. A lost
//! chunk fails the whole session at verification and the Sender has to
//! request again.
//!
//! ```text
//! Distributor: IDLE -> NOTIFYING -> AWAITING_REQUEST -> ACKED -> TRANSFERRING -> IDLE
//! Receiver:    IDLE -> REQUESTED -> ACKED -> TRANSFERRING -> VERIFYING -> IDLE
//! ```

pub mod outbound;
pub mod session;

pub use outbound::{Outbound, OutboundStep};
pub use session::{CascadeSession, VerifyError};

use crate::config::cascade::{CHUNK_GAP_MS, NOTIFY_INTERVAL_MS, NOTIFY_REPEATS, REQUEST_WINDOW_MS};
use crate::firmware::FirmwareSource;
use crate::node::NodeRole;
use crate::protocol::{FrameSerialiser, Message, MessageParser, Tag};
use crate::radio::{Link, Transport};
use core::fmt::Write;
use heapless::String;
use log::{info, warn};

/// Frames per notify round: AVAILABLE, VERSION, UPDATE_NOW
const NOTIFY_FRAMES_PER_ROUND: u8 = 3;

/// Longest advertised version string kept
pub const MAX_VERSION_LEN: usize = 16;

/// Observable cascade state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    Idle,
    /// Distributor repeating the announcement
    Notifying,
    /// Distributor listening for a request
    AwaitingRequest,
    /// Receiver sent `REQUEST_UPDATE`, waiting for the stream
    Requested,
    /// Request acknowledged, stream not started yet
    Acked,
    /// Chunks flowing (either direction)
    Transferring,
}

/// Why a cascade ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Notify window closed without a request
    NoRequester,
    /// Distributor had no image to send
    NoFirmware,
    /// Request sent but no transfer started in time
    NoTransfer,
    /// Session deadline passed before `OTA_END`
    Timeout,
    /// Fewer bytes than announced
    Incomplete { received: u32, expected: u32 },
    /// Image CRC-32 did not match
    Checksum,
    /// Installer refused the image
    InstallRejected,
    /// Distributor's image disappeared or changed mid-stream
    ImageUnavailable,
}

/// Terminal result of the last cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    /// Receiver verified and installed an image
    Complete { size: u32 },
    /// Distributor streamed the whole image
    Sent { size: u32 },
    Failed(FailureReason),
}

/// Something the node loop may want to surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeEvent {
    NotifyStarted,
    RequestSent,
    RequestReceived,
    SessionStarted { size: u32 },
    Progress { percent: u8 },
    VersionAdvertised,
    Finished(CascadeOutcome),
}

enum Phase {
    Idle,
    Notifying {
        frames_sent: u8,
        last_tx_ms: Option<u64>,
    },
    AwaitingRequest {
        deadline_ms: u64,
    },
    Outbound(Outbound),
    Requested {
        deadline_ms: u64,
        acked: bool,
    },
    Receiving(CascadeSession),
}

/// Firmware cascade engine, one per node
pub struct FirmwareCascade {
    phase: Phase,
    last_outcome: Option<CascadeOutcome>,
    advertised_version: Option<String<MAX_VERSION_LEN>>,
    malformed_frames: u32,
    parser: MessageParser,
    serialiser: FrameSerialiser,
}

impl FirmwareCascade {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            last_outcome: None,
            advertised_version: None,
            malformed_frames: 0,
            parser: MessageParser::new(),
            serialiser: FrameSerialiser::new(),
        }
    }

    pub fn state(&self) -> CascadeState {
        match &self.phase {
            Phase::Idle => CascadeState::Idle,
            Phase::Notifying { .. } => CascadeState::Notifying,
            Phase::AwaitingRequest { .. } => CascadeState::AwaitingRequest,
            Phase::Outbound(out) if out.step() == OutboundStep::Ack => CascadeState::Acked,
            Phase::Outbound(_) => CascadeState::Transferring,
            Phase::Requested { acked: false, .. } => CascadeState::Requested,
            Phase::Requested { acked: true, .. } => CascadeState::Acked,
            Phase::Receiving(_) => CascadeState::Transferring,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// True while this node is the one putting cascade frames on the air
    pub fn is_transmitting(&self) -> bool {
        matches!(self.phase, Phase::Notifying { .. } | Phase::Outbound(_))
    }

    /// The receive session, if one is open
    pub fn session(&self) -> Option<&CascadeSession> {
        match &self.phase {
            Phase::Receiving(session) => Some(session),
            _ => None,
        }
    }

    pub fn last_outcome(&self) -> Option<CascadeOutcome> {
        self.last_outcome
    }

    /// Version string from the most recent `FW_VERSION` heard
    pub fn advertised_version(&self) -> Option<&str> {
        self.advertised_version.as_deref()
    }

    /// Cascade frames that carried a known tag but could not be parsed
    pub fn malformed_frames(&self) -> u32 {
        self.malformed_frames
    }

    /// Start announcing a new image. Only from idle.
    pub fn begin_notify<F: FirmwareSource>(&mut self, firmware: &mut F) -> Option<CascadeEvent> {
        if !self.is_idle() {
            return None;
        }
        firmware.acknowledge_new_image();
        info!("Cascade: announcing firmware {}", firmware.version());
        self.phase = Phase::Notifying {
            frames_sent: 0,
            last_tx_ms: None,
        };
        Some(CascadeEvent::NotifyStarted)
    }

    /// Ask a distributor for the image without waiting for an announcement.
    ///
    /// Only from idle; any other state already has a cascade in flight.
    pub async fn request_update<T: Transport>(
        &mut self,
        link: &mut Link<T>,
        now_ms: u64,
    ) -> Option<CascadeEvent> {
        if !self.is_idle() {
            return None;
        }
        self.send_request(link, now_ms).await
    }

    /// Handle one received cascade frame
    pub async fn on_frame<T: Transport, F: FirmwareSource>(
        &mut self,
        link: &mut Link<T>,
        firmware: &mut F,
        role: NodeRole,
        frame: &[u8],
        now_ms: u64,
    ) -> Option<CascadeEvent> {
        let message = match self.parser.parse(frame) {
            Ok(message) => message,
            Err(e) => {
                self.malformed_frames = self.malformed_frames.wrapping_add(1);
                warn!("Cascade: frame discarded ({:?})", e);
                return None;
            }
        };

        match message {
            Message::FwUpdateAvailable | Message::UpdateNow => {
                if role == NodeRole::Sender && self.is_idle() {
                    info!("Cascade: update announced, requesting");
                    return self.send_request(link, now_ms).await;
                }
                None
            }
            Message::FwVersion(version) => {
                let mut s = String::new();
                // Longer strings are truncated to what fits
                for c in version.chars() {
                    if s.push(c).is_err() {
                        break;
                    }
                }
                info!("Cascade: peer advertises firmware {}", s.as_str());
                self.advertised_version = Some(s);
                Some(CascadeEvent::VersionAdvertised)
            }
            Message::RequestUpdate => self.on_request(link, firmware, role, now_ms).await,
            Message::UpdateAck => {
                if let Phase::Requested { acked, .. } = &mut self.phase {
                    *acked = true;
                    info!("Cascade: request acknowledged");
                }
                None
            }
            Message::NoFirmware => {
                if matches!(self.phase, Phase::Requested { .. }) {
                    return Some(self.finish(CascadeOutcome::Failed(FailureReason::NoFirmware)));
                }
                None
            }
            Message::OtaStart { size, timeout_ms } => {
                if size == 0 {
                    warn!("Cascade: ignoring OTA_START for an empty image");
                    return None;
                }
                match self.phase {
                    Phase::Idle | Phase::Requested { .. } | Phase::Receiving(_) => {
                        if matches!(self.phase, Phase::Receiving(_)) {
                            info!("Cascade: OTA_START during transfer, restarting session");
                        }
                        info!("Cascade: receiving {} bytes, timeout {} ms", size, timeout_ms);
                        self.phase = Phase::Receiving(CascadeSession::new(size, timeout_ms, now_ms));
                        Some(CascadeEvent::SessionStarted { size })
                    }
                    _ => None,
                }
            }
            Message::OtaData { index, payload } => match &mut self.phase {
                Phase::Receiving(session) => {
                    session.append(index, payload);
                    Some(CascadeEvent::Progress {
                        percent: session.percent(),
                    })
                }
                _ => None,
            },
            Message::OtaEnd { checksum } => {
                let outcome = match &self.phase {
                    Phase::Receiving(session) => {
                        info!("Cascade: OTA_END, verifying");
                        match session.verify(checksum) {
                            Ok(image) => match firmware.install_image(image) {
                                Ok(()) => CascadeOutcome::Complete {
                                    size: image.len() as u32,
                                },
                                Err(_) => CascadeOutcome::Failed(FailureReason::InstallRejected),
                            },
                            Err(VerifyError::Incomplete { received, expected }) => {
                                CascadeOutcome::Failed(FailureReason::Incomplete { received, expected })
                            }
                            Err(VerifyError::Checksum) => {
                                CascadeOutcome::Failed(FailureReason::Checksum)
                            }
                        }
                    }
                    _ => return None,
                };
                Some(self.finish(outcome))
            }
            Message::Ping { .. } | Message::Config(_) => None,
        }
    }

    /// Fail an open receive session once its deadline has passed
    pub fn expire(&mut self, now_ms: u64) -> Option<CascadeEvent> {
        match &self.phase {
            Phase::Receiving(session) if session.is_expired(now_ms) => {
                warn!(
                    "Cascade: session timed out at {}/{} bytes",
                    session.received_size(),
                    session.expected_size()
                );
                Some(self.finish(CascadeOutcome::Failed(FailureReason::Timeout)))
            }
            _ => None,
        }
    }

    /// Advance timers and send the next cascade frame if one is due
    pub async fn poll<T: Transport, F: FirmwareSource>(
        &mut self,
        link: &mut Link<T>,
        firmware: &mut F,
        now_ms: u64,
    ) -> Option<CascadeEvent> {
        match &mut self.phase {
            Phase::Idle => None,
            Phase::Receiving(_) => self.expire(now_ms),
            Phase::Requested { deadline_ms, .. } => {
                if now_ms >= *deadline_ms {
                    warn!("Cascade: no transfer followed the request");
                    return Some(self.finish(CascadeOutcome::Failed(FailureReason::NoTransfer)));
                }
                None
            }
            Phase::AwaitingRequest { deadline_ms } => {
                if now_ms >= *deadline_ms {
                    warn!("Cascade: request window closed, no requester");
                    return Some(self.finish(CascadeOutcome::Failed(FailureReason::NoRequester)));
                }
                None
            }
            Phase::Notifying {
                frames_sent,
                last_tx_ms,
            } => {
                let due = last_tx_ms.map_or(true, |last| now_ms.saturating_sub(last) >= NOTIFY_INTERVAL_MS);
                if !due {
                    return None;
                }

                let frame = match *frames_sent % NOTIFY_FRAMES_PER_ROUND {
                    0 => self.serialiser.serialise(&Message::FwUpdateAvailable),
                    1 => {
                        let mut version: String<MAX_VERSION_LEN> = String::new();
                        let _ = write!(version, "{}", firmware.version());
                        self.serialiser.serialise(&Message::FwVersion(&version))
                    }
                    _ => self.serialiser.serialise(&Message::UpdateNow),
                };
                if let Ok(frame) = frame {
                    let _ = link.send(&frame, now_ms).await;
                }
                *frames_sent += 1;
                *last_tx_ms = Some(now_ms);

                if *frames_sent >= NOTIFY_REPEATS * NOTIFY_FRAMES_PER_ROUND {
                    info!("Cascade: notify burst done, listening {} ms", REQUEST_WINDOW_MS);
                    self.phase = Phase::AwaitingRequest {
                        deadline_ms: now_ms.saturating_add(REQUEST_WINDOW_MS),
                    };
                }
                None
            }
            Phase::Outbound(out) => {
                if !out.is_due(CHUNK_GAP_MS, now_ms) || !link.quiet_for(CHUNK_GAP_MS, now_ms) {
                    return None;
                }

                let image = firmware.image().unwrap_or(&[]);
                let frame = match out.frame(image) {
                    Some(Ok(frame)) if image.len() as u32 == out.size() => frame,
                    _ => {
                        warn!("Cascade: image unavailable mid-stream, aborting");
                        return Some(self.finish(CascadeOutcome::Failed(FailureReason::ImageUnavailable)));
                    }
                };
                let _ = link.send(&frame, now_ms).await;

                let size = out.size();
                let percent = if size == 0 {
                    100
                } else {
                    ((out.bytes_sent() as u64 * 100) / size as u64) as u8
                };
                if !out.advance(now_ms) {
                    info!("Cascade: sent {} bytes", size);
                    return Some(self.finish(CascadeOutcome::Sent { size }));
                }
                Some(CascadeEvent::Progress { percent })
            }
        }
    }

    async fn on_request<T: Transport, F: FirmwareSource>(
        &mut self,
        link: &mut Link<T>,
        firmware: &mut F,
        role: NodeRole,
        now_ms: u64,
    ) -> Option<CascadeEvent> {
        if role != NodeRole::Receiver {
            return None;
        }
        match self.phase {
            Phase::Idle | Phase::Notifying { .. } | Phase::AwaitingRequest { .. } => {}
            // One stream serves every listener; later requests are ignored
            _ => return None,
        }

        match firmware.image() {
            Some(image) if !image.is_empty() => {
                info!("Cascade: request received, streaming {} bytes", image.len());
                self.phase = Phase::Outbound(Outbound::new(image));
                Some(CascadeEvent::RequestReceived)
            }
            _ => {
                warn!("Cascade: request received but no image stored");
                let frame = self.serialiser.bare(Tag::NoFirmware);
                let _ = link.send(&frame, now_ms).await;
                if self.is_idle() {
                    None
                } else {
                    Some(self.finish(CascadeOutcome::Failed(FailureReason::NoFirmware)))
                }
            }
        }
    }

    async fn send_request<T: Transport>(
        &mut self,
        link: &mut Link<T>,
        now_ms: u64,
    ) -> Option<CascadeEvent> {
        let frame = self.serialiser.bare(Tag::RequestUpdate);
        let _ = link.send(&frame, now_ms).await;
        self.phase = Phase::Requested {
            deadline_ms: now_ms.saturating_add(REQUEST_WINDOW_MS),
            acked: false,
        };
        Some(CascadeEvent::RequestSent)
    }

    /// Record a terminal outcome and return to idle, discarding any buffer
    fn finish(&mut self, outcome: CascadeOutcome) -> CascadeEvent {
        match outcome {
            CascadeOutcome::Failed(reason) => warn!("Cascade: failed ({:?})", reason),
            _ => info!("Cascade: {:?}", outcome),
        }
        self.phase = Phase::Idle;
        self.last_outcome = Some(outcome);
        CascadeEvent::Finished(outcome)
    }
}

impl Default for FirmwareCascade {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
