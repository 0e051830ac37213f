//! Human-readable node status
//!
//! The controller queues these for whatever display layer the board has.
//! The queue is bounded; when it is full the oldest event is dropped.

use crate::cascade::{CascadeOutcome, FailureReason, MAX_VERSION_LEN};
use crate::node::NodeRole;
use crate::radio::params::RadioParameters;
use core::fmt;
use heapless::String;

/// One status line
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    RoleChanged(NodeRole),
    PingSent { seq: u32 },
    PingHeard { seq: u32, rssi: i16, snr: i8 },
    /// A change was requested locally and is being broadcast
    ChangeRequested(RadioParameters),
    /// Live parameters changed
    ParametersApplied(RadioParameters),
    FirmwareAnnounced,
    UpdateRequested,
    /// A peer asked this node for its image
    PeerRequestedUpdate,
    PeerFirmware(String<MAX_VERSION_LEN>),
    TransferStarted { size: u32 },
    TransferProgress { percent: u8 },
    CascadeFinished(CascadeOutcome),
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Sender => f.write_str("SENDER"),
            NodeRole::Receiver => f.write_str("RECEIVER"),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoRequester => f.write_str("no requester"),
            FailureReason::NoFirmware => f.write_str("no firmware"),
            FailureReason::NoTransfer => f.write_str("no transfer"),
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::Incomplete { received, expected } => {
                write!(f, "incomplete {}/{}", received, expected)
            }
            FailureReason::Checksum => f.write_str("checksum"),
            FailureReason::InstallRejected => f.write_str("install rejected"),
            FailureReason::ImageUnavailable => f.write_str("image unavailable"),
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::RoleChanged(role) => write!(f, "Mode: {}", role),
            StatusEvent::PingSent { seq } => write!(f, "Ping #{}", seq),
            StatusEvent::PingHeard { seq, rssi, snr } => {
                write!(f, "Ping #{} RSSI {} SNR {}", seq, rssi, snr)
            }
            StatusEvent::ChangeRequested(p) => write!(
                f,
                "Sync SF{} BW{:.1}",
                p.spreading_factor,
                p.bandwidth.khz()
            ),
            StatusEvent::ParametersApplied(p) => write!(
                f,
                "Now SF{} BW{:.1} CR{} TX{}",
                p.spreading_factor,
                p.bandwidth.khz(),
                p.coding_rate,
                p.tx_power_dbm
            ),
            StatusEvent::FirmwareAnnounced => f.write_str("New firmware, announcing"),
            StatusEvent::UpdateRequested => f.write_str("Update requested"),
            StatusEvent::PeerRequestedUpdate => f.write_str("Peer requested update"),
            StatusEvent::PeerFirmware(version) => write!(f, "Peer firmware {}", version),
            StatusEvent::TransferStarted { size } => write!(f, "OTA {} bytes", size),
            StatusEvent::TransferProgress { percent } => write!(f, "OTA {}%", percent),
            StatusEvent::CascadeFinished(CascadeOutcome::Complete { size }) => {
                write!(f, "OTA complete ({} bytes)", size)
            }
            StatusEvent::CascadeFinished(CascadeOutcome::Sent { size }) => {
                write!(f, "OTA sent ({} bytes)", size)
            }
            StatusEvent::CascadeFinished(CascadeOutcome::Failed(reason)) => {
                write!(f, "OTA failed: {}", reason)
            }
        }
    }
}
