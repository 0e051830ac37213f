//! Radio transport trait for abstraction and testability
//!
//! This trait defines the "send one frame / receive one frame within a
//! deadline" primitive the protocol engine rides on, allowing the actual
//! hardware driver to be swapped with a mock for testing.

use crate::config::protocol::MAX_FRAME_SIZE;
use crate::radio::params::RadioParameters;
use core::future::Future;
use heapless::Vec;

/// Errors that can occur during transport operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No frame arrived before the deadline
    Timeout,
    /// CRC error in received frame
    CrcError,
    /// Transmission failed
    TransmitFailed,
    /// Reception failed
    ReceiveFailed,
    /// Radio refused the channel configuration
    InvalidConfig,
    /// Radio not initialised
    NotInitialised,
    /// SPI or control pin failure
    Bus,
    /// The modem stayed busy past its limit
    BusyTimeout,
}

/// Received frame with metadata
#[derive(Debug, Clone)]
pub struct RxFrame {
    /// Received data
    pub data: Vec<u8, MAX_FRAME_SIZE>,
    /// Received Signal Strength Indicator in dBm
    pub rssi: i16,
    /// Signal-to-Noise Ratio in dB
    pub snr: i8,
}

/// Abstract radio transport.
///
/// Exactly one channel configuration is active at a time. `reconfigure` is
/// synchronous from the caller's point of view: once it resolves, the next
/// transmit/receive uses the new profile.
pub trait Transport {
    /// Initialise the radio hardware on the given profile
    fn init(&mut self, params: &RadioParameters) -> impl Future<Output = Result<(), TransportError>>;

    /// Transmit one frame
    fn transmit(&mut self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>>;

    /// Receive one frame, giving up after `timeout_ms`
    fn receive(&mut self, timeout_ms: u32) -> impl Future<Output = Result<RxFrame, TransportError>>;

    /// Switch the active channel profile
    fn reconfigure(
        &mut self,
        params: &RadioParameters,
    ) -> impl Future<Output = Result<(), TransportError>>;
}
