//! Exclusive access wrapper around the transport
//!
//! The link owns the transport and is the only place channel profiles are
//! switched. It also records the bookkeeping every sub-protocol needs:
//! when the last frame went out (for the inter-frame guard) and the signal
//! quality of the last frame heard.

use crate::radio::params::RadioParameters;
use crate::radio::traits::{RxFrame, Transport, TransportError};
use log::{debug, info, warn};

/// Which channel profile the transport is currently tuned to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProfile {
    /// Negotiated profile for normal traffic
    Operational,
    /// Fixed profile used only during discovery
    Control,
}

/// Link-level counters and last-heard signal quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u32,
    pub tx_failures: u32,
    pub frames_received: u32,
    /// Receive errors other than a plain timeout
    pub rx_errors: u32,
    pub last_rssi: Option<i16>,
    pub last_snr: Option<i8>,
    pub last_rx_ms: Option<u64>,
}

/// Transport plus channel and timing bookkeeping
pub struct Link<T> {
    transport: T,
    active: ChannelProfile,
    last_tx_ms: Option<u64>,
    stats: LinkStats,
}

impl<T: Transport> Link<T> {
    /// Wrap a transport; nothing is sent to the radio until `init`
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            active: ChannelProfile::Operational,
            last_tx_ms: None,
            stats: LinkStats::default(),
        }
    }

    /// Bring the radio up on the operational profile
    pub async fn init(&mut self, operational: &RadioParameters) -> Result<(), TransportError> {
        self.transport.init(operational).await?;
        self.active = ChannelProfile::Operational;
        Ok(())
    }

    /// Retune the operational profile in place
    pub async fn apply_operational(
        &mut self,
        params: &RadioParameters,
    ) -> Result<(), TransportError> {
        if self.active != ChannelProfile::Operational {
            warn!("Link: operational retune requested while on control channel");
        }
        self.transport.reconfigure(params).await
    }

    /// Switch to the fixed control profile.
    ///
    /// Callers must pair this with `restore_operational` before returning
    /// to the main tick, on every path.
    pub async fn enter_control(&mut self, control: &RadioParameters) -> Result<(), TransportError> {
        info!("Link: switching to control channel");
        self.transport.reconfigure(control).await?;
        self.active = ChannelProfile::Control;
        Ok(())
    }

    /// Return to the operational profile after a control-channel exchange
    pub async fn restore_operational(
        &mut self,
        operational: &RadioParameters,
    ) -> Result<(), TransportError> {
        info!("Link: restoring operational channel");
        let result = self.transport.reconfigure(operational).await;
        if let Err(e) = result {
            warn!("Link: restore failed ({:?})", e);
        }
        // The transport is no longer on the control profile either way
        self.active = ChannelProfile::Operational;
        result
    }

    /// Transmit one frame, stamping the transmit time even on failure
    pub async fn send(&mut self, frame: &[u8], now_ms: u64) -> Result<(), TransportError> {
        self.last_tx_ms = Some(now_ms);
        match self.transport.transmit(frame).await {
            Ok(()) => {
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                if let Ok(s) = core::str::from_utf8(frame) {
                    debug!("TX: '{}'", s);
                } else {
                    debug!("TX: {} bytes", frame.len());
                }
                Ok(())
            }
            Err(e) => {
                self.stats.tx_failures = self.stats.tx_failures.wrapping_add(1);
                warn!("TX: failed ({:?})", e);
                Err(e)
            }
        }
    }

    /// Receive one frame within `timeout_ms`, recording its signal quality
    pub async fn receive(&mut self, timeout_ms: u32, now_ms: u64) -> Option<RxFrame> {
        match self.transport.receive(timeout_ms).await {
            Ok(frame) => {
                self.stats.frames_received = self.stats.frames_received.wrapping_add(1);
                self.stats.last_rssi = Some(frame.rssi);
                self.stats.last_snr = Some(frame.snr);
                self.stats.last_rx_ms = Some(now_ms);
                Some(frame)
            }
            Err(TransportError::Timeout) => None,
            Err(e) => {
                self.stats.rx_errors = self.stats.rx_errors.wrapping_add(1);
                warn!("RX: failed ({:?})", e);
                None
            }
        }
    }

    /// True once `guard_ms` has passed since the last transmission
    pub fn quiet_for(&self, guard_ms: u64, now_ms: u64) -> bool {
        match self.last_tx_ms {
            Some(last) => now_ms.saturating_sub(last) >= guard_ms,
            None => true,
        }
    }

    pub fn active_profile(&self) -> ChannelProfile {
        self.active
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
