//! Boot-time discovery on the control channel
//!
//! Two nodes whose persisted operational profiles have drifted apart cannot
//! hear each other. At boot the originator repeats its current profile on the
//! fixed control channel, and a listening node waits there for a bounded
//! window. Both paths restore the operational profile before returning, on
//! every path including errors.

use crate::clock::Clock;
use crate::config::sync::CONTROL_LISTEN_POLL_MS;
use crate::protocol::{FrameSerialiser, Message, Tag};
use crate::radio::params::RadioParameters;
use crate::radio::{Link, Transport, TransportError};
use crate::sync::ParameterSync;
use log::{info, warn};

/// Repeat `current` on the control channel, then return to `current`.
pub async fn announce_on_control<T: Transport, C: Clock>(
    link: &mut Link<T>,
    clock: &C,
    current: &RadioParameters,
    repeats: u8,
    interval_ms: u32,
) -> Result<(), TransportError> {
    match link.enter_control(&current.control_profile()).await {
        Ok(()) => match FrameSerialiser::new().serialise(&Message::Config(*current)) {
            Ok(frame) => {
                for _ in 0..repeats {
                    let _ = link.send(&frame, clock.now_ms()).await;
                    clock.delay_ms(interval_ms).await;
                }
                info!("Discovery: announced current profile x{}", repeats);
            }
            Err(_) => warn!("Discovery: CFG frame did not fit"),
        },
        Err(e) => warn!("Discovery: control channel unavailable ({:?})", e),
    }

    link.restore_operational(current).await
}

/// Listen on the control channel for up to `window_ms`.
///
/// The first `CFG` that parses ends the window. The operational channel is
/// restored to the heard profile if there was one, otherwise to `current`.
/// Returns the heard profile for the caller to adopt and persist.
pub async fn listen_on_control<T: Transport, C: Clock>(
    sync: &mut ParameterSync,
    link: &mut Link<T>,
    clock: &C,
    current: &RadioParameters,
    window_ms: u64,
) -> Result<Option<RadioParameters>, TransportError> {
    let mut heard = None;

    match link.enter_control(&current.control_profile()).await {
        Ok(()) => {
            let deadline = clock.now_ms().saturating_add(window_ms);
            info!("Discovery: listening on control channel for {} ms", window_ms);

            loop {
                let now = clock.now_ms();
                if now >= deadline {
                    break;
                }
                let wait = (deadline - now).min(u32::MAX as u64) as u32;
                if let Some(frame) = link.receive(wait, now).await {
                    if Tag::of(&frame.data) == Some(Tag::Config) {
                        heard = sync.on_config_frame(&frame.data);
                        if heard.is_some() {
                            break;
                        }
                    }
                }
                clock.delay_ms(CONTROL_LISTEN_POLL_MS).await;
            }
        }
        Err(e) => warn!("Discovery: control channel unavailable ({:?})", e),
    }

    let restore_to = heard.unwrap_or(*current);
    link.restore_operational(&restore_to).await?;
    Ok(heard)
}
