//! Persistent settings
//!
//! Radio parameters and the node role survive restarts in a small key/value
//! store. Absent or illegal values fall back to the compiled-in defaults,
//! one field at a time.
//!
//! | Key      | Type  | Meaning                      |
//! |----------|-------|------------------------------|
//! | `freq`   | float | Centre frequency, MHz        |
//! | `bw`     | float | Bandwidth, kHz               |
//! | `sf`     | int   | Spreading factor             |
//! | `cr`     | int   | Coding rate denominator      |
//! | `tx`     | int   | Transmit power, dBm          |
//! | `sender` | bool  | `true` when the role is Sender |

use crate::config::legal;
use crate::node::NodeRole;
use crate::radio::params::{Bandwidth, RadioParameters};
use log::warn;

/// Setting keys
pub mod keys {
    pub const FREQUENCY: &str = "freq";
    pub const BANDWIDTH: &str = "bw";
    pub const SPREADING_FACTOR: &str = "sf";
    pub const CODING_RATE: &str = "cr";
    pub const TX_POWER: &str = "tx";
    pub const SENDER: &str = "sender";
}

/// A stored value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl SettingValue {
    fn as_float(self) -> Option<f32> {
        match self {
            SettingValue::Float(v) => Some(v),
            SettingValue::Int(v) => Some(v as f32),
            SettingValue::Bool(_) => None,
        }
    }

    fn as_int(self) -> Option<i32> {
        match self {
            SettingValue::Int(v) => Some(v),
            _ => None,
        }
    }

    fn as_bool(self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// Errors from the settings store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store rejected the write
    WriteFailed,
}

/// Key/value persistence
pub trait SettingsStore {
    fn load(&self, key: &str) -> Option<SettingValue>;
    fn save(&mut self, key: &str, value: SettingValue) -> Result<(), StoreError>;
}

/// Read one field, keeping the default when it is absent, mistyped or illegal
fn load_field<S, T>(
    store: &S,
    key: &str,
    decode: impl Fn(SettingValue) -> Option<T>,
    default: T,
) -> T
where
    S: SettingsStore,
{
    match store.load(key) {
        None => default,
        Some(raw) => decode(raw).unwrap_or_else(|| {
            warn!("Settings: persisted {} = {:?} illegal, using default", key, raw);
            default
        }),
    }
}

/// Load the persisted radio profile and role.
///
/// Each radio field is checked against its own legal set and falls back to
/// its default alone, so one bad value never discards the others.
pub fn load_settings<S: SettingsStore>(store: &S) -> (RadioParameters, NodeRole) {
    let defaults = RadioParameters::default();

    let params = RadioParameters {
        frequency_mhz: load_field(
            store,
            keys::FREQUENCY,
            |v| v.as_float().filter(|f| RadioParameters::is_legal_frequency(*f)),
            defaults.frequency_mhz,
        ),
        bandwidth: load_field(
            store,
            keys::BANDWIDTH,
            |v| v.as_float().and_then(Bandwidth::from_khz),
            defaults.bandwidth,
        ),
        spreading_factor: load_field(
            store,
            keys::SPREADING_FACTOR,
            |v| {
                v.as_int()
                    .and_then(|sf| u8::try_from(sf).ok())
                    .filter(|sf| legal::SPREADING_FACTORS.contains(sf))
            },
            defaults.spreading_factor,
        ),
        coding_rate: load_field(
            store,
            keys::CODING_RATE,
            |v| {
                v.as_int()
                    .and_then(|cr| u8::try_from(cr).ok())
                    .filter(|cr| legal::CODING_RATES.contains(cr))
            },
            defaults.coding_rate,
        ),
        tx_power_dbm: load_field(
            store,
            keys::TX_POWER,
            |v| {
                v.as_int()
                    .and_then(|tx| i8::try_from(tx).ok())
                    .filter(|tx| legal::TX_POWERS_DBM.contains(tx))
            },
            defaults.tx_power_dbm,
        ),
    };

    let role = match store.load(keys::SENDER).and_then(SettingValue::as_bool) {
        Some(true) | None => NodeRole::Sender,
        Some(false) => NodeRole::Receiver,
    };

    (params, role)
}

/// Persist all five radio fields
pub fn save_parameters<S: SettingsStore>(
    store: &mut S,
    params: &RadioParameters,
) -> Result<(), StoreError> {
    store.save(keys::FREQUENCY, SettingValue::Float(params.frequency_mhz))?;
    store.save(keys::BANDWIDTH, SettingValue::Float(params.bandwidth.khz()))?;
    store.save(
        keys::SPREADING_FACTOR,
        SettingValue::Int(params.spreading_factor as i32),
    )?;
    store.save(keys::CODING_RATE, SettingValue::Int(params.coding_rate as i32))?;
    store.save(keys::TX_POWER, SettingValue::Int(params.tx_power_dbm as i32))?;
    Ok(())
}

/// Persist the node role
pub fn save_role<S: SettingsStore>(store: &mut S, role: NodeRole) -> Result<(), StoreError> {
    store.save(keys::SENDER, SettingValue::Bool(role == NodeRole::Sender))
}
