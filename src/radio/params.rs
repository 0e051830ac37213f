//! Radio parameter profile and its legal value sets

use crate::config::{control_channel, legal, radio_defaults};

/// Tolerance when matching a decoded bandwidth against the legal set
const BANDWIDTH_EPSILON_KHZ: f32 = 0.05;

/// Reason a radio parameter candidate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// Frequency outside the synthesiser range
    Frequency,
    /// Bandwidth not one of the enumerated values
    Bandwidth,
    /// Spreading factor outside 7..=12
    SpreadingFactor,
    /// Coding rate denominator outside 5..=8
    CodingRate,
    /// Transmit power not one of the enumerated steps
    TxPower,
}

/// LoRa signal bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Khz62_5,
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    /// All legal bandwidths in cycling order
    pub const ALL: [Bandwidth; 4] = [
        Bandwidth::Khz62_5,
        Bandwidth::Khz125,
        Bandwidth::Khz250,
        Bandwidth::Khz500,
    ];

    /// Bandwidth in kHz
    pub fn khz(self) -> f32 {
        match self {
            Bandwidth::Khz62_5 => 62.5,
            Bandwidth::Khz125 => 125.0,
            Bandwidth::Khz250 => 250.0,
            Bandwidth::Khz500 => 500.0,
        }
    }

    /// Match a kHz value against the legal set.
    ///
    /// Peers that print the bandwidth with no decimals send `62` for
    /// 62.5 kHz, so the whole-kHz truncation of each value matches too.
    pub fn from_khz(khz: f32) -> Option<Self> {
        let near = |a: f32, b: f32| {
            let diff = a - b;
            diff < BANDWIDTH_EPSILON_KHZ && diff > -BANDWIDTH_EPSILON_KHZ
        };
        Self::ALL
            .iter()
            .copied()
            .find(|bw| near(bw.khz(), khz) || near(bw.khz() as i32 as f32, khz))
    }

    /// Next bandwidth, wrapping from the last back to the first
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|bw| *bw == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// A complete, operable LoRa channel profile.
///
/// All five fields are applied together; a profile is never partially
/// written to the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioParameters {
    /// Centre frequency in MHz
    pub frequency_mhz: f32,
    pub bandwidth: Bandwidth,
    /// Spreading factor (7-12)
    pub spreading_factor: u8,
    /// Coding rate denominator (5-8 for 4/5 to 4/8)
    pub coding_rate: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
}

impl Default for RadioParameters {
    fn default() -> Self {
        Self {
            frequency_mhz: radio_defaults::FREQUENCY_MHZ,
            bandwidth: Bandwidth::from_khz(radio_defaults::BANDWIDTH_KHZ).unwrap_or(Bandwidth::Khz125),
            spreading_factor: radio_defaults::SPREADING_FACTOR,
            coding_rate: radio_defaults::CODING_RATE,
            tx_power_dbm: radio_defaults::TX_POWER_DBM,
        }
    }
}

impl RadioParameters {
    /// Build a profile from raw field values, checking each against its legal set
    pub fn from_raw(
        frequency_mhz: f32,
        bandwidth_khz: f32,
        spreading_factor: i32,
        coding_rate: i32,
        tx_power_dbm: i32,
    ) -> Result<Self, ParamError> {
        let bandwidth = Bandwidth::from_khz(bandwidth_khz).ok_or(ParamError::Bandwidth)?;
        let spreading_factor =
            u8::try_from(spreading_factor).map_err(|_| ParamError::SpreadingFactor)?;
        let coding_rate = u8::try_from(coding_rate).map_err(|_| ParamError::CodingRate)?;
        let tx_power_dbm = i8::try_from(tx_power_dbm).map_err(|_| ParamError::TxPower)?;

        let params = Self {
            frequency_mhz,
            bandwidth,
            spreading_factor,
            coding_rate,
            tx_power_dbm,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check every field against its legal set
    pub fn validate(&self) -> Result<(), ParamError> {
        if !Self::is_legal_frequency(self.frequency_mhz) {
            return Err(ParamError::Frequency);
        }
        if !legal::SPREADING_FACTORS.contains(&self.spreading_factor) {
            return Err(ParamError::SpreadingFactor);
        }
        if !legal::CODING_RATES.contains(&self.coding_rate) {
            return Err(ParamError::CodingRate);
        }
        if !legal::TX_POWERS_DBM.contains(&self.tx_power_dbm) {
            return Err(ParamError::TxPower);
        }
        Ok(())
    }

    pub fn is_legal_frequency(frequency_mhz: f32) -> bool {
        // False for NaN
        frequency_mhz >= legal::MIN_FREQUENCY_MHZ && frequency_mhz <= legal::MAX_FREQUENCY_MHZ
    }

    /// Same profile with the next legal spreading factor (12 wraps to 7)
    pub fn with_next_spreading_factor(&self) -> Self {
        let sfs = &legal::SPREADING_FACTORS;
        let next = match sfs.iter().position(|sf| *sf == self.spreading_factor) {
            Some(idx) => sfs[(idx + 1) % sfs.len()],
            None => sfs[0],
        };
        Self {
            spreading_factor: next,
            ..*self
        }
    }

    /// Same profile with the next legal bandwidth (500 kHz wraps to 62.5 kHz)
    pub fn with_next_bandwidth(&self) -> Self {
        Self {
            bandwidth: self.bandwidth.next(),
            ..*self
        }
    }

    /// The fixed control profile, carrying this profile's transmit power
    pub fn control_profile(&self) -> Self {
        Self {
            frequency_mhz: control_channel::FREQUENCY_MHZ,
            bandwidth: Bandwidth::from_khz(control_channel::BANDWIDTH_KHZ)
                .unwrap_or(Bandwidth::Khz125),
            spreading_factor: control_channel::SPREADING_FACTOR,
            coding_rate: control_channel::CODING_RATE,
            tx_power_dbm: self.tx_power_dbm,
        }
    }
}
