//! Protocol and radio configuration constants

/// Default operational LoRa profile, used when nothing is persisted
pub mod radio_defaults {
    /// US ISM band frequency
    pub const FREQUENCY_MHZ: f32 = 915.0;
    pub const BANDWIDTH_KHZ: f32 = 125.0;
    pub const SPREADING_FACTOR: u8 = 9;
    /// Coding rate 4/5
    pub const CODING_RATE: u8 = 5;
    pub const TX_POWER_DBM: i8 = 17;
}

/// Fixed control profile for boot-time discovery.
///
/// Transmit power is not part of the profile; the live value is kept.
pub mod control_channel {
    pub const FREQUENCY_MHZ: f32 = 915.0;
    pub const BANDWIDTH_KHZ: f32 = 125.0;
    pub const SPREADING_FACTOR: u8 = 9;
    pub const CODING_RATE: u8 = 5;
}

/// Legal value sets for radio parameters
pub mod legal {
    pub const SPREADING_FACTORS: [u8; 6] = [7, 8, 9, 10, 11, 12];
    pub const CODING_RATES: [u8; 4] = [5, 6, 7, 8];
    pub const TX_POWERS_DBM: [i8; 10] = [2, 3, 5, 8, 10, 12, 15, 17, 20, 22];
    /// SX1262 synthesiser range
    pub const MIN_FREQUENCY_MHZ: f32 = 150.0;
    pub const MAX_FREQUENCY_MHZ: f32 = 960.0;
}

/// Parameter synchronisation timing
pub mod sync {
    /// Number of CFG frames sent by the originator before applying
    pub const REPEAT_COUNT: u8 = 8;
    pub const REPEAT_INTERVAL_MS: u64 = 300;
    /// Minimum quiet time after any transmission before a CFG repeat
    pub const INTER_FRAME_GUARD_MS: u64 = 50;

    /// Delay before a booting originator announces, so peers can start listening
    pub const BOOT_LEAD_IN_MS: u32 = 750;
    pub const CONTROL_ANNOUNCE_REPEATS: u8 = 6;
    pub const CONTROL_ANNOUNCE_INTERVAL_MS: u32 = 250;
    pub const CONTROL_LISTEN_WINDOW_MS: u64 = 6000;
    pub const CONTROL_LISTEN_POLL_MS: u32 = 50;
}

/// Firmware cascade timing and sizing
pub mod cascade {
    /// Notify rounds; each round is AVAILABLE, VERSION, UPDATE_NOW
    pub const NOTIFY_REPEATS: u8 = 10;
    pub const NOTIFY_INTERVAL_MS: u64 = 200;
    pub const REQUEST_WINDOW_MS: u64 = 15_000;

    pub const CHUNK_SIZE: usize = 200;
    pub const CHUNK_GAP_MS: u64 = 50;

    /// Advertised session timeout: base plus an allowance per chunk
    pub const SESSION_TIMEOUT_BASE_MS: u32 = 30_000;
    pub const SESSION_TIMEOUT_PER_CHUNK_MS: u32 = 250;

    /// Reassembly buffer on the receiving node
    pub const BUFFER_CAPACITY: usize = 8 * 1024;
}

/// Node loop timing
pub mod node {
    /// Bounded receive wait per tick
    pub const RX_POLL_MS: u32 = 50;
    pub const HEARTBEAT_INTERVAL_MS: u64 = 2000;
    /// Status events retained for the display layer
    pub const STATUS_QUEUE_LEN: usize = 8;
}

/// SX1262 board wiring (WIO-SX1262 module)
pub mod sx1262 {
    /// TCXO supply on DIO3, 0x02 = 1.8 V
    pub const TCXO_VOLTAGE_CODE: u8 = 0x02;

    /// PA over-current limit
    pub const CURRENT_LIMIT_MA: u16 = 140;

    /// Largest payload the modem accepts in one packet
    pub const MAX_PAYLOAD: usize = 255;

    /// Upper bound on waiting for TX done
    pub const TX_TIMEOUT_MS: u32 = 10_000;
}

/// Protocol constants
pub mod protocol {
    /// Maximum radio frame size
    pub const MAX_FRAME_SIZE: usize = 256;

    /// Firmware version running on this node
    pub const VERSION_MAJOR: u8 = 0;
    pub const VERSION_MINOR: u8 = 1;
    pub const VERSION_PATCH: u8 = 0;
}
