//! SX1262 transport
//!
//! Drives an SX1262 over an async SPI bus with manual NSS, BUSY and DIO1
//! handling. Between operations the modem sits in continuous receive so
//! nothing is missed while the node loop is busy elsewhere.

use crate::config::protocol::MAX_FRAME_SIZE;
use crate::config::sx1262::{CURRENT_LIMIT_MA, MAX_PAYLOAD, TCXO_VOLTAGE_CODE, TX_TIMEOUT_MS};
use crate::radio::params::{Bandwidth, RadioParameters};
use crate::radio::traits::{RxFrame, Transport, TransportError};
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::spi::SpiBus;
use heapless::Vec;
use log::{debug, info};

mod opcode {
    pub const CLEAR_IRQ_STATUS: u8 = 0x02;
    pub const SET_DIO_IRQ_PARAMS: u8 = 0x08;
    pub const WRITE_REGISTER: u8 = 0x0D;
    pub const WRITE_BUFFER: u8 = 0x0E;
    pub const GET_IRQ_STATUS: u8 = 0x12;
    pub const GET_RX_BUFFER_STATUS: u8 = 0x13;
    pub const GET_PACKET_STATUS: u8 = 0x14;
    pub const READ_BUFFER: u8 = 0x1E;
    pub const SET_STANDBY: u8 = 0x80;
    pub const SET_RX: u8 = 0x82;
    pub const SET_TX: u8 = 0x83;
    pub const SET_RF_FREQUENCY: u8 = 0x86;
    pub const SET_PACKET_TYPE: u8 = 0x8A;
    pub const SET_MODULATION_PARAMS: u8 = 0x8B;
    pub const SET_PACKET_PARAMS: u8 = 0x8C;
    pub const SET_TX_PARAMS: u8 = 0x8E;
    pub const SET_BUFFER_BASE_ADDRESS: u8 = 0x8F;
    pub const SET_PA_CONFIG: u8 = 0x95;
    pub const SET_DIO3_AS_TCXO_CTRL: u8 = 0x97;
    pub const SET_DIO2_AS_RF_SWITCH_CTRL: u8 = 0x9D;
}

mod irq {
    pub const TX_DONE: u16 = 0x0001;
    pub const RX_DONE: u16 = 0x0002;
    pub const CRC_ERR: u16 = 0x0040;
    pub const TIMEOUT: u16 = 0x0200;
    pub const ALL: u16 = 0xFFFF;
}

const OCP_REGISTER: u16 = 0x08E7;
const STDBY_RC: u8 = 0x00;
const PACKET_TYPE_LORA: u8 = 0x01;
const TX_BASE: u8 = 0x00;
const RX_BASE: u8 = 0x80;
/// SetRx timeout meaning "stay in receive"
const RX_CONTINUOUS: u32 = 0xFF_FFFF;

/// A receive already finished, good or bad
fn is_latched_rx(flags: u16) -> bool {
    flags & (irq::RX_DONE | irq::CRC_ERR) != 0
}

fn rx_outcome(flags: u16) -> Result<(), TransportError> {
    if flags & irq::CRC_ERR != 0 {
        return Err(TransportError::CrcError);
    }
    if flags & irq::RX_DONE != 0 {
        return Ok(());
    }
    if flags & irq::TIMEOUT != 0 {
        return Err(TransportError::Timeout);
    }
    Err(TransportError::ReceiveFailed)
}

/// Control pins for the modem
pub struct Sx1262Pins<Nss, Dio1, Nrst, Busy> {
    pub nss: Nss,
    pub dio1: Dio1,
    pub nrst: Nrst,
    pub busy: Busy,
}

/// SX1262 implementation of [`Transport`]
pub struct Sx1262Transport<Spi, Nss, Dio1, Nrst, Busy> {
    spi: Spi,
    nss: Nss,
    dio1: Dio1,
    nrst: Nrst,
    busy: Busy,
    initialised: bool,
}

/// 24-bit big-endian helper for timeouts and frequencies
fn be24(value: u32) -> [u8; 3] {
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

/// RF frequency register value: f_rf * 2^25 / 32 MHz
fn frequency_word(frequency_mhz: f32) -> u32 {
    let hz = (frequency_mhz as f64 * 1_000_000.0) as u64;
    ((hz << 25) / 32_000_000) as u32
}

fn bandwidth_code(bandwidth: Bandwidth) -> u8 {
    match bandwidth {
        Bandwidth::Khz62_5 => 0x03,
        Bandwidth::Khz125 => 0x04,
        Bandwidth::Khz250 => 0x05,
        Bandwidth::Khz500 => 0x06,
    }
}

/// Low data rate optimisation is required once a symbol exceeds 16 ms
fn low_data_rate(params: &RadioParameters) -> bool {
    let symbol_us = (1u32 << params.spreading_factor) as f32 * 1000.0 / params.bandwidth.khz();
    symbol_us > 16_000.0
}

/// SetRx timeout in 15.625 us steps, clamped below the continuous marker
fn rx_timeout_steps(timeout_ms: u32) -> u32 {
    (timeout_ms.saturating_mul(64)).min(RX_CONTINUOUS - 1)
}

impl<Spi, Nss, Dio1, Nrst, Busy> Sx1262Transport<Spi, Nss, Dio1, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin,
    Nrst: OutputPin,
    Busy: InputPin,
{
    pub fn new(spi: Spi, pins: Sx1262Pins<Nss, Dio1, Nrst, Busy>) -> Self {
        Self {
            spi,
            nss: pins.nss,
            dio1: pins.dio1,
            nrst: pins.nrst,
            busy: pins.busy,
            initialised: false,
        }
    }

    async fn reset(&mut self) {
        let _ = self.nrst.set_low();
        Timer::after(Duration::from_millis(10)).await;
        let _ = self.nrst.set_high();
        Timer::after(Duration::from_millis(20)).await;
    }

    async fn wait_ready(&mut self) -> Result<(), TransportError> {
        for _ in 0..1000 {
            if self.busy.is_low().unwrap_or(false) {
                return Ok(());
            }
            Timer::after(Duration::from_micros(100)).await;
        }
        Err(TransportError::BusyTimeout)
    }

    /// One SPI transaction: opcode, then `args`, then `payload`
    async fn write(&mut self, op: u8, args: &[u8], payload: &[u8]) -> Result<(), TransportError> {
        self.wait_ready().await?;
        let _ = self.nss.set_low();
        let result = async {
            self.spi.write(&[op]).await?;
            self.spi.write(args).await?;
            self.spi.write(payload).await?;
            self.spi.flush().await
        }
        .await;
        let _ = self.nss.set_high();
        result.map_err(|_| TransportError::Bus)
    }

    async fn command(&mut self, op: u8, args: &[u8]) -> Result<(), TransportError> {
        self.write(op, args, &[]).await
    }

    /// Opcode, `args`, one status byte, then `out.len()` response bytes
    async fn read(&mut self, op: u8, args: &[u8], out: &mut [u8]) -> Result<(), TransportError> {
        self.wait_ready().await?;
        let _ = self.nss.set_low();
        let result = async {
            self.spi.write(&[op]).await?;
            self.spi.write(args).await?;
            let mut status = [0u8; 1];
            self.spi.read(&mut status).await?;
            self.spi.read(out).await?;
            self.spi.flush().await
        }
        .await;
        let _ = self.nss.set_high();
        result.map_err(|_| TransportError::Bus)
    }

    async fn clear_irq(&mut self) -> Result<(), TransportError> {
        self.command(opcode::CLEAR_IRQ_STATUS, &irq::ALL.to_be_bytes())
            .await
    }

    /// Route `mask` to DIO1 and clear anything pending
    async fn arm_irq(&mut self, mask: u16) -> Result<(), TransportError> {
        let [hi, lo] = mask.to_be_bytes();
        self.command(opcode::SET_DIO_IRQ_PARAMS, &[hi, lo, hi, lo, 0, 0, 0, 0])
            .await?;
        self.clear_irq().await
    }

    async fn irq_status(&mut self) -> Result<u16, TransportError> {
        let mut raw = [0u8; 2];
        self.read(opcode::GET_IRQ_STATUS, &[], &mut raw).await?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Wait for DIO1, then return and clear the IRQ flags
    async fn wait_irq(&mut self, timeout_ms: u32) -> Result<u16, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            if self.dio1.is_high().unwrap_or(false) {
                let status = self.irq_status().await?;
                self.clear_irq().await?;
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout);
            }
            Timer::after(Duration::from_micros(100)).await;
        }
    }

    /// Flags of a receive that completed before anyone waited for it
    async fn latched_rx(&mut self) -> Result<Option<u16>, TransportError> {
        if !self.dio1.is_high().unwrap_or(false) {
            return Ok(None);
        }
        let status = self.irq_status().await?;
        if !is_latched_rx(status) {
            return Ok(None);
        }
        self.clear_irq().await?;
        debug!("SX1262: latched packet, flags {:#06x}", status);
        Ok(Some(status))
    }

    async fn read_packet(&mut self) -> Result<RxFrame, TransportError> {
        let mut buffer_status = [0u8; 2];
        self.read(opcode::GET_RX_BUFFER_STATUS, &[], &mut buffer_status)
            .await?;
        let [len, offset] = buffer_status;
        let len = (len as usize).min(MAX_FRAME_SIZE);

        let mut raw = [0u8; MAX_FRAME_SIZE];
        self.read(opcode::READ_BUFFER, &[offset], &mut raw[..len])
            .await?;

        let mut packet_status = [0u8; 3];
        self.read(opcode::GET_PACKET_STATUS, &[], &mut packet_status)
            .await?;
        let rssi = -(packet_status[0] as i16) / 2;
        let snr = (packet_status[1] as i8) / 4;

        let mut data = Vec::new();
        data.extend_from_slice(&raw[..len])
            .map_err(|_| TransportError::ReceiveFailed)?;
        Ok(RxFrame { data, rssi, snr })
    }

    async fn packet_params(&mut self, payload_len: u8) -> Result<(), TransportError> {
        // 8 symbol preamble, explicit header, CRC on, standard IQ
        self.command(opcode::SET_PACKET_PARAMS, &[0x00, 0x08, 0x00, payload_len, 0x01, 0x00])
            .await
    }

    async fn start_rx(&mut self, timeout_steps: u32) -> Result<(), TransportError> {
        self.command(opcode::SET_STANDBY, &[STDBY_RC]).await?;
        self.packet_params(MAX_PAYLOAD as u8).await?;
        self.arm_irq(irq::RX_DONE | irq::TIMEOUT | irq::CRC_ERR)
            .await?;
        self.command(opcode::SET_RX, &be24(timeout_steps)).await
    }

    /// Apply a full profile; the modem is left in standby
    async fn apply(&mut self, params: &RadioParameters) -> Result<(), TransportError> {
        params
            .validate()
            .map_err(|_| TransportError::InvalidConfig)?;

        self.command(opcode::SET_STANDBY, &[STDBY_RC]).await?;
        self.command(
            opcode::SET_RF_FREQUENCY,
            &frequency_word(params.frequency_mhz).to_be_bytes(),
        )
        .await?;
        self.command(
            opcode::SET_MODULATION_PARAMS,
            &[
                params.spreading_factor,
                bandwidth_code(params.bandwidth),
                // Coding rate 4/5..4/8 maps to 1..4
                params.coding_rate - 4,
                low_data_rate(params) as u8,
            ],
        )
        .await?;
        // High power PA: duty cycle 0x04, hpMax 0x07, SX1262, paLut 0x01
        self.command(opcode::SET_PA_CONFIG, &[0x04, 0x07, 0x00, 0x01])
            .await?;
        // Power in dBm two's complement, 200 us ramp
        self.command(opcode::SET_TX_PARAMS, &[params.tx_power_dbm as u8, 0x04])
            .await?;

        debug!(
            "SX1262: {} MHz SF{} BW{} CR4/{} {} dBm",
            params.frequency_mhz,
            params.spreading_factor,
            params.bandwidth.khz(),
            params.coding_rate,
            params.tx_power_dbm
        );
        Ok(())
    }
}

impl<Spi, Nss, Dio1, Nrst, Busy> Transport for Sx1262Transport<Spi, Nss, Dio1, Nrst, Busy>
where
    Spi: SpiBus,
    Nss: OutputPin,
    Dio1: InputPin,
    Nrst: OutputPin,
    Busy: InputPin,
{
    async fn init(&mut self, params: &RadioParameters) -> Result<(), TransportError> {
        self.reset().await;
        self.wait_ready().await?;
        self.command(opcode::SET_STANDBY, &[STDBY_RC]).await?;

        // TCXO on DIO3 with ~5 ms startup
        let [_, t2, t1, t0] = 0x0000_0140u32.to_be_bytes();
        self.command(opcode::SET_DIO3_AS_TCXO_CTRL, &[TCXO_VOLTAGE_CODE, t2, t1, t0])
            .await?;
        Timer::after(Duration::from_millis(10)).await;

        self.command(opcode::SET_DIO2_AS_RF_SWITCH_CTRL, &[0x01])
            .await?;
        // OCP step is 2.5 mA
        let ocp = ((CURRENT_LIMIT_MA as u32 * 10) / 25).min(63) as u8;
        let [a_hi, a_lo] = OCP_REGISTER.to_be_bytes();
        self.command(opcode::WRITE_REGISTER, &[a_hi, a_lo, ocp]).await?;
        self.command(opcode::SET_PACKET_TYPE, &[PACKET_TYPE_LORA])
            .await?;
        self.command(opcode::SET_BUFFER_BASE_ADDRESS, &[TX_BASE, RX_BASE])
            .await?;

        self.apply(params).await?;
        self.start_rx(RX_CONTINUOUS).await?;
        self.initialised = true;
        info!("SX1262: initialised");
        Ok(())
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.initialised {
            return Err(TransportError::NotInitialised);
        }
        if frame.is_empty() || frame.len() > MAX_PAYLOAD {
            return Err(TransportError::InvalidConfig);
        }

        self.command(opcode::SET_STANDBY, &[STDBY_RC]).await?;
        self.packet_params(frame.len() as u8).await?;
        self.write(opcode::WRITE_BUFFER, &[TX_BASE], frame).await?;
        self.arm_irq(irq::TX_DONE).await?;
        self.command(opcode::SET_TX, &be24(0)).await?;

        let status = self.wait_irq(TX_TIMEOUT_MS).await;
        // Back to listening whatever happened
        self.start_rx(RX_CONTINUOUS).await?;

        match status {
            Ok(flags) if flags & irq::TX_DONE != 0 => Ok(()),
            Ok(_) | Err(TransportError::Timeout) => Err(TransportError::TransmitFailed),
            Err(e) => Err(e),
        }
    }

    async fn receive(&mut self, timeout_ms: u32) -> Result<RxFrame, TransportError> {
        if !self.initialised {
            return Err(TransportError::NotInitialised);
        }

        // A packet received since the last operation is read before re-arming
        let flags = match self.latched_rx().await? {
            Some(flags) => Ok(flags),
            None => {
                self.start_rx(rx_timeout_steps(timeout_ms)).await?;
                // Allow the modem's own timeout to fire first
                self.wait_irq(timeout_ms.saturating_add(1000)).await
            }
        };

        let frame = match flags.and_then(rx_outcome) {
            Ok(()) => self.read_packet().await,
            Err(e) => Err(e),
        };
        // Back to listening whatever happened
        self.start_rx(RX_CONTINUOUS).await?;
        frame
    }

    async fn reconfigure(&mut self, params: &RadioParameters) -> Result<(), TransportError> {
        if !self.initialised {
            return Err(TransportError::NotInitialised);
        }
        self.apply(params).await?;
        self.start_rx(RX_CONTINUOUS).await
    }
}
