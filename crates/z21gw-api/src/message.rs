//! z21 LAN protocol messages and their wire codec.
//!
//! Every packet is `DataLen (u16 LE) | Header (u16 LE) | Data`, where
//! `DataLen` includes the 4-byte prefix. A single UDP datagram may carry
//! several packets back to back.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Packet header identifiers used by this client.
pub mod header {
    pub const SERIAL_NUMBER: u16 = 0x10;
    pub const HARDWARE_INFO: u16 = 0x1A;
    pub const LOGOFF: u16 = 0x30;
    pub const SET_BROADCAST_FLAGS: u16 = 0x50;
    pub const SYSTEM_STATE_CHANGED: u16 = 0x84;
    pub const SYSTEM_STATE_GET: u16 = 0x85;
    pub const CAN_DETECTOR: u16 = 0xC4;
}

const PREFIX_LEN: usize = 4;

/// CAN network id addressing every detector on the bus.
pub const CAN_NETWORK_ALL: u16 = 0xD000;

// ── BroadcastFlags ───────────────────────────────────────────────────

/// Bitmask of event categories the device reports unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastFlags(u32);

impl BroadcastFlags {
    /// Track power, short circuit and system state changes.
    pub const SYSTEM_UPDATES: Self = Self(0x0000_0100);
    /// Occupancy reports from CAN detectors.
    pub const CAN_DETECTOR_UPDATES: Self = Self(0x0008_0000);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for BroadcastFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// Requests the client sends to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    SerialNumber,
    HardwareInfo,
    SystemState,
    BroadcastFlags { flags: BroadcastFlags },
    CanDetector { network_id: u16 },
    Logoff,
}

impl Request {
    pub fn header(&self) -> u16 {
        match self {
            Self::SerialNumber => header::SERIAL_NUMBER,
            Self::HardwareInfo => header::HARDWARE_INFO,
            Self::SystemState => header::SYSTEM_STATE_GET,
            Self::BroadcastFlags { .. } => header::SET_BROADCAST_FLAGS,
            Self::CanDetector { .. } => header::CAN_DETECTOR,
            Self::Logoff => header::LOGOFF,
        }
    }

    /// Header of the packet the device answers with, or `None` when the
    /// device does not acknowledge this request at all.
    pub fn reply_header(&self) -> Option<u16> {
        match self {
            Self::SerialNumber => Some(header::SERIAL_NUMBER),
            Self::HardwareInfo => Some(header::HARDWARE_INFO),
            Self::SystemState => Some(header::SYSTEM_STATE_CHANGED),
            Self::CanDetector { .. } => Some(header::CAN_DETECTOR),
            Self::BroadcastFlags { .. } | Self::Logoff => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SerialNumber | Self::HardwareInfo | Self::SystemState | Self::Logoff => {
                frame(self.header(), &[])
            }
            Self::BroadcastFlags { flags } => frame(self.header(), &flags.bits().to_le_bytes()),
            Self::CanDetector { network_id } => {
                let [lo, hi] = network_id.to_le_bytes();
                frame(self.header(), &[0x00, lo, hi])
            }
        }
    }

    /// Decode a request packet. Only used by peers that play the device side.
    pub fn decode(header: u16, data: &[u8]) -> Result<Self, Error> {
        let mut reader = Reader::new(header, data);
        let request = match header {
            header::SERIAL_NUMBER => Self::SerialNumber,
            header::HARDWARE_INFO => Self::HardwareInfo,
            header::SYSTEM_STATE_GET => Self::SystemState,
            header::LOGOFF => Self::Logoff,
            header::SET_BROADCAST_FLAGS => Self::BroadcastFlags {
                flags: BroadcastFlags::from_bits(reader.u32()?),
            },
            header::CAN_DETECTOR => {
                let _query_type = reader.u8()?;
                Self::CanDetector {
                    network_id: reader.u16()?,
                }
            }
            _ => return Err(unknown_header(header)),
        };
        Ok(request)
    }
}

// ── Message ──────────────────────────────────────────────────────────

/// Snapshot of the command station's electrical and operating state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    /// Main track current in mA.
    pub main_current: i16,
    /// Programming track current in mA.
    pub prog_current: i16,
    pub filtered_main_current: i16,
    /// Internal temperature in °C.
    pub temperature: i16,
    /// Supply voltage in mV.
    pub supply_voltage: u16,
    /// Internal voltage (track voltage) in mV.
    pub vcc_voltage: u16,
    pub central_state: u8,
    pub central_state_ex: u8,
    pub capabilities: u8,
}

/// One occupancy report from a CAN detector port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanDetector {
    pub network_id: u16,
    pub address: u16,
    pub port: u8,
    pub detector_type: u8,
    pub value1: u16,
    pub value2: u16,
}

/// Messages received from the device, either as replies or unsolicited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Message {
    SerialNumber {
        serial_number: u32,
    },
    HardwareInfo {
        hardware_type: u32,
        /// Firmware version as printed on the device, e.g. `"1.43"`.
        firmware_version: String,
    },
    SystemState(SystemState),
    CanDetector(CanDetector),
}

impl Message {
    /// Stable discriminator, suitable as a subject token.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn header(&self) -> u16 {
        match self {
            Self::SerialNumber { .. } => header::SERIAL_NUMBER,
            Self::HardwareInfo { .. } => header::HARDWARE_INFO,
            Self::SystemState(_) => header::SYSTEM_STATE_CHANGED,
            Self::CanDetector(_) => header::CAN_DETECTOR,
        }
    }

    pub fn decode(header: u16, data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(header, data);
        let message = match header {
            header::SERIAL_NUMBER => Self::SerialNumber {
                serial_number: r.u32()?,
            },
            header::HARDWARE_INFO => Self::HardwareInfo {
                hardware_type: r.u32()?,
                firmware_version: firmware_from_bcd(r.u32()?),
            },
            header::SYSTEM_STATE_CHANGED => {
                let state = SystemState {
                    main_current: r.i16()?,
                    prog_current: r.i16()?,
                    filtered_main_current: r.i16()?,
                    temperature: r.i16()?,
                    supply_voltage: r.u16()?,
                    vcc_voltage: r.u16()?,
                    central_state: r.u8()?,
                    central_state_ex: r.u8()?,
                    capabilities: {
                        let _reserved = r.u8()?;
                        r.u8()?
                    },
                };
                Self::SystemState(state)
            }
            header::CAN_DETECTOR => Self::CanDetector(CanDetector {
                network_id: r.u16()?,
                address: r.u16()?,
                port: r.u8()?,
                detector_type: r.u8()?,
                value1: r.u16()?,
                value2: r.u16()?,
            }),
            _ => return Err(unknown_header(header)),
        };
        Ok(message)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(16);
        match self {
            Self::SerialNumber { serial_number } => {
                data.extend_from_slice(&serial_number.to_le_bytes());
            }
            Self::HardwareInfo {
                hardware_type,
                firmware_version,
            } => {
                data.extend_from_slice(&hardware_type.to_le_bytes());
                data.extend_from_slice(&firmware_to_bcd(firmware_version).to_le_bytes());
            }
            Self::SystemState(s) => {
                data.extend_from_slice(&s.main_current.to_le_bytes());
                data.extend_from_slice(&s.prog_current.to_le_bytes());
                data.extend_from_slice(&s.filtered_main_current.to_le_bytes());
                data.extend_from_slice(&s.temperature.to_le_bytes());
                data.extend_from_slice(&s.supply_voltage.to_le_bytes());
                data.extend_from_slice(&s.vcc_voltage.to_le_bytes());
                data.extend_from_slice(&[s.central_state, s.central_state_ex, 0, s.capabilities]);
            }
            Self::CanDetector(d) => {
                data.extend_from_slice(&d.network_id.to_le_bytes());
                data.extend_from_slice(&d.address.to_le_bytes());
                data.extend_from_slice(&[d.port, d.detector_type]);
                data.extend_from_slice(&d.value1.to_le_bytes());
                data.extend_from_slice(&d.value2.to_le_bytes());
            }
        }
        frame(self.header(), &data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

// ── Framing ──────────────────────────────────────────────────────────

fn frame(header: u16, data: &[u8]) -> Vec<u8> {
    // Payloads are at most a few dozen bytes.
    let len = u16::try_from(PREFIX_LEN + data.len()).unwrap_or(u16::MAX);
    let mut packet = Vec::with_capacity(PREFIX_LEN + data.len());
    packet.extend_from_slice(&len.to_le_bytes());
    packet.extend_from_slice(&header.to_le_bytes());
    packet.extend_from_slice(data);
    packet
}

/// Iterate over the `(header, data)` packets contained in one datagram.
pub fn split_packets(datagram: &[u8]) -> Packets<'_> {
    Packets { rest: datagram }
}

/// Iterator returned by [`split_packets`]. Stops at the first truncated packet.
#[derive(Debug)]
pub struct Packets<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Packets<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&[l0, l1, h0, h1], _) = self.rest.split_first_chunk::<PREFIX_LEN>()?;
        let len = usize::from(u16::from_le_bytes([l0, l1]));
        if len < PREFIX_LEN || len > self.rest.len() {
            self.rest = &[];
            return None;
        }
        let data = self.rest.get(PREFIX_LEN..len)?;
        self.rest = self.rest.get(len..).unwrap_or_default();
        Some((u16::from_le_bytes([h0, h1]), data))
    }
}

// ── Decoding helpers ─────────────────────────────────────────────────

struct Reader<'a> {
    header: u16,
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(header: u16, data: &'a [u8]) -> Self {
        Self { header, data }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let (bytes, rest) = self.data.split_first_chunk::<N>().ok_or(Error::Decode {
            header: self.header,
            reason: format!("payload too short ({} bytes left, need {N})", self.data.len()),
        })?;
        self.data = rest;
        Ok(*bytes)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let [b] = self.take::<1>()?;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn i16(&mut self) -> Result<i16, Error> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, Error> {
        self.take::<4>().map(u32::from_le_bytes)
    }
}

fn unknown_header(header: u16) -> Error {
    Error::Decode {
        header,
        reason: "unknown header".into(),
    }
}

/// `0x0000_0143` → `"1.43"`.
fn firmware_from_bcd(raw: u32) -> String {
    let major = (raw >> 8) & 0xFF;
    let minor = raw & 0xFF;
    format!("{major:x}.{minor:02x}")
}

fn firmware_to_bcd(version: &str) -> u32 {
    let Some((major, minor)) = version.split_once('.') else {
        return 0;
    };
    match (u32::from_str_radix(major, 16), u32::from_str_radix(minor, 16)) {
        (Ok(major), Ok(minor)) => ((major & 0xFF) << 8) | (minor & 0xFF),
        _ => 0,
    }
}
