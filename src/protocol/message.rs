//! Radio message types and parser
//!
//! # Wire Format
//!
//! Every radio frame is one short line that starts with a tag:
//! ```text
//! PING seq=<uint>
//! CFG F=<float> BW=<float> SF=<int> CR=<int> TX=<int>
//! OTA_START:<size>:<timeoutMs>
//! OTA_DATA:<index>:<payload bytes>
//! OTA_END:[<crc32 as 8 hex digits>]
//! FW_VERSION:<version>
//! FW_UPDATE_AVAILABLE | UPDATE_NOW | REQUEST_UPDATE | UPDATE_ACK | NO_FIRMWARE
//! ```
//!
//! Parsing is byte-oriented. The `OTA_DATA` payload is every byte after the
//! second `:` up to the end of the radio frame, taken verbatim, so chunk data
//! may contain zero bytes or anything else; the radio frame length is the
//! delimiter. Header fields must be ASCII.

use crate::radio::params::{ParamError, RadioParameters};

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Ping,
    Config,
    OtaStart,
    OtaData,
    OtaEnd,
    FwUpdateAvailable,
    FwVersion,
    UpdateNow,
    RequestUpdate,
    UpdateAck,
    NoFirmware,
}

impl Tag {
    /// Tag text as it appears on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Ping => "PING",
            Tag::Config => "CFG",
            Tag::OtaStart => "OTA_START",
            Tag::OtaData => "OTA_DATA",
            Tag::OtaEnd => "OTA_END",
            Tag::FwUpdateAvailable => "FW_UPDATE_AVAILABLE",
            Tag::FwVersion => "FW_VERSION",
            Tag::UpdateNow => "UPDATE_NOW",
            Tag::RequestUpdate => "REQUEST_UPDATE",
            Tag::UpdateAck => "UPDATE_ACK",
            Tag::NoFirmware => "NO_FIRMWARE",
        }
    }

    /// Try to match a tag token
    pub fn from_token(token: &[u8]) -> Option<Self> {
        match token {
            b"PING" => Some(Tag::Ping),
            b"CFG" => Some(Tag::Config),
            b"OTA_START" => Some(Tag::OtaStart),
            b"OTA_DATA" => Some(Tag::OtaData),
            b"OTA_END" => Some(Tag::OtaEnd),
            b"FW_UPDATE_AVAILABLE" => Some(Tag::FwUpdateAvailable),
            b"FW_VERSION" => Some(Tag::FwVersion),
            b"UPDATE_NOW" => Some(Tag::UpdateNow),
            b"REQUEST_UPDATE" => Some(Tag::RequestUpdate),
            b"UPDATE_ACK" => Some(Tag::UpdateAck),
            b"NO_FIRMWARE" => Some(Tag::NoFirmware),
            _ => None,
        }
    }

    /// Separator between the tag and its fields
    pub fn separator(self) -> u8 {
        match self {
            Tag::Ping | Tag::Config => b' ',
            _ => b':',
        }
    }

    /// Classify a raw frame by its tag without parsing the fields
    pub fn of(frame: &[u8]) -> Option<Self> {
        let end = frame
            .iter()
            .position(|b| *b == b' ' || *b == b':')
            .unwrap_or(frame.len());
        Self::from_token(trim_end(&frame[..end]))
    }

    /// True for tags handled by the firmware cascade
    pub fn is_cascade(self) -> bool {
        !matches!(self, Tag::Ping | Tag::Config)
    }
}

/// A decoded radio message, borrowing variable-length fields from the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message<'a> {
    /// Sender heartbeat
    Ping { seq: u32 },
    /// Complete radio profile to apply
    Config(RadioParameters),
    /// Start of a firmware transfer
    OtaStart { size: u32, timeout_ms: u32 },
    /// One firmware chunk
    OtaData { index: u32, payload: &'a [u8] },
    /// End of a firmware transfer, optionally with the image CRC-32
    OtaEnd { checksum: Option<u32> },
    /// A distributor has a new image
    FwUpdateAvailable,
    /// Version string of the announced image
    FwVersion(&'a str),
    /// Call to action following an announcement
    UpdateNow,
    /// A node asks for the image
    RequestUpdate,
    /// The distributor accepted a request
    UpdateAck,
    /// The distributor has nothing to send
    NoFirmware,
}

impl Message<'_> {
    pub fn tag(&self) -> Tag {
        match self {
            Message::Ping { .. } => Tag::Ping,
            Message::Config(_) => Tag::Config,
            Message::OtaStart { .. } => Tag::OtaStart,
            Message::OtaData { .. } => Tag::OtaData,
            Message::OtaEnd { .. } => Tag::OtaEnd,
            Message::FwUpdateAvailable => Tag::FwUpdateAvailable,
            Message::FwVersion(_) => Tag::FwVersion,
            Message::UpdateNow => Tag::UpdateNow,
            Message::RequestUpdate => Tag::RequestUpdate,
            Message::UpdateAck => Tag::UpdateAck,
            Message::NoFirmware => Tag::NoFirmware,
        }
    }
}

/// Reasons a frame could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Zero-length frame
    Empty,
    /// Tag not recognised
    UnknownTag,
    /// Tag recognised, fields wrong in number or syntax
    Malformed(Tag),
    /// CFG fields parsed but do not form a legal profile
    InvalidParameters(ParamError),
}

/// Parser for radio frames
pub struct MessageParser;

impl MessageParser {
    /// Create a new message parser
    pub fn new() -> Self {
        Self
    }

    /// Parse one radio frame
    pub fn parse<'a>(&self, frame: &'a [u8]) -> Result<Message<'a>, ParseError> {
        if frame.is_empty() {
            return Err(ParseError::Empty);
        }

        let tag = Tag::of(frame).ok_or(ParseError::UnknownTag)?;
        let token_len = tag.as_str().len();
        let rest = &frame[token_len..];

        // Bare tags carry nothing but optional trailing whitespace
        let fields = match rest.split_first() {
            None => &rest[..0],
            Some((sep, fields)) if *sep == tag.separator() => fields,
            Some(_) if trim_end(rest).is_empty() => &rest[..0],
            Some(_) => return Err(ParseError::Malformed(tag)),
        };

        let malformed = ParseError::Malformed(tag);
        match tag {
            Tag::Ping => {
                let text = ascii(trim_end(fields)).ok_or(malformed)?;
                let seq = text
                    .strip_prefix("seq=")
                    .and_then(|v| v.parse::<u32>().ok())
                    .ok_or(malformed)?;
                Ok(Message::Ping { seq })
            }
            Tag::Config => Self::parse_config(fields).map(Message::Config),
            Tag::OtaStart => {
                let text = ascii(trim_end(fields)).ok_or(malformed)?;
                let (size, timeout) = text.split_once(':').ok_or(malformed)?;
                let size = size.parse::<u32>().map_err(|_| malformed)?;
                let timeout_ms = timeout.parse::<u32>().map_err(|_| malformed)?;
                Ok(Message::OtaStart { size, timeout_ms })
            }
            Tag::OtaData => {
                let colon = fields.iter().position(|b| *b == b':').ok_or(malformed)?;
                let index = ascii(&fields[..colon])
                    .and_then(|v| v.parse::<u32>().ok())
                    .ok_or(malformed)?;
                let payload = &fields[colon + 1..];
                if payload.is_empty() {
                    return Err(malformed);
                }
                Ok(Message::OtaData { index, payload })
            }
            Tag::OtaEnd => {
                let text = ascii(trim_end(fields)).ok_or(malformed)?;
                if text.is_empty() {
                    return Ok(Message::OtaEnd { checksum: None });
                }
                if text.len() != 8 {
                    return Err(malformed);
                }
                let checksum = u32::from_str_radix(text, 16).map_err(|_| malformed)?;
                Ok(Message::OtaEnd {
                    checksum: Some(checksum),
                })
            }
            Tag::FwVersion => {
                let text = ascii(trim_end(fields)).ok_or(malformed)?;
                if text.is_empty() {
                    return Err(malformed);
                }
                Ok(Message::FwVersion(text))
            }
            Tag::FwUpdateAvailable
            | Tag::UpdateNow
            | Tag::RequestUpdate
            | Tag::UpdateAck
            | Tag::NoFirmware => {
                if !trim_end(fields).is_empty() {
                    return Err(malformed);
                }
                Ok(match tag {
                    Tag::FwUpdateAvailable => Message::FwUpdateAvailable,
                    Tag::UpdateNow => Message::UpdateNow,
                    Tag::RequestUpdate => Message::RequestUpdate,
                    Tag::UpdateAck => Message::UpdateAck,
                    _ => Message::NoFirmware,
                })
            }
        }
    }

    /// Parse `F=<f> BW=<f> SF=<i> CR=<i> TX=<i>`; exactly five fields in order
    fn parse_config(fields: &[u8]) -> Result<RadioParameters, ParseError> {
        let malformed = ParseError::Malformed(Tag::Config);
        let text = ascii(trim_end(fields)).ok_or(malformed)?;

        let mut parts = text.split_ascii_whitespace();
        let frequency = keyed(&mut parts, "F")
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or(malformed)?;
        let bandwidth = keyed(&mut parts, "BW")
            .and_then(|v| v.parse::<f32>().ok())
            .ok_or(malformed)?;
        let sf = keyed(&mut parts, "SF")
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or(malformed)?;
        let cr = keyed(&mut parts, "CR")
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or(malformed)?;
        let tx = keyed(&mut parts, "TX")
            .and_then(|v| v.parse::<i32>().ok())
            .ok_or(malformed)?;

        if parts.next().is_some() {
            return Err(malformed);
        }

        RadioParameters::from_raw(frequency, bandwidth, sf, cr, tx)
            .map_err(ParseError::InvalidParameters)
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Value of the next `KEY=value` field, if the key matches
fn keyed<'t>(parts: &mut core::str::SplitAsciiWhitespace<'t>, key: &str) -> Option<&'t str> {
    parts.next()?.strip_prefix(key)?.strip_prefix('=')
}

fn ascii(bytes: &[u8]) -> Option<&str> {
    if bytes.is_ascii() {
        core::str::from_utf8(bytes).ok()
    } else {
        None
    }
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::params::Bandwidth;

    #[test]
    fn test_parse_ping() {
        let parser = MessageParser::new();
        assert_eq!(parser.parse(b"PING seq=42"), Ok(Message::Ping { seq: 42 }));
        assert_eq!(parser.parse(b"PING seq=42\r\n"), Ok(Message::Ping { seq: 42 }));
        assert_eq!(
            parser.parse(b"PING seq=abc"),
            Err(ParseError::Malformed(Tag::Ping))
        );
    }

    #[test]
    fn test_parse_config() {
        let parser = MessageParser::new();
        let msg = parser
            .parse(b"CFG F=915.0 BW=125 SF=10 CR=5 TX=17")
            .expect("Should parse");
        match msg {
            Message::Config(params) => {
                assert_eq!(params.frequency_mhz, 915.0);
                assert_eq!(params.bandwidth, Bandwidth::Khz125);
                assert_eq!(params.spreading_factor, 10);
                assert_eq!(params.coding_rate, 5);
                assert_eq!(params.tx_power_dbm, 17);
            }
            _ => panic!("Expected Config"),
        }
    }

    #[test]
    fn test_parse_config_whole_khz_bandwidth() {
        let parser = MessageParser::new();
        match parser.parse(b"CFG F=868.125 BW=62 SF=12 CR=8 TX=22") {
            Ok(Message::Config(params)) => assert_eq!(params.bandwidth, Bandwidth::Khz62_5),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_wrong_arity() {
        let parser = MessageParser::new();
        let malformed = Err(ParseError::Malformed(Tag::Config));
        assert_eq!(parser.parse(b"CFG F=915.0 BW=125 SF=10 CR=5"), malformed);
        assert_eq!(parser.parse(b"CFG F=915.0 BW=125 SF=10 CR=5 TX=17 X=1"), malformed);
        assert_eq!(parser.parse(b"CFG F=915.0 BW=125 SF=ten CR=5 TX=17"), malformed);
        assert_eq!(parser.parse(b"CFG BW=125 F=915.0 SF=10 CR=5 TX=17"), malformed);
        assert_eq!(parser.parse(b"CFG"), malformed);
    }

    #[test]
    fn test_parse_config_illegal_value() {
        let parser = MessageParser::new();
        assert_eq!(
            parser.parse(b"CFG F=915.0 BW=125 SF=13 CR=5 TX=17"),
            Err(ParseError::InvalidParameters(ParamError::SpreadingFactor))
        );
    }

    #[test]
    fn test_parse_ota_start() {
        let parser = MessageParser::new();
        assert_eq!(
            parser.parse(b"OTA_START:1000:5000"),
            Ok(Message::OtaStart {
                size: 1000,
                timeout_ms: 5000
            })
        );
        assert_eq!(
            parser.parse(b"OTA_START:1000"),
            Err(ParseError::Malformed(Tag::OtaStart))
        );
    }

    #[test]
    fn test_parse_ota_data_binary_payload() {
        let parser = MessageParser::new();
        let frame = b"OTA_DATA:3:\x00\xff:\x00 \n";
        match parser.parse(frame).expect("Should parse") {
            Message::OtaData { index, payload } => {
                assert_eq!(index, 3);
                // Colons, zeros and trailing whitespace are all payload
                assert_eq!(payload, b"\x00\xff:\x00 \n");
            }
            _ => panic!("Expected OtaData"),
        }
    }

    #[test]
    fn test_parse_ota_data_empty_payload() {
        let parser = MessageParser::new();
        assert_eq!(
            parser.parse(b"OTA_DATA:3:"),
            Err(ParseError::Malformed(Tag::OtaData))
        );
    }

    #[test]
    fn test_parse_ota_end() {
        let parser = MessageParser::new();
        assert_eq!(parser.parse(b"OTA_END:"), Ok(Message::OtaEnd { checksum: None }));
        assert_eq!(
            parser.parse(b"OTA_END:deadbeef"),
            Ok(Message::OtaEnd {
                checksum: Some(0xDEAD_BEEF)
            })
        );
        assert_eq!(
            parser.parse(b"OTA_END:xyz"),
            Err(ParseError::Malformed(Tag::OtaEnd))
        );
    }

    #[test]
    fn test_parse_bare_tags() {
        let parser = MessageParser::new();
        assert_eq!(parser.parse(b"FW_UPDATE_AVAILABLE"), Ok(Message::FwUpdateAvailable));
        assert_eq!(parser.parse(b"UPDATE_NOW"), Ok(Message::UpdateNow));
        assert_eq!(parser.parse(b"REQUEST_UPDATE\n"), Ok(Message::RequestUpdate));
        assert_eq!(parser.parse(b"UPDATE_ACK"), Ok(Message::UpdateAck));
        assert_eq!(parser.parse(b"NO_FIRMWARE"), Ok(Message::NoFirmware));
        assert_eq!(parser.parse(b"FW_VERSION:1.2.3"), Ok(Message::FwVersion("1.2.3")));
    }

    #[test]
    fn test_unknown_and_empty() {
        let parser = MessageParser::new();
        assert_eq!(parser.parse(b""), Err(ParseError::Empty));
        assert_eq!(parser.parse(b"HELLO world"), Err(ParseError::UnknownTag));
        assert_eq!(parser.parse(b"PINGS seq=1"), Err(ParseError::UnknownTag));
    }

    #[test]
    fn test_tag_classification() {
        assert_eq!(Tag::of(b"CFG F=1"), Some(Tag::Config));
        assert_eq!(Tag::of(b"OTA_DATA:1:\x00"), Some(Tag::OtaData));
        assert_eq!(Tag::of(b"UPDATE_NOW"), Some(Tag::UpdateNow));
        assert_eq!(Tag::of(b"NOPE"), None);
        assert!(Tag::RequestUpdate.is_cascade());
        assert!(!Tag::Ping.is_cascade());
    }
}
