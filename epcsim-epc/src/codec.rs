//! EPC message encoding/decoding
//!
//! Envelope layout (big-endian):
//!
//! ```text
//! +-----------+-----------+-----------+-----------+------+--------+---------+
//! | src.node  | src.iface | dst.node  | dst.iface | kind | length | payload |
//! |   u32     |   u32     |   u32     |   u32     |  u8  |  u32   | length  |
//! +-----------+-----------+-----------+-----------+------+--------+---------+
//! ```
//!
//! A station identity inside a payload is the same 8-byte `(node, iface)`
//! pair; a participator is three of them in `ue, source, target` order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use epcsim_common::{HandoverParticipator, StationId};
use thiserror::Error;

use crate::protocol::{
    EpcMessage, EpcMessageContainer, MessageKind, RrcReconfiguration, SnStatusItem, UeLocation,
};

/// Envelope header size in bytes
pub const HEADER_LENGTH: usize = 21;

/// Maximum payload length accepted (64KB)
pub const MAX_PAYLOAD_LENGTH: usize = 65536;

const STATION_LENGTH: usize = 8;
const PARTICIPATOR_LENGTH: usize = 3 * STATION_LENGTH;
const SN_ITEM_LENGTH: usize = 5;

/// Largest SDU a single DataForwarding can carry
pub const MAX_FORWARDED_SDU_LENGTH: usize = MAX_PAYLOAD_LENGTH - PARTICIPATOR_LENGTH - 1 - 4;

/// Errors that can occur during EPC message encoding/decoding
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpcCodecError {
    /// Buffer too short
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort {
        /// Number of bytes needed
        needed: usize,
        /// Number of bytes available
        available: usize,
    },

    /// Unknown message kind tag
    #[error("unknown EPC message kind: {0}")]
    UnknownMessageKind(u8),

    /// Header length field disagrees with the payload
    #[error("length field {declared} does not match payload size {actual}")]
    LengthMismatch {
        /// Value of the length field
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Payload too large
    #[error("payload length {0} exceeds maximum allowed {}", MAX_PAYLOAD_LENGTH)]
    PayloadTooLarge(usize),

    /// A field holds a value outside its domain
    #[error("invalid value {value} for field {field}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending raw value
        value: u32,
    },

    /// Bytes left over after the payload was fully decoded
    #[error("{0} trailing bytes after {1} payload")]
    TrailingBytes(usize, MessageKind),
}

impl From<EpcCodecError> for epcsim_common::Error {
    fn from(err: EpcCodecError) -> Self {
        epcsim_common::Error::Codec(err.to_string())
    }
}

/// Result type for EPC codec operations
pub type Result<T> = std::result::Result<T, EpcCodecError>;

/// Encodes an envelope into a byte buffer
pub fn encode(container: &EpcMessageContainer) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LENGTH + container.payload.len());
    encode_into(container, &mut buf);
    buf.freeze()
}

/// Encodes an envelope into an existing buffer
pub fn encode_into(container: &EpcMessageContainer, buf: &mut BytesMut) {
    put_station(buf, container.src);
    put_station(buf, container.dst);
    buf.put_u8(container.kind as u8);
    buf.put_u32(container.length);
    buf.extend_from_slice(&container.payload);
}

/// Decodes an envelope from a byte buffer
pub fn decode(data: &[u8]) -> Result<EpcMessageContainer> {
    let mut buf = data;
    ensure(buf, HEADER_LENGTH)?;

    let src = get_station(&mut buf);
    let dst = get_station(&mut buf);

    let kind_byte = buf.get_u8();
    let kind = MessageKind::from_u8(kind_byte).ok_or(EpcCodecError::UnknownMessageKind(kind_byte))?;

    let length = buf.get_u32() as usize;
    if length > MAX_PAYLOAD_LENGTH {
        return Err(EpcCodecError::PayloadTooLarge(length));
    }
    if buf.len() != length {
        return Err(EpcCodecError::LengthMismatch {
            declared: length,
            actual: buf.len(),
        });
    }

    Ok(EpcMessageContainer {
        src,
        dst,
        kind,
        length: length as u32,
        payload: Bytes::copy_from_slice(buf),
    })
}

/// Encodes the body of a typed message.
///
/// Fails when a count or length does not fit its field, or when the body
/// would exceed [`MAX_PAYLOAD_LENGTH`].
pub fn encode_payload(message: &EpcMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64);

    match message {
        EpcMessage::AttachUe(loc) | EpcMessage::DetachUe(loc) => {
            put_station(&mut buf, loc.ue);
            put_station(&mut buf, loc.station);
        }
        EpcMessage::HandoverRequest { participator }
        | EpcMessage::PathSwitchRequest { participator }
        | EpcMessage::EndMarker { participator }
        | EpcMessage::UeContextRelease { participator }
        | EpcMessage::HoPreparationFailure { participator } => {
            put_participator(&mut buf, participator);
        }
        EpcMessage::HandoverRequestAck {
            participator,
            reconfiguration,
        } => {
            put_participator(&mut buf, participator);
            put_participator(&mut buf, &reconfiguration.participator);
        }
        EpcMessage::SnStatusTransfer {
            participator,
            items,
        } => {
            put_participator(&mut buf, participator);
            let count = u16::try_from(items.len()).map_err(|_| EpcCodecError::InvalidField {
                field: "sn_status_items",
                value: u32::try_from(items.len()).unwrap_or(u32::MAX),
            })?;
            buf.put_u16(count);
            for item in items {
                buf.put_u8(item.bearer_id);
                buf.put_u16(item.next_pdcp_rx_sn);
                buf.put_u16(item.next_pdcp_tx_sn);
            }
        }
        EpcMessage::DataForwarding {
            participator,
            bearer_id,
            data,
        } => {
            if data.len() > MAX_PAYLOAD_LENGTH {
                return Err(EpcCodecError::PayloadTooLarge(data.len()));
            }
            put_participator(&mut buf, participator);
            buf.put_u8(*bearer_id);
            buf.put_u32(data.len() as u32);
            buf.extend_from_slice(data);
        }
        EpcMessage::PathSwitchRequestAck {
            participator,
            result,
        } => {
            put_participator(&mut buf, participator);
            buf.put_u8(u8::from(*result));
        }
    }

    if buf.len() > MAX_PAYLOAD_LENGTH {
        return Err(EpcCodecError::PayloadTooLarge(buf.len()));
    }
    Ok(buf.freeze())
}

/// Decodes the body of a message of the given kind
pub fn decode_payload(kind: MessageKind, data: &[u8]) -> Result<EpcMessage> {
    let mut buf = data;

    let message = match kind {
        MessageKind::AttachUe | MessageKind::DetachUe => {
            ensure(buf, 2 * STATION_LENGTH)?;
            let loc = UeLocation {
                ue: get_station(&mut buf),
                station: get_station(&mut buf),
            };
            if kind == MessageKind::AttachUe {
                EpcMessage::AttachUe(loc)
            } else {
                EpcMessage::DetachUe(loc)
            }
        }
        MessageKind::HandoverRequest => EpcMessage::HandoverRequest {
            participator: get_participator(&mut buf)?,
        },
        MessageKind::HandoverRequestAck => EpcMessage::HandoverRequestAck {
            participator: get_participator(&mut buf)?,
            reconfiguration: RrcReconfiguration {
                participator: get_participator(&mut buf)?,
            },
        },
        MessageKind::SnStatusTransfer => decode_sn_status_transfer(&mut buf)?,
        MessageKind::DataForwarding => decode_data_forwarding(&mut buf)?,
        MessageKind::PathSwitchRequest => EpcMessage::PathSwitchRequest {
            participator: get_participator(&mut buf)?,
        },
        MessageKind::PathSwitchRequestAck => {
            let participator = get_participator(&mut buf)?;
            ensure(buf, 1)?;
            let result = match buf.get_u8() {
                0 => false,
                1 => true,
                other => {
                    return Err(EpcCodecError::InvalidField {
                        field: "result",
                        value: other as u32,
                    })
                }
            };
            EpcMessage::PathSwitchRequestAck {
                participator,
                result,
            }
        }
        MessageKind::EndMarker => EpcMessage::EndMarker {
            participator: get_participator(&mut buf)?,
        },
        MessageKind::UeContextRelease => EpcMessage::UeContextRelease {
            participator: get_participator(&mut buf)?,
        },
        MessageKind::HoPreparationFailure => EpcMessage::HoPreparationFailure {
            participator: get_participator(&mut buf)?,
        },
    };

    if !buf.is_empty() {
        return Err(EpcCodecError::TrailingBytes(buf.len(), kind));
    }
    Ok(message)
}

fn decode_sn_status_transfer(buf: &mut &[u8]) -> Result<EpcMessage> {
    let participator = get_participator(buf)?;
    ensure(buf, 2)?;
    let count = buf.get_u16() as usize;
    ensure(buf, count * SN_ITEM_LENGTH)?;

    let items = (0..count)
        .map(|_| SnStatusItem {
            bearer_id: buf.get_u8(),
            next_pdcp_rx_sn: buf.get_u16(),
            next_pdcp_tx_sn: buf.get_u16(),
        })
        .collect();

    Ok(EpcMessage::SnStatusTransfer {
        participator,
        items,
    })
}

fn decode_data_forwarding(buf: &mut &[u8]) -> Result<EpcMessage> {
    let participator = get_participator(buf)?;
    ensure(buf, 5)?;
    let bearer_id = buf.get_u8();
    let data_length = buf.get_u32() as usize;

    if data_length > MAX_PAYLOAD_LENGTH {
        return Err(EpcCodecError::PayloadTooLarge(data_length));
    }
    ensure(buf, data_length)?;
    let data = Bytes::copy_from_slice(&buf[..data_length]);
    buf.advance(data_length);

    Ok(EpcMessage::DataForwarding {
        participator,
        bearer_id,
        data,
    })
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(EpcCodecError::BufferTooShort {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

fn put_station(buf: &mut BytesMut, station: StationId) {
    buf.put_u32(station.node_id);
    buf.put_u32(station.interface_index);
}

fn get_station(buf: &mut &[u8]) -> StationId {
    let node_id = buf.get_u32();
    let interface_index = buf.get_u32();
    StationId::new(node_id, interface_index)
}

fn put_participator(buf: &mut BytesMut, participator: &HandoverParticipator) {
    put_station(buf, participator.ue);
    put_station(buf, participator.source);
    put_station(buf, participator.target);
}

fn get_participator(buf: &mut &[u8]) -> Result<HandoverParticipator> {
    ensure(buf, PARTICIPATOR_LENGTH)?;
    Ok(HandoverParticipator {
        ue: get_station(buf),
        source: get_station(buf),
        target: get_station(buf),
    })
}
