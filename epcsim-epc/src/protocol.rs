//! EPC signaling message types
//!
//! The eleven message kinds exchanged between eNBs and the mobility anchor
//! over the signaling subnet, as one tagged sum type ([`EpcMessage`]), and
//! the envelope ([`EpcMessageContainer`]) they travel in.

use std::fmt;

use bytes::Bytes;
use epcsim_common::{HandoverParticipator, StationId};

/// EPC message kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    /// eNB tells the anchor a terminal attached
    AttachUe = 0,
    /// eNB tells the anchor a terminal left
    DetachUe = 1,
    /// Source asks target to accept a terminal
    HandoverRequest = 2,
    /// Target accepts, carrying the reconfiguration for the terminal
    HandoverRequestAck = 3,
    /// Source hands over PDCP sequence-number state
    SnStatusTransfer = 4,
    /// Source forwards buffered downlink data
    DataForwarding = 5,
    /// Target asks the anchor to switch the downlink path
    PathSwitchRequest = 6,
    /// Anchor reports the path-switch outcome
    PathSwitchRequestAck = 7,
    /// No more data will arrive on the legacy path
    EndMarker = 8,
    /// Target tells source to drop the terminal's context
    UeContextRelease = 9,
    /// Target refuses the handover
    HoPreparationFailure = 10,
}

/// Number of distinct message kinds
pub const KIND_COUNT: usize = 11;

impl MessageKind {
    /// All kinds, in wire order.
    pub const ALL: [MessageKind; KIND_COUNT] = [
        MessageKind::AttachUe,
        MessageKind::DetachUe,
        MessageKind::HandoverRequest,
        MessageKind::HandoverRequestAck,
        MessageKind::SnStatusTransfer,
        MessageKind::DataForwarding,
        MessageKind::PathSwitchRequest,
        MessageKind::PathSwitchRequestAck,
        MessageKind::EndMarker,
        MessageKind::UeContextRelease,
        MessageKind::HoPreparationFailure,
    ];

    /// Creates a MessageKind from a u8 value
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Index into per-kind counter arrays.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::AttachUe => "AttachUE",
            MessageKind::DetachUe => "DetachUE",
            MessageKind::HandoverRequest => "HandoverRequest",
            MessageKind::HandoverRequestAck => "HandoverRequestAck",
            MessageKind::SnStatusTransfer => "SnStatusTransfer",
            MessageKind::DataForwarding => "DataForwarding",
            MessageKind::PathSwitchRequest => "PathSwitchRequest",
            MessageKind::PathSwitchRequestAck => "PathSwitchRequestAck",
            MessageKind::EndMarker => "EndMarker",
            MessageKind::UeContextRelease => "UeContextRelease",
            MessageKind::HoPreparationFailure => "HoPreparationFailure",
        };
        f.write_str(name)
    }
}

/// PDCP sequence-number state of one radio bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnStatusItem {
    /// Radio bearer identity
    pub bearer_id: u8,
    /// Next expected uplink PDCP SN
    pub next_pdcp_rx_sn: u16,
    /// Next downlink PDCP SN to assign
    pub next_pdcp_tx_sn: u16,
}

/// RRC connection reconfiguration built by the target and relayed to the
/// terminal by the source (the handover command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RrcReconfiguration {
    /// Parties of the handover being commanded
    pub participator: HandoverParticipator,
}

/// Attach/Detach payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeLocation {
    /// The terminal
    pub ue: StationId,
    /// Its serving station
    pub station: StationId,
}

/// Typed EPC message, one variant per [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpcMessage {
    /// AttachUE (eNB → anchor)
    AttachUe(UeLocation),
    /// DetachUE (eNB → anchor)
    DetachUe(UeLocation),
    /// HandoverRequest (source → target)
    HandoverRequest {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// HandoverRequestAck (target → source)
    HandoverRequestAck {
        /// Handover parties
        participator: HandoverParticipator,
        /// Reconfiguration to relay to the terminal
        reconfiguration: RrcReconfiguration,
    },
    /// SnStatusTransfer (source → target)
    SnStatusTransfer {
        /// Handover parties
        participator: HandoverParticipator,
        /// Per-bearer sequence-number state
        items: Vec<SnStatusItem>,
    },
    /// DataForwarding (source → target)
    DataForwarding {
        /// Handover parties
        participator: HandoverParticipator,
        /// Bearer the data belongs to
        bearer_id: u8,
        /// Forwarded PDCP SDU
        data: Bytes,
    },
    /// PathSwitchRequest (target → anchor)
    PathSwitchRequest {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// PathSwitchRequestAck (anchor → target)
    PathSwitchRequestAck {
        /// Handover parties
        participator: HandoverParticipator,
        /// Whether the downlink path was switched
        result: bool,
    },
    /// EndMarker (anchor → source, source → target)
    EndMarker {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// UeContextRelease (target → source)
    UeContextRelease {
        /// Handover parties
        participator: HandoverParticipator,
    },
    /// HoPreparationFailure (target → source)
    HoPreparationFailure {
        /// Handover parties
        participator: HandoverParticipator,
    },
}

impl EpcMessage {
    /// Returns the message kind
    pub fn kind(&self) -> MessageKind {
        match self {
            EpcMessage::AttachUe(_) => MessageKind::AttachUe,
            EpcMessage::DetachUe(_) => MessageKind::DetachUe,
            EpcMessage::HandoverRequest { .. } => MessageKind::HandoverRequest,
            EpcMessage::HandoverRequestAck { .. } => MessageKind::HandoverRequestAck,
            EpcMessage::SnStatusTransfer { .. } => MessageKind::SnStatusTransfer,
            EpcMessage::DataForwarding { .. } => MessageKind::DataForwarding,
            EpcMessage::PathSwitchRequest { .. } => MessageKind::PathSwitchRequest,
            EpcMessage::PathSwitchRequestAck { .. } => MessageKind::PathSwitchRequestAck,
            EpcMessage::EndMarker { .. } => MessageKind::EndMarker,
            EpcMessage::UeContextRelease { .. } => MessageKind::UeContextRelease,
            EpcMessage::HoPreparationFailure { .. } => MessageKind::HoPreparationFailure,
        }
    }

    /// Returns the handover participator, for handover-related kinds.
    pub fn participator(&self) -> Option<&HandoverParticipator> {
        match self {
            EpcMessage::AttachUe(_) | EpcMessage::DetachUe(_) => None,
            EpcMessage::HandoverRequest { participator }
            | EpcMessage::HandoverRequestAck { participator, .. }
            | EpcMessage::SnStatusTransfer { participator, .. }
            | EpcMessage::DataForwarding { participator, .. }
            | EpcMessage::PathSwitchRequest { participator }
            | EpcMessage::PathSwitchRequestAck { participator, .. }
            | EpcMessage::EndMarker { participator }
            | EpcMessage::UeContextRelease { participator }
            | EpcMessage::HoPreparationFailure { participator } => Some(participator),
        }
    }
}

/// Wire envelope of one EPC message.
///
/// `payload` is the encoded body of the typed message; `length` is its size
/// and is checked against the actual payload when decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpcMessageContainer {
    /// Sending station
    pub src: StationId,
    /// Receiving station
    pub dst: StationId,
    /// Message kind tag
    pub kind: MessageKind,
    /// Payload length in bytes
    pub length: u32,
    /// Encoded message body
    pub payload: Bytes,
}

impl EpcMessageContainer {
    /// Wraps a typed message, encoding its body.
    pub fn new(src: StationId, dst: StationId, message: &EpcMessage) -> crate::codec::Result<Self> {
        let payload = crate::codec::encode_payload(message)?;
        // encode_payload caps the body at MAX_PAYLOAD_LENGTH
        let length = payload.len() as u32;
        Ok(Self {
            src,
            dst,
            kind: message.kind(),
            length,
            payload,
        })
    }

    /// Decodes the typed message carried in the payload.
    pub fn message(&self) -> crate::codec::Result<EpcMessage> {
        crate::codec::decode_payload(self.kind, &self.payload)
    }
}
