//! EPC signaling for epcsim
//!
//! The envelope and the eleven inter-station messages, their binary codec,
//! the mobility anchor's location and path-switch engine, the per-node EPC
//! application that sends and dispatches envelopes, and a UDP transport for
//! running stations as separate processes.
//!
//! # Example
//!
//! ```
//! use epcsim_common::{HandoverParticipator, StationId};
//! use epcsim_epc::codec;
//! use epcsim_epc::protocol::{EpcMessage, EpcMessageContainer, MessageKind};
//!
//! let p = HandoverParticipator::new(
//!     StationId::new(10, 0),
//!     StationId::new(2, 0),
//!     StationId::new(3, 0),
//! );
//! let container = EpcMessageContainer::new(p.source, p.target, &EpcMessage::HandoverRequest { participator: p }).unwrap();
//! let encoded = codec::encode(&container);
//! assert_eq!(encoded.len(), codec::HEADER_LENGTH + 24);
//!
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.kind, MessageKind::HandoverRequest);
//! ```

pub mod app;
pub mod codec;
pub mod location;
pub mod protocol;
pub mod routing;
pub mod stats;
pub mod transport;

pub use app::{EpcApp, EpcHandler, OutgoingDatagram};
pub use codec::{EpcCodecError, HEADER_LENGTH, MAX_FORWARDED_SDU_LENGTH, MAX_PAYLOAD_LENGTH};
pub use location::{AnchorRoutes, LocationInfo, UeRouteInstaller};
pub use protocol::{
    EpcMessage, EpcMessageContainer, MessageKind, RrcReconfiguration, SnStatusItem, UeLocation,
    KIND_COUNT,
};
pub use routing::{ForwardingTable, Route, RouteOp, RouteTable};
pub use stats::EpcStats;
pub use transport::UdpEpcTransport;
