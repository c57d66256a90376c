//! EPC envelopes over real UDP sockets

use std::net::{Ipv4Addr, SocketAddr};

use epcsim_common::{AddressBook, EpcConfig, Error, Result, StationId};
use epcsim_epc::{
    EpcApp, EpcHandler, EpcMessage, EpcMessageContainer, ForwardingTable, MessageKind,
    UdpEpcTransport, UeLocation,
};
use integration_tests::{
    anchor_address, init_test_logging, station_address, ue_address, TestResult, ANCHOR, E1, U1,
};

fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

struct Refuse;

impl EpcHandler for Refuse {
    fn on_handover_signal(&mut self, src: StationId, message: EpcMessage) -> Result<()> {
        Err(Error::violation(src, format!("unexpected {}", message.kind())))
    }
}

fn anchor_app() -> Result<(EpcApp, ForwardingTable)> {
    let config = EpcConfig {
        anchor: ANCHOR,
        ..EpcConfig::default()
    };
    let mut book = AddressBook::new(config.subnet);
    book.register(ANCHOR.node_id, anchor_address());
    book.register(E1.node_id, station_address(E1));
    book.register(U1.node_id, ue_address(U1));

    let mut app = EpcApp::new(ANCHOR, &config, book);
    let mut table = ForwardingTable::new();
    app.init(&mut table)?;
    Ok((app, table))
}

#[tokio::test]
async fn test_attach_over_udp() -> TestResult {
    init_test_logging();
    let station = UdpEpcTransport::bind(loopback()).await?;
    let anchor = UdpEpcTransport::bind(loopback()).await?;
    let (mut app, mut table) = anchor_app()?;

    let attach = EpcMessage::AttachUe(UeLocation { ue: U1, station: E1 });
    let container = EpcMessageContainer::new(E1, ANCHOR, &attach)?;
    station.send_container(&container, anchor.local_addr()?).await?;

    let (received, from) = anchor.recv_container().await?;
    assert_eq!(from, station.local_addr()?);
    assert_eq!(received.kind, MessageKind::AttachUe);
    assert_eq!(received.src, E1);

    let replies = app.dispatch(received, &mut table, &mut Refuse)?;
    assert!(replies.is_empty());
    assert_eq!(
        app.location().and_then(|l| l.serving_station(U1)),
        Some(E1)
    );
    assert_eq!(
        table.lookup(ue_address(U1)).map(|r| r.next_hop),
        Some(station_address(E1))
    );
    assert_eq!(app.stats().received(MessageKind::AttachUe), 1);
    Ok(())
}

#[tokio::test]
async fn test_garbage_datagram_keeps_socket_usable() -> TestResult {
    init_test_logging();
    let sender = UdpEpcTransport::bind(loopback()).await?;
    let receiver = UdpEpcTransport::bind(loopback()).await?;
    let to = receiver.local_addr()?;

    sender.send_raw(&[0xde, 0xad], to).await?;
    assert!(matches!(receiver.recv_container().await, Err(Error::Codec(_))));

    let detach = EpcMessage::DetachUe(UeLocation { ue: U1, station: E1 });
    sender
        .send_container(&EpcMessageContainer::new(E1, ANCHOR, &detach)?, to)
        .await?;
    let (received, _) = receiver.recv_container().await?;
    assert_eq!(received.message()?, detach);
    Ok(())
}
