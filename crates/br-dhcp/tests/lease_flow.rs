//! Full discover/offer/request/ack exchange through the wire codecs.

use std::net::Ipv4Addr;
use std::time::Duration;

use br_common::MacAddr;
use br_dhcp::config::DhcpClientConfig;
use br_dhcp::frame::{self, CLIENT_PORT, SERVER_PORT};
use br_dhcp::options::*;
use br_dhcp::packet::DhcpPacket;
use br_dhcp::state_machine::{Action, ListenMode, Outbound, Route, ScriptEvent};
use br_dhcp::transport;
use br_dhcp::{Control, LeaseSession, LeaseState};

const CLIENT_MAC: MacAddr = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0x01]);
const SERVER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 1);
const LEASED: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 42);

/// Minimal server: answers discover with an offer and request with an ack.
fn serve(request: &DhcpPacket) -> DhcpPacket {
    let reply_type = match request.msg_type() {
        Some(DHCPDISCOVER) => DHCPOFFER,
        Some(DHCPREQUEST) => DHCPACK,
        other => panic!("unexpected request {:?}", other),
    };
    let mut reply = DhcpPacket::new(reply_type, request.xid, CLIENT_MAC).unwrap();
    reply.yiaddr = LEASED;
    reply.add_option(&DhcpOption::server_id(SERVER_IP)).unwrap();
    reply.add_option(&DhcpOption::lease_time(1200)).unwrap();
    reply
        .add_option(&DhcpOption::new(OPT_SUBNET_MASK, vec![255, 255, 255, 0]))
        .unwrap();
    reply
}

fn on_the_wire(reply: &DhcpPacket) -> Vec<u8> {
    frame::build_ip_udp(
        &reply.to_bytes(),
        SERVER_IP,
        Ipv4Addr::BROADCAST,
        SERVER_PORT,
        CLIENT_PORT,
    )
}

fn only_send(actions: &[Action]) -> &Outbound {
    let mut sends = actions.iter().filter_map(|a| match a {
        Action::Send(out) => Some(out),
        _ => None,
    });
    let out = sends.next().expect("one packet sent");
    assert!(sends.next().is_none());
    out
}

/// What the server sees for a link-layer broadcast.
fn received_by_server(out: &Outbound) -> DhcpPacket {
    assert_eq!(out.route, Route::Broadcast);
    let wire = frame::build_ip_udp(
        &out.packet.to_bytes(),
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::BROADCAST,
        CLIENT_PORT,
        SERVER_PORT,
    );
    let payload = &wire[frame::IP_HEADER_LEN + frame::UDP_HEADER_LEN..];
    DhcpPacket::parse(payload).unwrap()
}

fn new_session() -> LeaseSession {
    let config = DhcpClientConfig {
        hostname: Some("recovery".into()),
        ..DhcpClientConfig::default()
    };
    LeaseSession::new(&config, CLIENT_MAC).unwrap()
}

fn bind(session: &mut LeaseSession) {
    session.start();
    let discover = received_by_server(only_send(&session.timer_expired().unwrap()));
    let offer = transport::decode(ListenMode::Raw, &on_the_wire(&serve(&discover))).unwrap();
    session.on_packet(&offer);
    let request = received_by_server(only_send(&session.timer_expired().unwrap()));
    let ack = transport::decode(ListenMode::Raw, &on_the_wire(&serve(&request))).unwrap();
    session.on_packet(&ack);
}

#[test]
fn test_exchange_reaches_bound() {
    let mut session = new_session();
    session.start();

    let discover = received_by_server(only_send(&session.timer_expired().unwrap()));
    assert_eq!(discover.option_str(OPT_HOSTNAME).as_deref(), Some("recovery"));
    assert_eq!(
        discover.get_option(OPT_PARAM_REQUEST),
        Some(&[1u8, 3, 6, 12, 15, 28, 42][..])
    );

    let offer = transport::decode(ListenMode::Raw, &on_the_wire(&serve(&discover))).unwrap();
    session.on_packet(&offer);
    assert_eq!(session.state(), LeaseState::Requesting);

    let request = received_by_server(only_send(&session.timer_expired().unwrap()));
    assert_eq!(request.xid, discover.xid);
    assert_eq!(request.option_ipv4(OPT_REQUESTED_IP), Some(LEASED));
    assert_eq!(request.server_id(), Some(SERVER_IP));

    let ack = transport::decode(ListenMode::Raw, &on_the_wire(&serve(&request))).unwrap();
    let actions = session.on_packet(&ack);
    assert_eq!(session.state(), LeaseState::Bound);
    assert_eq!(session.requested(), LEASED);
    assert!(matches!(&actions[0], Action::Script(ScriptEvent::Bound, Some(p)) if p.yiaddr == LEASED));
    assert_eq!(
        actions.last(),
        Some(&Action::Arm(Some(Duration::from_secs(600))))
    );
}

#[test]
fn test_corrupted_offer_does_not_advance() {
    let mut session = new_session();
    session.start();
    let discover = received_by_server(only_send(&session.timer_expired().unwrap()));

    let mut wire = on_the_wire(&serve(&discover));
    wire[10] ^= 0x80; // IP header checksum
    assert!(transport::decode(ListenMode::Raw, &wire).is_none());
    assert_eq!(session.state(), LeaseState::InitSelecting);

    // The intact frame still works afterwards.
    let offer = transport::decode(ListenMode::Raw, &on_the_wire(&serve(&discover))).unwrap();
    session.on_packet(&offer);
    assert_eq!(session.state(), LeaseState::Requesting);
}

#[test]
fn test_stale_offer_is_ignored() {
    let mut session = new_session();
    session.start();
    let discover = received_by_server(only_send(&session.timer_expired().unwrap()));
    let mut stale = serve(&discover);
    stale.xid = discover.xid.wrapping_add(7);
    let offer = transport::decode(ListenMode::Raw, &on_the_wire(&stale)).unwrap();
    assert!(session.on_packet(&offer).is_empty());
    assert_eq!(session.state(), LeaseState::InitSelecting);
}

#[test]
fn test_renewal_unicasts_to_server() {
    let mut session = new_session();
    bind(&mut session);

    let actions = session.timer_expired().unwrap();
    assert_eq!(session.state(), LeaseState::Renewing);
    let out = only_send(&actions);
    assert_eq!(
        out.route,
        Route::Unicast {
            source: LEASED,
            server: SERVER_IP
        }
    );
    assert_eq!(out.packet.ciaddr, LEASED);
    assert_eq!(out.packet.server_id(), None);

    let mut ack = serve(&out.packet);
    ack.xid = out.packet.xid;
    let ack = transport::decode(ListenMode::Kernel, &ack.to_bytes()).unwrap();
    let actions = session.on_packet(&ack);
    assert!(matches!(actions[0], Action::Script(ScriptEvent::Renew, _)));
    assert_eq!(session.state(), LeaseState::Bound);
}

#[test]
fn test_terminate_releases_lease() {
    let mut session = new_session();
    bind(&mut session);
    let actions = session.on_control(Control::Terminate).unwrap();
    let out = only_send(&actions);
    assert_eq!(out.packet.msg_type(), Some(DHCPRELEASE));
    assert_eq!(out.packet.server_id(), Some(SERVER_IP));
    assert_eq!(session.state(), LeaseState::Released);
}
