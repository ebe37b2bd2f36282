//! Builders for the client's outbound messages.

use std::net::Ipv4Addr;

use br_common::MacAddr;

use crate::config::DhcpClientConfig;
use crate::error::ClientError;
use crate::options::{
    DhcpOption, OptionError, DHCPDISCOVER, DHCPRELEASE, DHCPREQUEST, IP_UDP_DHCP_SIZE,
    OPT_CLIENT_ID, OPT_PARAM_REQUEST, PARAM_REQUEST_TABLE,
};
use crate::packet::DhcpPacket;

/// Everything the client stamps into each message it sends.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    mac: MacAddr,
    client_id: Option<DhcpOption>,
    client_id_from_mac: bool,
    param_request: Vec<u8>,
    vendor_class: Option<DhcpOption>,
    hostname: Option<DhcpOption>,
    fqdn: Option<DhcpOption>,
    extra: Vec<DhcpOption>,
}

fn mac_client_id(mac: MacAddr) -> DhcpOption {
    let mut data = vec![1u8];
    data.extend_from_slice(&mac.octets());
    DhcpOption::new(OPT_CLIENT_ID, data)
}

/// Parameter-request list in table order.
pub fn param_request_list(extra: &[u8], no_defaults: bool) -> Vec<u8> {
    PARAM_REQUEST_TABLE
        .iter()
        .filter(|(code, default)| (*default && !no_defaults) || extra.contains(code))
        .map(|(code, _)| *code)
        .collect()
}

impl ClientIdentity {
    pub fn from_config(config: &DhcpClientConfig, mac: MacAddr) -> Result<Self, ClientError> {
        let explicit_id = match &config.client_id {
            Some(id) => Some(
                crate::config::RawOption {
                    code: OPT_CLIENT_ID,
                    hex: id.clone(),
                }
                .to_option()?,
            ),
            None => None,
        };
        let client_id_from_mac = explicit_id.is_none() && config.send_client_id;
        let client_id = explicit_id.or_else(|| client_id_from_mac.then(|| mac_client_id(mac)));

        let extra = config
            .extra_options
            .iter()
            .map(|raw| raw.to_option())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mac,
            client_id,
            client_id_from_mac,
            param_request: param_request_list(&config.request_options, config.no_default_options),
            vendor_class: config.vendor_class.as_deref().map(DhcpOption::vendor_class),
            hostname: config.hostname.as_deref().map(DhcpOption::hostname),
            fqdn: config.fqdn.as_deref().map(DhcpOption::fqdn),
            extra,
        })
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    /// Track a hardware address change (bridge membership moved).
    pub fn set_mac(&mut self, mac: MacAddr) {
        self.mac = mac;
        if self.client_id_from_mac {
            self.client_id = Some(mac_client_id(mac));
        }
    }

    fn init(&self, msg_type: u8, xid: u32) -> Result<DhcpPacket, OptionError> {
        let mut packet = DhcpPacket::new(msg_type, xid, self.mac)?;
        if let Some(id) = &self.client_id {
            packet.add_option(id)?;
        }
        Ok(packet)
    }

    fn add_client_options(&self, packet: &mut DhcpPacket) -> Result<(), OptionError> {
        packet.add_option(&DhcpOption::max_size(IP_UDP_DHCP_SIZE))?;
        if !self.param_request.is_empty() {
            packet.add_option(&DhcpOption::new(OPT_PARAM_REQUEST, self.param_request.clone()))?;
        }
        for opt in [&self.vendor_class, &self.hostname, &self.fqdn].into_iter().flatten() {
            packet.add_option(opt)?;
        }
        for opt in &self.extra {
            packet.add_option(opt)?;
        }
        Ok(())
    }

    /// Broadcast discover, optionally asking for a previous address.
    pub fn discover(&self, xid: u32, requested: Option<Ipv4Addr>) -> Result<DhcpPacket, OptionError> {
        let mut packet = self.init(DHCPDISCOVER, xid)?;
        if let Some(ip) = requested {
            packet.add_option(&DhcpOption::requested_ip(ip))?;
        }
        self.add_client_options(&mut packet)?;
        Ok(packet)
    }

    /// Request answering an offer from `server`.
    pub fn select(
        &self,
        xid: u32,
        server: Ipv4Addr,
        requested: Ipv4Addr,
    ) -> Result<DhcpPacket, OptionError> {
        let mut packet = self.init(DHCPREQUEST, xid)?;
        packet.add_option(&DhcpOption::requested_ip(requested))?;
        packet.add_option(&DhcpOption::server_id(server))?;
        self.add_client_options(&mut packet)?;
        Ok(packet)
    }

    /// Request extending the lease on `ciaddr`; carries neither server id nor requested IP.
    pub fn renew(&self, xid: u32, ciaddr: Ipv4Addr) -> Result<DhcpPacket, OptionError> {
        let mut packet = self.init(DHCPREQUEST, xid)?;
        packet.ciaddr = ciaddr;
        self.add_client_options(&mut packet)?;
        Ok(packet)
    }

    pub fn release(&self, server: Ipv4Addr, ciaddr: Ipv4Addr) -> Result<DhcpPacket, OptionError> {
        let mut packet = self.init(DHCPRELEASE, rand::random())?;
        packet.ciaddr = ciaddr;
        packet.add_option(&DhcpOption::server_id(server))?;
        Ok(packet)
    }
}
