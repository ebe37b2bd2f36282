//! Lease state machine. Pure: it consumes timer expiries, received packets
//! and control requests, and answers with [`Action`]s for the driver.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info, warn};

use br_common::MacAddr;

use crate::config::DhcpClientConfig;
use crate::control::Control;
use crate::error::ClientError;
use crate::messages::ClientIdentity;
use crate::options::{DHCPACK, DHCPNAK, DHCPOFFER};
use crate::packet::DhcpPacket;

/// Below this many seconds left, renewal switches from unicast to broadcast.
const RENEW_UNICAST_THRESHOLD: u32 = 60;
const DEFAULT_LEASE_SECS: u32 = 60 * 60;
const MIN_LEASE_SECS: u32 = 10;
const LEASE_SECS_MASK: u32 = 0x0fff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    InitSelecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
    RenewRequested,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    None,
    Kernel,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    Deconfig,
    Bound,
    Renew,
    Nak,
    LeaseFail,
}

impl ScriptEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptEvent::Deconfig => "deconfig",
            ScriptEvent::Bound => "bound",
            ScriptEvent::Renew => "renew",
            ScriptEvent::Nak => "nak",
            ScriptEvent::LeaseFail => "leasefail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Link-layer broadcast from 0.0.0.0:68 to 255.255.255.255:67
    Broadcast,
    /// Kernel UDP from `source:68` to `server:67`
    Unicast { source: Ipv4Addr, server: Ipv4Addr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub packet: DhcpPacket,
    pub route: Route,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// Discover or request retries ran out
    LeaseFailed,
    /// Terminate was requested
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Outbound),
    /// Replace the listening socket. Only emitted when the mode changes.
    Listen(ListenMode),
    Script(ScriptEvent, Option<DhcpPacket>),
    /// Restart the state timer; `None` waits forever.
    Arm(Option<Duration>),
    /// Block the loop (NAK cooldown).
    Pause(Duration),
    Stop(ClientExit),
}

pub struct LeaseSession {
    identity: ClientIdentity,
    state: LeaseState,
    xid: u32,
    server: Ipv4Addr,
    requested: Ipv4Addr,
    lease_secs: u32,
    packet_num: u32,
    timeout: u32,
    listen: ListenMode,
    discover_retries: u32,
    discover_timeout: u32,
    nak_cooldown: u32,
}

impl LeaseSession {
    pub fn new(config: &DhcpClientConfig, mac: MacAddr) -> Result<Self, ClientError> {
        Ok(Self {
            identity: ClientIdentity::from_config(config, mac)?,
            state: LeaseState::InitSelecting,
            xid: 0,
            server: Ipv4Addr::UNSPECIFIED,
            requested: Ipv4Addr::UNSPECIFIED,
            lease_secs: 0,
            packet_num: 0,
            timeout: 0,
            listen: ListenMode::None,
            discover_retries: config.discover_retries,
            discover_timeout: config.discover_timeout_secs,
            nak_cooldown: config.nak_cooldown_secs,
        })
    }

    pub fn state(&self) -> LeaseState {
        self.state
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn server(&self) -> Ipv4Addr {
        self.server
    }

    /// Offered or leased address, unspecified when there is none.
    pub fn requested(&self) -> Ipv4Addr {
        self.requested
    }

    pub fn lease_secs(&self) -> u32 {
        self.lease_secs
    }

    pub fn listen_mode(&self) -> ListenMode {
        self.listen
    }

    /// Seconds the current state timer was last armed with.
    pub fn timeout_secs(&self) -> u32 {
        self.timeout
    }

    pub fn discover_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.discover_timeout))
    }

    pub fn set_mac(&mut self, mac: MacAddr) {
        if mac != self.identity.mac() {
            info!("Hardware address changed to {}", mac);
            self.identity.set_mac(mac);
        }
    }

    /// Initial actions: deconfigure, listen on the raw socket, fire the timer at once.
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Script(ScriptEvent::Deconfig, None)];
        self.listen(ListenMode::Raw, &mut actions);
        self.timeout = 0;
        actions.push(self.arm());
        actions
    }

    fn listen(&mut self, mode: ListenMode, actions: &mut Vec<Action>) {
        if self.listen != mode {
            debug!("Listen mode {:?} -> {:?}", self.listen, mode);
            self.listen = mode;
            actions.push(Action::Listen(mode));
        }
    }

    fn arm(&self) -> Action {
        Action::Arm(Some(Duration::from_secs(u64::from(self.timeout))))
    }

    fn broadcast(packet: DhcpPacket) -> Action {
        Action::Send(Outbound {
            packet,
            route: Route::Broadcast,
        })
    }

    fn requested_opt(&self) -> Option<Ipv4Addr> {
        (!self.requested.is_unspecified()).then_some(self.requested)
    }

    /// The state timer ran out.
    pub fn timer_expired(&mut self) -> Result<Vec<Action>, ClientError> {
        let mut actions = Vec::new();
        match self.state {
            LeaseState::InitSelecting => {
                if self.packet_num < self.discover_retries {
                    if self.packet_num == 0 {
                        self.xid = rand::random();
                    }
                    info!("Sending discover (xid {:#010x})", self.xid);
                    let packet = self.identity.discover(self.xid, self.requested_opt())?;
                    actions.push(Self::broadcast(packet));
                    self.timeout = self.discover_timeout;
                    self.packet_num += 1;
                    actions.push(self.arm());
                } else {
                    self.lease_failed(&mut actions);
                }
            }
            LeaseState::Requesting => {
                if self.packet_num < self.discover_retries {
                    info!("Sending select for {}", self.requested);
                    let packet = self.identity.select(self.xid, self.server, self.requested)?;
                    actions.push(Self::broadcast(packet));
                    self.timeout = self.discover_timeout;
                    self.packet_num += 1;
                    actions.push(self.arm());
                } else {
                    self.listen(ListenMode::Raw, &mut actions);
                    self.state = LeaseState::InitSelecting;
                    self.lease_failed(&mut actions);
                }
            }
            LeaseState::Bound => {
                self.state = LeaseState::Renewing;
                self.listen(ListenMode::Kernel, &mut actions);
                debug!("Entering renew state");
                self.renew_step(&mut actions)?;
            }
            LeaseState::Renewing | LeaseState::RenewRequested => self.renew_step(&mut actions)?,
            LeaseState::Rebinding => self.rebind_step(&mut actions)?,
            LeaseState::Released => actions.push(Action::Arm(None)),
        }
        Ok(actions)
    }

    fn lease_failed(&mut self, actions: &mut Vec<Action>) {
        warn!("No lease, failing");
        actions.push(Action::Script(ScriptEvent::LeaseFail, None));
        actions.push(Action::Stop(ClientExit::LeaseFailed));
    }

    fn renew_step(&mut self, actions: &mut Vec<Action>) -> Result<(), ClientError> {
        if self.timeout > RENEW_UNICAST_THRESHOLD {
            info!("Sending renew to {}", self.server);
            let packet = self.identity.renew(self.xid, self.requested)?;
            actions.push(Action::Send(Outbound {
                packet,
                route: Route::Unicast {
                    source: self.requested,
                    server: self.server,
                },
            }));
            self.timeout >>= 1;
            actions.push(self.arm());
            return Ok(());
        }
        debug!("Entering rebinding state");
        self.state = LeaseState::Rebinding;
        self.rebind_step(actions)
    }

    fn rebind_step(&mut self, actions: &mut Vec<Action>) -> Result<(), ClientError> {
        self.listen(ListenMode::Raw, actions);
        if self.timeout > 0 {
            info!("Broadcasting renew");
            let packet = self.identity.renew(self.xid, self.requested)?;
            actions.push(Self::broadcast(packet));
            self.timeout >>= 1;
            actions.push(self.arm());
            return Ok(());
        }
        warn!("Lease lost, entering init state");
        actions.push(Action::Script(ScriptEvent::Deconfig, None));
        self.state = LeaseState::InitSelecting;
        self.packet_num = 0;
        actions.push(self.arm());
        Ok(())
    }

    /// A packet arrived on the active listener. Packets that are not ours
    /// or not expected in this state leave the session untouched.
    pub fn on_packet(&mut self, packet: &DhcpPacket) -> Vec<Action> {
        let mut actions = Vec::new();

        if packet.xid != self.xid {
            debug!("xid {:#x} (ours is {:#x}), ignoring packet", packet.xid, self.xid);
            return actions;
        }
        if !packet.is_for(self.identity.mac()) {
            debug!("chaddr does not match, ignoring packet");
            return actions;
        }
        let Some(msg_type) = packet.msg_type() else {
            debug!("no message type option, ignoring packet");
            return actions;
        };

        match self.state {
            LeaseState::InitSelecting => {
                if msg_type != DHCPOFFER {
                    return actions;
                }
                let Some(server) = packet.server_id() else {
                    warn!("Offer without server ID, ignoring packet");
                    return actions;
                };
                info!("Offer of {} from {}", packet.yiaddr, server);
                self.server = server;
                self.requested = packet.yiaddr;
                self.state = LeaseState::Requesting;
                self.timeout = 0;
                self.packet_num = 0;
                actions.push(self.arm());
            }
            LeaseState::Requesting
            | LeaseState::Renewing
            | LeaseState::RenewRequested
            | LeaseState::Rebinding => {
                if msg_type == DHCPACK {
                    self.lease_secs = match packet.lease_time() {
                        Some(secs) => (secs & LEASE_SECS_MASK).max(MIN_LEASE_SECS),
                        None => {
                            warn!("No lease time with ACK, using 1 hour lease");
                            DEFAULT_LEASE_SECS
                        }
                    };
                    self.timeout = self.lease_secs / 2;
                    self.requested = packet.yiaddr;
                    info!(
                        "Lease of {} obtained, lease time {}",
                        self.requested, self.lease_secs
                    );
                    let event = if self.state == LeaseState::Requesting {
                        ScriptEvent::Bound
                    } else {
                        ScriptEvent::Renew
                    };
                    actions.push(Action::Script(event, Some(packet.clone())));
                    self.state = LeaseState::Bound;
                    self.listen(ListenMode::None, &mut actions);
                    actions.push(self.arm());
                } else if msg_type == DHCPNAK {
                    info!("Received DHCP NAK");
                    actions.push(Action::Script(ScriptEvent::Nak, Some(packet.clone())));
                    if self.state != LeaseState::Requesting {
                        actions.push(Action::Script(ScriptEvent::Deconfig, None));
                    }
                    self.listen(ListenMode::Raw, &mut actions);
                    actions.push(Action::Pause(Duration::from_secs(u64::from(
                        self.nak_cooldown,
                    ))));
                    self.state = LeaseState::InitSelecting;
                    self.requested = Ipv4Addr::UNSPECIFIED;
                    self.timeout = 0;
                    self.packet_num = 0;
                    actions.push(self.arm());
                }
            }
            LeaseState::Bound | LeaseState::Released => {}
        }
        actions
    }

    pub fn on_control(&mut self, control: Control) -> Result<Vec<Action>, ClientError> {
        let mut actions = Vec::new();
        match control {
            Control::Renew => self.perform_renew(&mut actions)?,
            Control::Release => {
                self.perform_release(&mut actions)?;
                actions.push(Action::Arm(None));
            }
            Control::Terminate => {
                info!("Received terminate");
                self.perform_release(&mut actions)?;
                actions.push(Action::Stop(ClientExit::Terminated));
            }
        }
        Ok(actions)
    }

    fn perform_renew(&mut self, actions: &mut Vec<Action>) -> Result<(), ClientError> {
        info!("Performing a DHCP renew");
        match self.state {
            LeaseState::Bound | LeaseState::Renewing | LeaseState::Rebinding => {
                if self.state == LeaseState::Bound {
                    self.listen(ListenMode::Kernel, actions);
                }
                self.state = LeaseState::RenewRequested;
                return self.renew_step(actions);
            }
            LeaseState::RenewRequested => {
                // Second request while one is pending: start over.
                actions.push(Action::Script(ScriptEvent::Deconfig, None));
                self.listen(ListenMode::Raw, actions);
                self.state = LeaseState::InitSelecting;
            }
            LeaseState::Requesting | LeaseState::Released => {
                self.listen(ListenMode::Raw, actions);
                self.state = LeaseState::InitSelecting;
            }
            LeaseState::InitSelecting => {}
        }
        self.packet_num = 0;
        self.timeout = 0;
        actions.push(self.arm());
        Ok(())
    }

    fn perform_release(&mut self, actions: &mut Vec<Action>) -> Result<(), ClientError> {
        if matches!(
            self.state,
            LeaseState::Bound | LeaseState::Renewing | LeaseState::Rebinding
        ) {
            info!("Unicasting a release of {} to {}", self.requested, self.server);
            let packet = self.identity.release(self.server, self.requested)?;
            actions.push(Action::Send(Outbound {
                packet,
                route: Route::Unicast {
                    source: self.requested,
                    server: self.server,
                },
            }));
            actions.push(Action::Script(ScriptEvent::Deconfig, None));
        }
        info!("Entering released state");
        self.listen(ListenMode::None, actions);
        self.state = LeaseState::Released;
        Ok(())
    }
}
