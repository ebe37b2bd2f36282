use serde::Serialize;
use std::future::pending;
use std::net::Ipv4Addr;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use br_common::NetworkInterfaceHandle;

use crate::config::DhcpClientConfig;
use crate::control::Control;
use crate::error::ClientError;
use crate::options::{OPT_DNS_SERVER, OPT_DOMAIN_NAME, OPT_ROUTER, OPT_SUBNET_MASK};
use crate::packet::DhcpPacket;
use crate::script::{HookScript, LeaseScript};
use crate::state_machine::{Action, ClientExit, LeaseSession, ScriptEvent};
use crate::transport::{self, Listener};

/// The address currently held, as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub address: Ipv4Addr,
    pub server: Ipv4Addr,
    pub lease_secs: u32,
    pub subnet: Option<Ipv4Addr>,
    pub router: Vec<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    pub domain: Option<String>,
}

impl Lease {
    pub fn from_ack(ack: &DhcpPacket, lease_secs: u32, fallback_server: Ipv4Addr) -> Self {
        Self {
            address: ack.yiaddr,
            server: ack.server_id().unwrap_or(fallback_server),
            lease_secs,
            subnet: ack.option_ipv4(OPT_SUBNET_MASK),
            router: ack.option_ipv4_list(OPT_ROUTER),
            dns: ack.option_ipv4_list(OPT_DNS_SERVER),
            domain: ack.option_str(OPT_DOMAIN_NAME),
        }
    }
}

async fn recv_on(listener: Option<&Listener>) -> std::io::Result<Option<DhcpPacket>> {
    match listener {
        Some(l) => l.recv().await,
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => pending().await,
    }
}

/// Drives a [`LeaseSession`] against real sockets, timers and control requests.
pub struct LeaseClient<S: LeaseScript> {
    interface: String,
    iface: NetworkInterfaceHandle,
    session: LeaseSession,
    listener: Option<Listener>,
    deadline: Option<Instant>,
    script: S,
    lease_tx: watch::Sender<Option<Lease>>,
}

impl<S: LeaseScript> LeaseClient<S> {
    pub fn new(config: &DhcpClientConfig, script: S) -> Result<Self, ClientError> {
        let iface = NetworkInterfaceHandle::resolve(&config.interface)?;
        info!(
            "DHCP client on {} (index {}, {})",
            iface.name, iface.index, iface.mac
        );
        let session = LeaseSession::new(config, iface.mac)?;
        let (lease_tx, _) = watch::channel(None);
        Ok(Self {
            interface: config.interface.clone(),
            iface,
            session,
            listener: None,
            deadline: None,
            script,
            lease_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Lease>> {
        self.lease_tx.subscribe()
    }

    /// Run until the lease fails or termination is requested. A closed
    /// control channel only stops control delivery, not the client.
    pub async fn run(mut self, mut control: mpsc::Receiver<Control>) -> Result<ClientExit, ClientError> {
        let actions = self.session.start();
        if let Some(exit) = self.apply(actions).await? {
            return Ok(exit);
        }

        let mut control_open = true;
        loop {
            let actions = tokio::select! {
                msg = control.recv(), if control_open => match msg {
                    Some(request) => {
                        info!("Control request: {}", request);
                        self.session.on_control(request)?
                    }
                    None => {
                        debug!("Control channel closed");
                        control_open = false;
                        continue;
                    }
                },
                received = recv_on(self.listener.as_ref()) => match received {
                    Ok(Some(packet)) => self.session.on_packet(&packet),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Read error: {}, reopening socket", e);
                        tokio::time::sleep(self.session.discover_timeout()).await;
                        self.reopen_listener()?;
                        continue;
                    }
                },
                _ = sleep_until_opt(self.deadline) => {
                    self.refresh_interface()?;
                    self.session.timer_expired()?
                }
            };
            if let Some(exit) = self.apply(actions).await? {
                return Ok(exit);
            }
        }
    }

    /// Bridges may change index or address underneath us.
    fn refresh_interface(&mut self) -> Result<(), ClientError> {
        let iface = NetworkInterfaceHandle::resolve(&self.interface)?;
        if iface.index != self.iface.index {
            info!("Interface {} index changed to {}", iface.name, iface.index);
        }
        self.session.set_mac(iface.mac);
        self.iface = iface;
        Ok(())
    }

    fn reopen_listener(&mut self) -> Result<(), ClientError> {
        self.listener = None;
        self.listener = Listener::open(self.session.listen_mode(), &self.iface)?;
        Ok(())
    }

    async fn apply(&mut self, actions: Vec<Action>) -> Result<Option<ClientExit>, ClientError> {
        for action in actions {
            match action {
                Action::Send(out) => {
                    if let Err(e) = transport::send(&out, &self.iface) {
                        error!("Error sending {:?}: {}", out.route, e);
                    }
                }
                Action::Listen(mode) => {
                    self.listener = None;
                    self.listener = Listener::open(mode, &self.iface)?;
                }
                Action::Script(event, packet) => {
                    self.script
                        .run(event, &self.iface.name, packet.as_ref())
                        .await;
                    self.publish(event, packet.as_ref());
                }
                Action::Arm(after) => self.deadline = after.map(|d| Instant::now() + d),
                Action::Pause(d) => tokio::time::sleep(d).await,
                Action::Stop(exit) => {
                    self.listener = None;
                    return Ok(Some(exit));
                }
            }
        }
        Ok(None)
    }

    fn publish(&self, event: ScriptEvent, packet: Option<&DhcpPacket>) {
        match (event, packet) {
            (ScriptEvent::Bound | ScriptEvent::Renew, Some(ack)) => {
                let lease = Lease::from_ack(ack, self.session.lease_secs(), self.session.server());
                self.lease_tx.send_replace(Some(lease));
            }
            (ScriptEvent::Deconfig, _) => {
                self.lease_tx.send_replace(None);
            }
            _ => {}
        }
    }
}

/// A lease client running as a tokio task.
pub struct DhcpClientHandle {
    control: mpsc::Sender<Control>,
    lease: watch::Receiver<Option<Lease>>,
    task: JoinHandle<Result<ClientExit, ClientError>>,
}

impl DhcpClientHandle {
    /// Resolves with the first lease; the task keeps maintaining it afterwards.
    pub async fn wait_bound(&mut self) -> Result<Lease, ClientError> {
        loop {
            if let Some(lease) = self.lease.borrow_and_update().clone() {
                return Ok(lease);
            }
            if self.lease.changed().await.is_err() {
                return Err(ClientError::Stopped);
            }
        }
    }

    pub fn lease(&self) -> Option<Lease> {
        self.lease.borrow().clone()
    }

    pub fn controller(&self) -> mpsc::Sender<Control> {
        self.control.clone()
    }

    pub async fn send(&self, request: Control) -> Result<(), ClientError> {
        self.control
            .send(request)
            .await
            .map_err(|_| ClientError::Stopped)
    }

    pub async fn join(self) -> Result<ClientExit, ClientError> {
        self.task.await?
    }
}

pub fn spawn_dhcp_client<S>(config: &DhcpClientConfig, script: S) -> Result<DhcpClientHandle, ClientError>
where
    S: LeaseScript + 'static,
{
    let client = LeaseClient::new(config, script)?;
    let lease = client.subscribe();
    let (control, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));
    Ok(DhcpClientHandle {
        control,
        lease,
        task,
    })
}

/// Start a client on `interface` with default settings and the configured hook.
pub fn run_dhcp_client(interface: &str) -> Result<DhcpClientHandle, ClientError> {
    let config = DhcpClientConfig {
        interface: interface.to_string(),
        ..DhcpClientConfig::default()
    };
    spawn_dhcp_client(&config, HookScript::from_config(&config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DhcpOption, DHCPACK};
    use br_common::MacAddr;

    #[test]
    fn test_lease_from_ack() {
        let mut ack = DhcpPacket::new(DHCPACK, 1, MacAddr::default()).unwrap();
        ack.yiaddr = Ipv4Addr::new(10, 1, 0, 20);
        ack.add_option(&DhcpOption::new(OPT_ROUTER, vec![10, 1, 0, 1])).unwrap();
        ack.add_option(&DhcpOption::new(OPT_DOMAIN_NAME, b"home".to_vec())).unwrap();

        let lease = Lease::from_ack(&ack, 600, Ipv4Addr::new(10, 1, 0, 254));
        assert_eq!(lease.address, Ipv4Addr::new(10, 1, 0, 20));
        assert_eq!(lease.server, Ipv4Addr::new(10, 1, 0, 254));
        assert_eq!(lease.router, vec![Ipv4Addr::new(10, 1, 0, 1)]);
        assert_eq!(lease.domain.as_deref(), Some("home"));
        assert!(lease.dns.is_empty());
        assert_eq!(lease.subnet, None);
    }

    #[tokio::test]
    async fn test_unknown_interface_fails_to_start() {
        let config = DhcpClientConfig {
            interface: "nosuchif0".into(),
            ..DhcpClientConfig::default()
        };
        let err = spawn_dhcp_client(&config, crate::script::LogScript).err().unwrap();
        assert!(matches!(err, ClientError::Interface(_)));
    }
}
