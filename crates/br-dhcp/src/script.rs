//! Lease event hooks ("deconfig", "bound", "renew", "nak", "leasefail").

use std::future::Future;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::DhcpClientConfig;
use crate::options::{OPT_DNS_SERVER, OPT_DOMAIN_NAME, OPT_ROUTER, OPT_SUBNET_MASK};
use crate::packet::DhcpPacket;
use crate::state_machine::ScriptEvent;

pub trait LeaseScript: Send + Sync {
    fn run(
        &self,
        event: ScriptEvent,
        interface: &str,
        packet: Option<&DhcpPacket>,
    ) -> impl Future<Output = ()> + Send;
}

fn join_addrs(packet: &DhcpPacket, code: u8) -> Option<String> {
    let addrs = packet.option_ipv4_list(code);
    if addrs.is_empty() {
        return None;
    }
    Some(
        addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Environment handed to a hook program.
pub fn script_env(interface: &str, packet: Option<&DhcpPacket>) -> Vec<(String, String)> {
    let mut env = vec![("interface".to_string(), interface.to_string())];
    let Some(packet) = packet else {
        return env;
    };

    if !packet.yiaddr.is_unspecified() {
        env.push(("ip".into(), packet.yiaddr.to_string()));
    }
    if let Some(mask) = packet.option_ipv4(OPT_SUBNET_MASK) {
        env.push(("subnet".into(), mask.to_string()));
    }
    if let Some(routers) = join_addrs(packet, OPT_ROUTER) {
        env.push(("router".into(), routers));
    }
    if let Some(dns) = join_addrs(packet, OPT_DNS_SERVER) {
        env.push(("dns".into(), dns));
    }
    if let Some(domain) = packet.option_str(OPT_DOMAIN_NAME) {
        env.push(("domain".into(), domain));
    }
    if let Some(server) = packet.server_id() {
        env.push(("serverid".into(), server.to_string()));
    }
    if let Some(lease) = packet.lease_time() {
        env.push(("lease".into(), lease.to_string()));
    }
    env
}

/// Logs lease events and does nothing else.
#[derive(Debug, Clone, Default)]
pub struct LogScript;

impl LeaseScript for LogScript {
    async fn run(&self, event: ScriptEvent, interface: &str, packet: Option<&DhcpPacket>) {
        match packet {
            Some(p) => info!(
                event = event.as_str(),
                interface,
                ip = %p.yiaddr,
                "lease event"
            ),
            None => info!(event = event.as_str(), interface, "lease event"),
        }
    }
}

/// Runs `program <event>` with lease details in the environment and waits for it.
#[derive(Debug, Clone)]
pub struct CommandScript {
    program: PathBuf,
}

impl CommandScript {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl LeaseScript for CommandScript {
    async fn run(&self, event: ScriptEvent, interface: &str, packet: Option<&DhcpPacket>) {
        let status = tokio::process::Command::new(&self.program)
            .arg(event.as_str())
            .envs(script_env(interface, packet))
            .status()
            .await;
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => warn!("{} {} exited with {}", self.program.display(), event.as_str(), s),
            Err(e) => warn!("Cannot run {}: {}", self.program.display(), e),
        }
    }
}

/// Hook selected by configuration.
#[derive(Debug, Clone)]
pub enum HookScript {
    Log(LogScript),
    Command(CommandScript),
}

impl HookScript {
    pub fn from_config(config: &DhcpClientConfig) -> Self {
        match &config.script {
            Some(path) if !path.is_empty() => HookScript::Command(CommandScript::new(path)),
            _ => HookScript::Log(LogScript),
        }
    }
}

impl LeaseScript for HookScript {
    async fn run(&self, event: ScriptEvent, interface: &str, packet: Option<&DhcpPacket>) {
        match self {
            HookScript::Log(s) => s.run(event, interface, packet).await,
            HookScript::Command(s) => s.run(event, interface, packet).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DhcpOption, DHCPACK};
    use br_common::MacAddr;
    use std::net::Ipv4Addr;

    #[test]
    fn test_env_from_ack() {
        let mut pkt = DhcpPacket::new(DHCPACK, 1, MacAddr::default()).unwrap();
        pkt.yiaddr = Ipv4Addr::new(10, 0, 0, 9);
        pkt.add_option(&DhcpOption::server_id(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        pkt.add_option(&DhcpOption::new(OPT_SUBNET_MASK, vec![255, 255, 255, 0])).unwrap();
        pkt.add_option(&DhcpOption::new(OPT_DNS_SERVER, vec![10, 0, 0, 1, 9, 9, 9, 9])).unwrap();
        pkt.add_option(&DhcpOption::lease_time(600)).unwrap();

        let env = script_env("eth0", Some(&pkt));
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("interface"), Some("eth0"));
        assert_eq!(get("ip"), Some("10.0.0.9"));
        assert_eq!(get("subnet"), Some("255.255.255.0"));
        assert_eq!(get("dns"), Some("10.0.0.1 9.9.9.9"));
        assert_eq!(get("serverid"), Some("10.0.0.1"));
        assert_eq!(get("lease"), Some("600"));
        assert_eq!(get("router"), None);
    }

    #[test]
    fn test_env_without_packet() {
        assert_eq!(script_env("eth1", None), vec![("interface".to_string(), "eth1".to_string())]);
    }

    #[test]
    fn test_hook_from_config() {
        let mut config = DhcpClientConfig::default();
        assert!(matches!(HookScript::from_config(&config), HookScript::Log(_)));
        config.script = Some("/usr/share/bringup/lease.sh".into());
        assert!(matches!(HookScript::from_config(&config), HookScript::Command(_)));
    }

    #[tokio::test]
    async fn test_command_script_gets_event_and_env() {
        let dir = std::env::temp_dir().join(format!("br-dhcp-script-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("out");
        let script = dir.join("hook.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1 $interface\" > {}\n", out.display()),
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        CommandScript::new(&script)
            .run(ScriptEvent::Deconfig, "eth7", None)
            .await;
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "deconfig eth7");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
