// src/discovery.rs
//
// WSTK adapter discovery over UDP.
//
// One broadcast request is sent to the discovery port, then replies are
// collected for a bounded window. Each reply is a block of `KEY=value` lines;
// replies from the same address are merged and every distinct address is
// reported once the window has closed, in the order it first answered.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::io::IoError;
use crate::logging::Logger;
use crate::settings::BridgeSettings;

// ============================================================================
// Constants
// ============================================================================

/// Discovery request, protocol version 1
pub const DISCOVERY_REQUEST: &[u8] = b"WSTK-DISCOVER 1\n";

/// Display label shared by every adapter
const ADAPTER_LABEL: &str = "Silicon Labs WSTK adapter";

// ============================================================================
// Types
// ============================================================================

/// Attribute key in a discovery reply.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiscoveryKey {
    AdapterNetif,
    AdapterNickname,
    AdapterSerial,
    AdapterType,
    AdapterFirmware,
    Other(String),
}

impl DiscoveryKey {
    pub fn parse(key: &str) -> Self {
        match key {
            "ADAPTER_NETIF" => DiscoveryKey::AdapterNetif,
            "ADAPTER_NICKNAME" => DiscoveryKey::AdapterNickname,
            "ADAPTER_SN" => DiscoveryKey::AdapterSerial,
            "ADAPTER_TYPE" => DiscoveryKey::AdapterType,
            "ADAPTER_FW" => DiscoveryKey::AdapterFirmware,
            other => DiscoveryKey::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DiscoveryKey::AdapterNetif => "ADAPTER_NETIF",
            DiscoveryKey::AdapterNickname => "ADAPTER_NICKNAME",
            DiscoveryKey::AdapterSerial => "ADAPTER_SN",
            DiscoveryKey::AdapterType => "ADAPTER_TYPE",
            DiscoveryKey::AdapterFirmware => "ADAPTER_FW",
            DiscoveryKey::Other(s) => s,
        }
    }
}

impl Serialize for DiscoveryKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One responding adapter and what it told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryRecord {
    pub address: IpAddr,
    pub attributes: BTreeMap<DiscoveryKey, String>,
}

impl DiscoveryRecord {
    pub fn new(address: IpAddr) -> Self {
        DiscoveryRecord {
            address,
            attributes: BTreeMap::new(),
        }
    }

    /// Non-empty attribute value
    pub fn get(&self, key: &DiscoveryKey) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Interface id: the advertised network address, else the reply source.
    pub fn interface_value(&self) -> String {
        match self.get(&DiscoveryKey::AdapterNetif) {
            Some(netif) => netif.to_string(),
            None => self.address.to_string(),
        }
    }

    pub fn display_name(&self) -> String {
        match self.get(&DiscoveryKey::AdapterNickname) {
            Some(nick) => format!("{} ({})", nick, ADAPTER_LABEL),
            None => ADAPTER_LABEL.to_string(),
        }
    }

    /// Fold a later reply from the same address into this record.
    fn merge(&mut self, attributes: BTreeMap<DiscoveryKey, String>) {
        self.attributes.extend(attributes);
    }
}

/// Parse the text of one reply datagram.
///
/// Unknown keys are kept; lines without `=` and blank lines are skipped.
pub fn parse_discovery_reply(text: &str) -> BTreeMap<DiscoveryKey, String> {
    text.trim_end_matches('\0')
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter_map(|(key, value)| {
            let key = key.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            if key.is_empty() {
                return None;
            }
            Some((DiscoveryKey::parse(key), value.trim().to_string()))
        })
        .collect()
}

// ============================================================================
// Service
// ============================================================================

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub port: u16,
    /// Destination of the request, normally the limited broadcast address
    pub target: String,
    pub window: Duration,
}

impl DiscoveryConfig {
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        DiscoveryConfig {
            port: settings.discovery_port,
            target: settings.discovery_broadcast.clone(),
            window: settings.discovery_window(),
        }
    }
}

pub struct DiscoveryService {
    config: DiscoveryConfig,
    log: Logger,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig, log: Logger) -> Self {
        DiscoveryService { config, log }
    }

    /// Run one discovery round and report every responder to `on_reply`.
    /// Returns the number of distinct responders.
    pub async fn run_discovery<F>(&self, mut on_reply: F) -> Result<usize, IoError>
    where
        F: FnMut(&DiscoveryRecord),
    {
        let device = format!("discovery(udp:{})", self.config.port);

        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| IoError::connection(&device, format!("bind: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| IoError::configuration(&device, format!("broadcast: {}", e)))?;
        socket
            .send_to(
                DISCOVERY_REQUEST,
                (self.config.target.as_str(), self.config.port),
            )
            .await
            .map_err(|e| IoError::write(&device, e.to_string()))?;

        tlog!(
            self.log,
            "[discovery] Request sent to {}:{}, listening for {:?}",
            self.config.target,
            self.config.port,
            self.config.window
        );

        let mut records: Vec<DiscoveryRecord> = Vec::new();
        let mut buf = [0u8; 2048];
        let deadline = tokio::time::Instant::now() + self.config.window;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, from))) => {
                    let text = match std::str::from_utf8(&buf[..n]) {
                        Ok(t) => t,
                        Err(e) => {
                            let err = IoError::protocol(&from.to_string(), e.to_string());
                            twarn!(self.log, "[discovery] Ignoring reply: {}", err);
                            continue;
                        }
                    };
                    let attributes = parse_discovery_reply(text);
                    let address = from.ip();
                    match records.iter_mut().find(|r| r.address == address) {
                        Some(record) => record.merge(attributes),
                        None => {
                            let mut record = DiscoveryRecord::new(address);
                            record.merge(attributes);
                            records.push(record);
                        }
                    }
                }
                Ok(Err(e)) => return Err(IoError::read(&device, e.to_string())),
                Err(_) => break, // window closed
            }
        }

        for record in &records {
            tlog!(
                self.log,
                "[discovery] Adapter {}",
                serde_json::to_string(record).unwrap_or_else(|_| record.address.to_string())
            );
            on_reply(record);
        }
        tlog!(self.log, "[discovery] {} adapter(s) found", records.len());
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn record(attrs: &[(&str, &str)]) -> DiscoveryRecord {
        let mut r = DiscoveryRecord::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        for (k, v) in attrs {
            r.attributes.insert(DiscoveryKey::parse(k), v.to_string());
        }
        r
    }

    #[test]
    fn test_parse_reply_lines() {
        let attrs = parse_discovery_reply(
            "ADAPTER_NICKNAME = bench \r\nADAPTER_SN=440123456\n\njunk line\nVENDOR_X=1\n\0\0",
        );
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[&DiscoveryKey::AdapterNickname], "bench");
        assert_eq!(attrs[&DiscoveryKey::AdapterSerial], "440123456");
        assert_eq!(attrs[&DiscoveryKey::Other("VENDOR_X".into())], "1");
    }

    #[test]
    fn test_address_only_record() {
        let r = record(&[]);
        assert_eq!(r.display_name(), "Silicon Labs WSTK adapter");
        assert_eq!(r.interface_value(), "192.168.1.20");
    }

    #[test]
    fn test_nickname_and_netif_override() {
        let r = record(&[("ADAPTER_NICKNAME", "Bench A"), ("ADAPTER_NETIF", "10.4.4.4")]);
        assert_eq!(r.display_name(), "Bench A (Silicon Labs WSTK adapter)");
        assert_eq!(r.interface_value(), "10.4.4.4");
    }

    #[test]
    fn test_empty_values_do_not_override() {
        let r = record(&[("ADAPTER_NICKNAME", ""), ("ADAPTER_NETIF", "")]);
        assert_eq!(r.display_name(), "Silicon Labs WSTK adapter");
        assert_eq!(r.interface_value(), "192.168.1.20");
    }

    #[test]
    fn test_record_serializes_keys_as_strings() {
        let r = record(&[("ADAPTER_NICKNAME", "n")]);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(
            json,
            r#"{"address":"192.168.1.20","attributes":{"ADAPTER_NICKNAME":"n"}}"#
        );
    }

    #[tokio::test]
    async fn test_duplicate_replies_coalesce() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, from) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], DISCOVERY_REQUEST);
            responder
                .send_to(b"ADAPTER_NICKNAME=old\nADAPTER_SN=1\n", from)
                .await
                .unwrap();
            responder
                .send_to(b"ADAPTER_NICKNAME=new\n", from)
                .await
                .unwrap();
        });

        let service = DiscoveryService::new(
            DiscoveryConfig {
                port,
                target: "127.0.0.1".to_string(),
                window: Duration::from_millis(300),
            },
            Logger::capture(),
        );

        let mut seen = Vec::new();
        let count = service
            .run_discovery(|r| seen.push(r.clone()))
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get(&DiscoveryKey::AdapterNickname), Some("new"));
        assert_eq!(seen[0].get(&DiscoveryKey::AdapterSerial), Some("1"));
        assert_eq!(seen[0].interface_value(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_silent_network_reports_nothing() {
        // Bound but never answers
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        let service = DiscoveryService::new(
            DiscoveryConfig {
                port,
                target: "127.0.0.1".to_string(),
                window: Duration::from_millis(100),
            },
            Logger::capture(),
        );
        let mut calls = 0;
        let count = service.run_discovery(|_| calls += 1).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(calls, 0);
        drop(responder);
    }
}
