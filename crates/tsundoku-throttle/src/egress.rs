//! Egress IP probe
//!
//! The rate-limit audit record carries the public address the process was
//! calling from. It is discovered with a STUN binding request (RFC 5389):
//! the server echoes our reflexive address in XOR-MAPPED-ADDRESS.
//! Discovery is best effort; every failure yields `None`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use tsundoku_core::{TsundokuError, TsundokuResult};

/// STUN message types
const STUN_BINDING_REQUEST: u16 = 0x0001;
const STUN_BINDING_RESPONSE: u16 = 0x0101;

/// STUN attribute types
const STUN_ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const STUN_ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// STUN magic cookie (RFC 5389)
const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

/// STUN header size
const STUN_HEADER_SIZE: usize = 20;

/// Public STUN servers
pub const STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun1.l.google.com:19302",
    "stun.cloudflare.com:3478",
];

/// Source of the best-effort public IP
#[async_trait]
pub trait EgressProbe: Send + Sync {
    async fn public_ip(&self) -> Option<String>;
}

/// Probe that never reports an address
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProbe;

#[async_trait]
impl EgressProbe for NoProbe {
    async fn public_ip(&self) -> Option<String> {
        None
    }
}

/// Probe with a fixed answer (operator override, tests)
#[derive(Clone, Debug)]
pub struct StaticProbe(pub String);

#[async_trait]
impl EgressProbe for StaticProbe {
    async fn public_ip(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// STUN-based egress probe
#[derive(Clone, Debug)]
pub struct StunProbe {
    servers: Vec<String>,
    /// Per-request receive deadline
    timeout: Duration,
    /// Requests per server
    retries: u32,
}

impl StunProbe {
    pub fn new() -> Self {
        Self::with_servers(STUN_SERVERS.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_servers(servers: Vec<String>) -> Self {
        StunProbe {
            servers,
            timeout: Duration::from_secs(2),
            retries: 2,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reflexive address as seen by one server
    pub async fn discover(&self, server: &str) -> TsundokuResult<SocketAddr> {
        let server_addr = lookup_host(server)
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TsundokuError::Transient(format!("no IPv4 address for {}", server)))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let transaction_id: [u8; 12] = rand::random();
        let request = build_binding_request(&transaction_id);

        for _ in 0..self.retries {
            socket.send_to(&request, server_addr).await?;

            let mut buf = [0u8; 512];
            match timeout(self.timeout, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) if from == server_addr => {
                    if let Some(mapped) = parse_binding_response(&buf[..len], &transaction_id) {
                        return Ok(mapped);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => tracing::debug!(server, "STUN request timed out"),
            }
        }

        Err(TsundokuError::Transient(format!(
            "STUN discovery via {} failed",
            server
        )))
    }
}

impl Default for StunProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EgressProbe for StunProbe {
    async fn public_ip(&self) -> Option<String> {
        for server in &self.servers {
            match self.discover(server).await {
                Ok(addr) => return Some(addr.ip().to_string()),
                Err(e) => tracing::debug!(server = %server, error = %e, "egress probe failed"),
            }
        }
        tracing::warn!("egress IP unknown, all STUN servers failed");
        None
    }
}

fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut request = Vec::with_capacity(STUN_HEADER_SIZE);
    request.extend_from_slice(&STUN_BINDING_REQUEST.to_be_bytes());
    // No attributes
    request.extend_from_slice(&0u16.to_be_bytes());
    request.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    request.extend_from_slice(transaction_id);
    request
}

fn parse_binding_response(data: &[u8], expected_txn_id: &[u8; 12]) -> Option<SocketAddr> {
    if data.len() < STUN_HEADER_SIZE {
        return None;
    }
    if u16::from_be_bytes([data[0], data[1]]) != STUN_BINDING_RESPONSE {
        return None;
    }
    if u32::from_be_bytes([data[4], data[5], data[6], data[7]]) != STUN_MAGIC_COOKIE {
        return None;
    }
    if &data[8..20] != expected_txn_id {
        return None;
    }

    let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = STUN_HEADER_SIZE + msg_len;
    if data.len() < end {
        return None;
    }

    let mut mapped = None;
    let mut offset = STUN_HEADER_SIZE;
    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        offset += 4;
        if offset + attr_len > end {
            break;
        }

        let value = &data[offset..offset + attr_len];
        match attr_type {
            STUN_ATTR_XOR_MAPPED_ADDRESS => {
                return parse_xor_mapped_address(value, expected_txn_id);
            }
            // Legacy servers; keep looking for the XOR form
            STUN_ATTR_MAPPED_ADDRESS => mapped = parse_mapped_address(value),
            _ => {}
        }

        // Attributes are padded to 4 bytes
        offset += (attr_len + 3) & !3;
    }

    mapped
}

fn parse_xor_mapped_address(data: &[u8], txn_id: &[u8; 12]) -> Option<SocketAddr> {
    if data.len() < 8 {
        return None;
    }
    let port = u16::from_be_bytes([data[2], data[3]]) ^ ((STUN_MAGIC_COOKIE >> 16) as u16);

    match data[1] {
        0x01 => {
            let xor_addr = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            let ip = Ipv4Addr::from(xor_addr ^ STUN_MAGIC_COOKIE);
            Some(SocketAddr::new(IpAddr::V4(ip), port))
        }
        0x02 => {
            if data.len() < 20 {
                return None;
            }
            // XOR key is the cookie followed by the transaction ID
            let mut key = [0u8; 16];
            key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
            key[4..].copy_from_slice(txn_id);
            let mut octets = [0u8; 16];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = data[4 + i] ^ key[i];
            }
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

fn parse_mapped_address(data: &[u8]) -> Option<SocketAddr> {
    if data.len() < 8 || data[1] != 0x01 {
        return None;
    }
    let port = u16::from_be_bytes([data[2], data[3]]);
    let ip = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xor_mapped_response(txn_id: &[u8; 12], addr: SocketAddr) -> Vec<u8> {
        let mut attr = vec![0x00, 0x01];
        let port = addr.port() ^ ((STUN_MAGIC_COOKIE >> 16) as u16);
        attr.extend_from_slice(&port.to_be_bytes());
        match addr.ip() {
            IpAddr::V4(ip) => {
                attr.extend_from_slice(&(u32::from(ip) ^ STUN_MAGIC_COOKIE).to_be_bytes())
            }
            IpAddr::V6(_) => unreachable!("IPv4 only"),
        }

        let mut msg = Vec::new();
        msg.extend_from_slice(&STUN_BINDING_RESPONSE.to_be_bytes());
        msg.extend_from_slice(&((4 + attr.len()) as u16).to_be_bytes());
        msg.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        msg.extend_from_slice(txn_id);
        msg.extend_from_slice(&STUN_ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        msg.extend_from_slice(&(attr.len() as u16).to_be_bytes());
        msg.extend_from_slice(&attr);
        msg
    }

    #[test]
    fn test_build_binding_request() {
        let request = build_binding_request(&[1u8; 12]);
        assert_eq!(request.len(), STUN_HEADER_SIZE);
        assert_eq!(&request[..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&request[4..8], &STUN_MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&request[8..], &[1u8; 12]);
    }

    #[test]
    fn test_parse_xor_mapped_ipv4() {
        let txn = [7u8; 12];
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let response = xor_mapped_response(&txn, addr);
        assert_eq!(parse_binding_response(&response, &txn), Some(addr));
    }

    #[test]
    fn test_parse_rejects_foreign_transaction() {
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let response = xor_mapped_response(&[7u8; 12], addr);
        assert_eq!(parse_binding_response(&response, &[8u8; 12]), None);
        assert_eq!(parse_binding_response(&response[..10], &[7u8; 12]), None);
    }

    #[test]
    fn test_parse_xor_mapped_ipv6() {
        let txn = [3u8; 12];
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut key = [0u8; 16];
        key[..4].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        key[4..].copy_from_slice(&txn);

        let mut attr = vec![0x00, 0x02];
        attr.extend_from_slice(&(443u16 ^ 0x2112).to_be_bytes());
        attr.extend(ip.octets().iter().zip(key.iter()).map(|(a, k)| a ^ k));

        let parsed = parse_xor_mapped_address(&attr, &txn).unwrap();
        assert_eq!(parsed, SocketAddr::new(IpAddr::V6(ip), 443));
    }

    #[tokio::test]
    async fn test_static_and_no_probe() {
        assert_eq!(NoProbe.public_ip().await, None);
        assert_eq!(
            StaticProbe("198.51.100.1".into()).public_ip().await.as_deref(),
            Some("198.51.100.1")
        );
    }

    #[tokio::test]
    async fn test_stun_probe_against_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, STUN_HEADER_SIZE);
            let txn: [u8; 12] = buf[8..20].try_into().unwrap();
            let response = xor_mapped_response(&txn, from);
            server.send_to(&response, from).await.unwrap();
        });

        let probe = StunProbe::with_servers(vec![server_addr.to_string()])
            .with_timeout(Duration::from_secs(2));
        assert_eq!(probe.public_ip().await.as_deref(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_stun_probe_unreachable_is_none() {
        let probe = StunProbe::with_servers(vec!["not a host".into()]);
        assert_eq!(probe.public_ip().await, None);
    }
}
