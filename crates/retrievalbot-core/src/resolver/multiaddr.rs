//! Minimal multiaddr support: the binary form the chain stores and the text
//! form tasks carry.
//!
//! Only the protocols that show up in provider registrations are known.
//! Decoding stops at the first unknown component and keeps what came before
//! it, so a known host and port survive an unfamiliar transport suffix. An
//! address whose very first component is unknown is rejected.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultiaddrError {
    #[error("multiaddr is truncated")]
    Truncated,

    #[error("unknown protocol code {0}")]
    UnknownCode(u64),

    #[error("unknown protocol '{0}'")]
    UnknownName(String),

    #[error("invalid value for /{protocol}: {value}")]
    InvalidValue { protocol: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Ip4(Ipv4Addr),
    Ip6(Ipv6Addr),
    Dns(String),
    Dns4(String),
    Dns6(String),
    Dnsaddr(String),
    Tcp(u16),
    Udp(u16),
    Quic,
    QuicV1,
    Tls,
    Http,
    Https,
    Ws,
    Wss,
    Sni(String),
    Noise,
    WebTransport,
    WebRtcDirect,
    P2pCircuit,
    P2p(String),
}

const IP4: u64 = 4;
const TCP: u64 = 6;
const UDP: u64 = 273;
const WEBRTC_DIRECT: u64 = 280;
const P2P_CIRCUIT: u64 = 290;
const IP6: u64 = 41;
const DNS: u64 = 53;
const DNS4: u64 = 54;
const DNS6: u64 = 55;
const DNSADDR: u64 = 56;
const P2P: u64 = 421;
const HTTPS: u64 = 443;
const TLS: u64 = 448;
const SNI: u64 = 449;
const NOISE: u64 = 454;
const QUIC: u64 = 460;
const QUIC_V1: u64 = 461;
const WEBTRANSPORT: u64 = 465;
const WS: u64 = 477;
const WSS: u64 = 478;
const HTTP: u64 = 480;

impl Protocol {
    fn name(&self) -> &'static str {
        match self {
            Protocol::Ip4(_) => "ip4",
            Protocol::Ip6(_) => "ip6",
            Protocol::Dns(_) => "dns",
            Protocol::Dns4(_) => "dns4",
            Protocol::Dns6(_) => "dns6",
            Protocol::Dnsaddr(_) => "dnsaddr",
            Protocol::Tcp(_) => "tcp",
            Protocol::Udp(_) => "udp",
            Protocol::Quic => "quic",
            Protocol::QuicV1 => "quic-v1",
            Protocol::Tls => "tls",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ws => "ws",
            Protocol::Wss => "wss",
            Protocol::Sni(_) => "sni",
            Protocol::Noise => "noise",
            Protocol::WebTransport => "webtransport",
            Protocol::WebRtcDirect => "webrtc-direct",
            Protocol::P2pCircuit => "p2p-circuit",
            Protocol::P2p(_) => "p2p",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())?;
        match self {
            Protocol::Ip4(ip) => write!(f, "/{ip}"),
            Protocol::Ip6(ip) => write!(f, "/{ip}"),
            Protocol::Dns(h)
            | Protocol::Dns4(h)
            | Protocol::Dns6(h)
            | Protocol::Dnsaddr(h)
            | Protocol::Sni(h) => write!(f, "/{h}"),
            Protocol::Tcp(p) | Protocol::Udp(p) => write!(f, "/{p}"),
            Protocol::P2p(id) => write!(f, "/{id}"),
            _ => Ok(()),
        }
    }
}

/// Network address of a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiaddr(Vec<Protocol>);

/// Host part of a multiaddr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Host {
    Ip(IpAddr),
    Name(String),
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Host::Ip(ip) => write!(f, "{ip}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

impl Multiaddr {
    pub fn protocols(&self) -> &[Protocol] {
        &self.0
    }

    /// Decode the binary encoding (varint code, then the value).
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, MultiaddrError> {
        let mut protocols = Vec::new();
        while !bytes.is_empty() {
            let code = read_varint(&mut bytes)?;
            let protocol = match code {
                IP4 => {
                    let raw: [u8; 4] = take(&mut bytes, 4)?
                        .try_into()
                        .map_err(|_| MultiaddrError::Truncated)?;
                    Protocol::Ip4(Ipv4Addr::from(raw))
                }
                IP6 => {
                    let raw: [u8; 16] = take(&mut bytes, 16)?
                        .try_into()
                        .map_err(|_| MultiaddrError::Truncated)?;
                    Protocol::Ip6(Ipv6Addr::from(raw))
                }
                TCP | UDP => {
                    let raw = take(&mut bytes, 2)?;
                    let port = u16::from_be_bytes([raw[0], raw[1]]);
                    if code == TCP {
                        Protocol::Tcp(port)
                    } else {
                        Protocol::Udp(port)
                    }
                }
                DNS | DNS4 | DNS6 | DNSADDR => {
                    let name = read_str(&mut bytes, "dns")?;
                    match code {
                        DNS => Protocol::Dns(name),
                        DNS4 => Protocol::Dns4(name),
                        DNS6 => Protocol::Dns6(name),
                        _ => Protocol::Dnsaddr(name),
                    }
                }
                SNI => Protocol::Sni(read_str(&mut bytes, "sni")?),
                P2P => {
                    let len = read_varint(&mut bytes)? as usize;
                    Protocol::P2p(base58(take(&mut bytes, len)?))
                }
                QUIC => Protocol::Quic,
                QUIC_V1 => Protocol::QuicV1,
                TLS => Protocol::Tls,
                HTTP => Protocol::Http,
                HTTPS => Protocol::Https,
                WS => Protocol::Ws,
                WSS => Protocol::Wss,
                NOISE => Protocol::Noise,
                WEBTRANSPORT => Protocol::WebTransport,
                WEBRTC_DIRECT => Protocol::WebRtcDirect,
                P2P_CIRCUIT => Protocol::P2pCircuit,
                // the value length of an unknown code is unknowable
                other if protocols.is_empty() => return Err(MultiaddrError::UnknownCode(other)),
                _ => break,
            };
            protocols.push(protocol);
        }
        Ok(Self(protocols))
    }

    pub fn host(&self) -> Option<Host> {
        self.0.iter().find_map(|p| match p {
            Protocol::Ip4(ip) => Some(Host::Ip(IpAddr::V4(*ip))),
            Protocol::Ip6(ip) => Some(Host::Ip(IpAddr::V6(*ip))),
            Protocol::Dns(h) | Protocol::Dns4(h) | Protocol::Dns6(h) => Some(Host::Name(h.clone())),
            _ => None,
        })
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.host()? {
            Host::Ip(ip) => Some(ip),
            Host::Name(_) => None,
        }
    }

    pub fn tcp_port(&self) -> Option<u16> {
        self.0.iter().find_map(|p| match p {
            Protocol::Tcp(port) => Some(*port),
            _ => None,
        })
    }

    /// URL scheme named by the address: `/https` and `/tls/http` are
    /// `https`, plain `/http` is `http`.
    pub fn http_scheme(&self) -> Option<&'static str> {
        let has = |want: &Protocol| self.0.iter().any(|p| p == want);
        if has(&Protocol::Https) || (has(&Protocol::Tls) && has(&Protocol::Http)) {
            Some("https")
        } else if has(&Protocol::Http) {
            Some("http")
        } else {
            None
        }
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.0 {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

impl FromStr for Multiaddr {
    type Err = MultiaddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().trim_start_matches('/').split('/').filter(|p| !p.is_empty());
        let mut protocols = Vec::new();
        while let Some(name) = parts.next() {
            let mut value = |protocol: &'static str| {
                parts.next().map(str::to_string).ok_or(MultiaddrError::InvalidValue {
                    protocol,
                    value: String::new(),
                })
            };
            let protocol = match name {
                "ip4" => Protocol::Ip4(parse_value("ip4", value("ip4")?)?),
                "ip6" => Protocol::Ip6(parse_value("ip6", value("ip6")?)?),
                "dns" => Protocol::Dns(value("dns")?),
                "dns4" => Protocol::Dns4(value("dns4")?),
                "dns6" => Protocol::Dns6(value("dns6")?),
                "dnsaddr" => Protocol::Dnsaddr(value("dnsaddr")?),
                "tcp" => Protocol::Tcp(parse_value("tcp", value("tcp")?)?),
                "udp" => Protocol::Udp(parse_value("udp", value("udp")?)?),
                "p2p" | "ipfs" => Protocol::P2p(value("p2p")?),
                "quic" => Protocol::Quic,
                "quic-v1" => Protocol::QuicV1,
                "tls" => Protocol::Tls,
                "http" => Protocol::Http,
                "https" => Protocol::Https,
                "ws" => Protocol::Ws,
                "wss" => Protocol::Wss,
                "sni" => Protocol::Sni(value("sni")?),
                "noise" => Protocol::Noise,
                "webtransport" => Protocol::WebTransport,
                "webrtc-direct" => Protocol::WebRtcDirect,
                "p2p-circuit" => Protocol::P2pCircuit,
                other if protocols.is_empty() => {
                    return Err(MultiaddrError::UnknownName(other.to_string()));
                }
                _ => break,
            };
            protocols.push(protocol);
        }
        Ok(Self(protocols))
    }
}

fn parse_value<T: FromStr>(protocol: &'static str, value: String) -> Result<T, MultiaddrError> {
    value
        .parse()
        .map_err(|_| MultiaddrError::InvalidValue { protocol, value })
}

fn read_varint(bytes: &mut &[u8]) -> Result<u64, MultiaddrError> {
    let mut value = 0u64;
    for shift in (0..63).step_by(7) {
        let (&b, rest) = bytes.split_first().ok_or(MultiaddrError::Truncated)?;
        *bytes = rest;
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(MultiaddrError::Truncated)
}

fn take<'a>(bytes: &mut &'a [u8], n: usize) -> Result<&'a [u8], MultiaddrError> {
    if bytes.len() < n {
        return Err(MultiaddrError::Truncated);
    }
    let (head, rest) = bytes.split_at(n);
    *bytes = rest;
    Ok(head)
}

fn read_str(bytes: &mut &[u8], protocol: &'static str) -> Result<String, MultiaddrError> {
    let len = read_varint(bytes)? as usize;
    let raw = take(bytes, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| MultiaddrError::InvalidValue {
        protocol,
        value: String::from_utf8_lossy(raw).into_owned(),
    })
}

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Bitcoin-alphabet base58, the text form of peer ids.
fn base58(input: &[u8]) -> String {
    let zeros = input.iter().take_while(|&&b| b == 0).count();
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);
    for &byte in &input[zeros..] {
        let mut carry = u32::from(byte);
        for digit in digits.iter_mut() {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    std::iter::repeat_n('1', zeros)
        .chain(digits.iter().rev().map(|&d| BASE58_ALPHABET[d as usize] as char))
        .collect()
}

/// Globally routable unicast address.
pub fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => {
            let [a, b, ..] = ip.octets();
            !(ip.is_private()
                || ip.is_loopback()
                || ip.is_link_local()
                || ip.is_unspecified()
                || ip.is_broadcast()
                || ip.is_documentation()
                || ip.is_multicast()
                // carrier-grade NAT, 100.64.0.0/10
                || (a == 100 && (b & 0xc0) == 64)
                || a == 0)
        }
        IpAddr::V6(ip) => {
            let first = ip.segments()[0];
            !(ip.is_loopback()
                || ip.is_unspecified()
                || ip.is_multicast()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}
