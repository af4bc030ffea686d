//! TLS ClientHello preread.
//!
//! Looks at the first records of a TCP stream and extracts the protocol
//! version, SNI host name and ALPN list without terminating TLS. The
//! caller feeds the whole buffered prefix of the stream on every call;
//! records already consumed are remembered and not parsed twice.

use tracing::debug;

use crate::error::{WireError, WireResult};
use crate::serialize::Reader;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;

const EXT_SERVER_NAME: u16 = 0;
const EXT_ALPN: u16 = 16;
const EXT_SUPPORTED_VERSIONS: u16 = 43;

/// Protocol version as reported by `SSL_get_version()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    /// SSL 2.0 compatible hello.
    Ssl2,
    /// SSL 3.0.
    Ssl3,
    /// TLS 1.0.
    Tls10,
    /// TLS 1.1.
    Tls11,
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3 (announced through supported_versions).
    Tls13,
    /// Anything else, raw major/minor.
    Unknown(u8, u8),
}

impl TlsVersion {
    /// Maps the two version bytes of a hello.
    pub fn from_bytes(major: u8, minor: u8) -> Self {
        match (major, minor) {
            (0, 2) => TlsVersion::Ssl2,
            (3, 0) => TlsVersion::Ssl3,
            (3, 1) => TlsVersion::Tls10,
            (3, 2) => TlsVersion::Tls11,
            (3, 3) => TlsVersion::Tls12,
            (3, 4) => TlsVersion::Tls13,
            (major, minor) => TlsVersion::Unknown(major, minor),
        }
    }

    /// `SSL_get_version()` style name, empty for unknown versions.
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Ssl2 => "SSLv2",
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
            TlsVersion::Unknown(..) => "",
        }
    }
}

/// Fields extracted from a ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// Negotiation version offered by the client.
    pub version: TlsVersion,
    /// SNI host name, if sent.
    pub server_name: Option<String>,
    /// ALPN protocols joined with `,`, if sent.
    pub alpn: Option<String>,
}

/// Outcome of a preread step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrereadStatus {
    /// More bytes are needed.
    Again,
    /// The stream is not a TLS ClientHello; stop prereading.
    Declined,
    /// The ClientHello has been parsed.
    Done(ClientHelloInfo),
}

/// Incremental preread state for one stream.
#[derive(Debug, Default)]
pub struct Preread {
    consumed: usize,
    handshake: Vec<u8>,
}

impl Preread {
    /// Creates an empty preread context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the stream already consumed as complete records.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Parses whatever complete records `stream` holds beyond the ones
    /// already seen. `stream` must start at the first byte of the
    /// connection.
    pub fn feed(&mut self, stream: &[u8]) -> WireResult<PrereadStatus> {
        let mut p = stream.get(self.consumed..).unwrap_or_default();

        while p.len() >= RECORD_HEADER_LEN {
            if self.handshake.is_empty()
                && p[0] & 0x80 != 0
                && p[2] == 1
                && (p[3] == 0 || p[3] == 3)
            {
                debug!("ssl preread: version 2 ClientHello");
                return Ok(PrereadStatus::Done(ClientHelloInfo {
                    version: TlsVersion::from_bytes(p[3], p[4]),
                    server_name: None,
                    alpn: None,
                }));
            }

            if p[0] != CONTENT_TYPE_HANDSHAKE {
                debug!("ssl preread: not a handshake");
                return Ok(PrereadStatus::Declined);
            }

            if p[1] != 3 {
                debug!("ssl preread: unsupported SSL version");
                return Ok(PrereadStatus::Declined);
            }

            let len = u16::from_be_bytes([p[3], p[4]]) as usize;

            // read the whole record before parsing
            if p.len() < RECORD_HEADER_LEN + len {
                break;
            }

            self.handshake
                .extend_from_slice(&p[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len]);
            self.consumed += RECORD_HEADER_LEN + len;
            p = &p[RECORD_HEADER_LEN + len..];

            match parse_handshake(&self.handshake)? {
                PrereadStatus::Again => continue,
                done => return Ok(done),
            }
        }

        Ok(PrereadStatus::Again)
    }
}

fn parse_handshake(buf: &[u8]) -> WireResult<PrereadStatus> {
    let mut r = Reader::new(buf);

    if r.left() < 4 {
        return Ok(PrereadStatus::Again);
    }

    if r.read_u8()? != HANDSHAKE_CLIENT_HELLO {
        debug!("ssl preread: not a client hello");
        return Ok(PrereadStatus::Declined);
    }

    let len = r.read_u24()? as usize;
    if r.left() < len {
        return Ok(PrereadStatus::Again);
    }

    match parse_client_hello(r.read_data(len)?) {
        Ok(info) => Ok(PrereadStatus::Done(info)),
        Err(WireError::Overrun { .. }) => {
            debug!("ssl preread: failed to parse handshake");
            Ok(PrereadStatus::Declined)
        }
        Err(e) => Err(e),
    }
}

fn parse_client_hello(body: &[u8]) -> WireResult<ClientHelloInfo> {
    let mut r = Reader::new(body);

    let legacy = r.read_data(2)?;
    let mut info = ClientHelloInfo {
        version: TlsVersion::from_bytes(legacy[0], legacy[1]),
        server_name: None,
        alpn: None,
    };

    r.skip(32)?; // random
    r.read_u8_string()?; // session_id
    r.read_u16_string()?; // cipher_suites
    r.read_u8_string()?; // compression_methods

    if r.is_empty() {
        // no extensions
        return Ok(info);
    }

    let mut exts = Reader::new(r.read_u16_string()?);

    while !exts.is_empty() {
        let ext_type = exts.read_u16()?;
        let data = exts.read_u16_string()?;

        match ext_type {
            EXT_SERVER_NAME if info.server_name.is_none() => {
                info.server_name = Some(parse_server_name(data)?);
            }
            EXT_ALPN if info.alpn.is_none() => {
                info.alpn = Some(parse_alpn(data)?);
            }
            EXT_SUPPORTED_VERSIONS => {
                debug!("ssl preread: supported_versions");
                info.version = TlsVersion::Tls13;
            }
            _ => {}
        }
    }

    Ok(info)
}

fn malformed(reason: &'static str) -> WireError {
    debug!(reason, "ssl preread: malformed extension");
    WireError::Malformed { reason }
}

fn parse_server_name(data: &[u8]) -> WireResult<String> {
    let mut r = Reader::new(data);

    let list_len = r.read_u16().map_err(|_| malformed("SNI format error"))? as usize;
    let name_type = r.read_u8().map_err(|_| malformed("SNI format error"))?;
    if name_type != 0 {
        return Err(malformed("SNI hostname type is not DNS"));
    }

    let host = r
        .read_u16_string()
        .map_err(|_| malformed("SNI format error"))?;

    if list_len < 3 + host.len() {
        return Err(malformed("SNI format error"));
    }

    let host = String::from_utf8_lossy(host).into_owned();
    debug!(host = %host, "ssl preread: SNI hostname");
    Ok(host)
}

fn parse_alpn(data: &[u8]) -> WireResult<String> {
    let mut r = Reader::new(data);

    let mut list = Reader::new(
        r.read_u16_string()
            .map_err(|_| malformed("ALPN format error"))?,
    );

    let mut protocols: Vec<String> = Vec::new();
    while !list.is_empty() {
        let name = list
            .read_u8_string()
            .map_err(|_| malformed("ALPN format error"))?;
        if name.is_empty() {
            return Err(malformed("ALPN empty protocol"));
        }
        protocols.push(String::from_utf8_lossy(name).into_owned());
    }

    let alpn = protocols.join(",");
    debug!(alpn = %alpn, "ssl preread: ALPN protocols");
    Ok(alpn)
}
