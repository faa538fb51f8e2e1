//! # TLS Record Classifier
//!
//! Peeks at the first TLS record carried in a port-443 TCP segment and
//! reports which handshake phase it belongs to. For a Client Hello the
//! extension block is walked to pull out the Server Name Indication.
//!
//! Records that do not fit in a single frame are not reassembled: a Client
//! Hello whose declared length runs past the captured bytes is treated as
//! carrying no SNI.
//!
//! ## Wire Format Reference
//!
//! ```text
//! TLS Record:
//!   Content Type (1 byte): 20 = ChangeCipherSpec, 21 = Alert,
//!                          22 = Handshake, 23 = ApplicationData
//!   Version (2 bytes)
//!   Length (2 bytes)
//!
//! Handshake:
//!   Type (1 byte): 1 = ClientHello, 2 = ServerHello, 11 = Certificate,
//!                  16 = ClientKeyExchange, 20 = Finished
//!   Length (3 bytes)
//!
//! ClientHello body:
//!   Version (2) | Random (32) | SessionID (1 + n) | CipherSuites (2 + n)
//!   | Compression (1 + n) | Extensions (2 + n)
//!
//! Extension:
//!   Type (2) | Length (2) | Data
//!
//! server_name (type 0):
//!   ListLength (2) | NameType (1, 0 = host_name) | NameLength (2) | Name
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cursor::{ByteReader, DecodeError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// HTTPS port; only segments to or from it are inspected.
pub const HTTPS_PORT: u16 = 443;

/// Record content types.
const CHANGE_CIPHER_SPEC: u8 = 0x14;
const ALERT: u8 = 0x15;
const HANDSHAKE: u8 = 0x16;
const APPLICATION_DATA: u8 = 0x17;

/// Handshake message types.
const CLIENT_HELLO: u8 = 0x01;
const SERVER_HELLO: u8 = 0x02;
const CERTIFICATE: u8 = 0x0b;
const CLIENT_KEY_EXCHANGE: u8 = 0x10;
const FINISHED: u8 = 0x14;

/// Record header length.
const TLS_RECORD_HEADER_LEN: usize = 5;

/// Bytes needed to see the record type and the handshake type.
const MIN_PEEK_LEN: usize = TLS_RECORD_HEADER_LEN + 1;

/// Offset of the session-id length byte from the record start:
/// record header (5) + handshake header (4) + version (2) + random (32).
const SESSION_ID_OFFSET: usize = TLS_RECORD_HEADER_LEN + 4 + 2 + 32;

/// Extension type: server_name.
const EXT_SERVER_NAME: u16 = 0x0000;

/// server_name entry type: host_name.
const NAME_TYPE_HOST: u8 = 0x00;

/// Accepted record-layer versions (SSL 3.1 / TLS 1.0 through TLS 1.3).
const MIN_RECORD_VERSION: u16 = 0x0301;
const MAX_RECORD_VERSION: u16 = 0x0304;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Handshake phase of a TLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TlsPhase {
    ClientHello,
    ServerHello,
    Certificate,
    ClientKeyExchange,
    Finished,
    ChangeCipherSpec,
    Alert,
    ApplicationData,
}

impl TlsPhase {
    /// Display label used as the packet state.
    pub fn label(self) -> &'static str {
        match self {
            TlsPhase::ClientHello => "Client Hello",
            TlsPhase::ServerHello => "Server Hello",
            TlsPhase::Certificate => "Certificate",
            TlsPhase::ClientKeyExchange => "Client Key Exchange",
            TlsPhase::Finished => "Finished",
            TlsPhase::ChangeCipherSpec => "Change Cipher Spec",
            TlsPhase::Alert => "Alert",
            TlsPhase::ApplicationData => "Application Data",
        }
    }
}

impl fmt::Display for TlsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a record version to its protocol name.
pub fn version_to_string(version: u16) -> &'static str {
    match version {
        0x0300 => "SSLv3",
        0x0301 => "TLSv1.0",
        0x0302 => "TLSv1.1",
        0x0303 => "TLSv1.2",
        0x0304 => "TLSv1.3",
        _ => "unknown",
    }
}

// ---------------------------------------------------------------------------
// Record classification
// ---------------------------------------------------------------------------

/// Classify the record starting at `record`.
///
/// Returns `Ok(None)` for content types and handshake types outside the
/// recognised set, and an error if fewer than six bytes are available.
pub fn classify_record(
    frame: &ByteReader<'_>,
    record: usize,
) -> Result<Option<TlsPhase>, DecodeError> {
    frame.check(record, MIN_PEEK_LEN)?;

    let phase = match frame.u8_at(record)? {
        HANDSHAKE => match frame.u8_at(record + TLS_RECORD_HEADER_LEN)? {
            CLIENT_HELLO => Some(TlsPhase::ClientHello),
            SERVER_HELLO => Some(TlsPhase::ServerHello),
            CERTIFICATE => Some(TlsPhase::Certificate),
            CLIENT_KEY_EXCHANGE => Some(TlsPhase::ClientKeyExchange),
            FINISHED => Some(TlsPhase::Finished),
            _ => None,
        },
        CHANGE_CIPHER_SPEC => Some(TlsPhase::ChangeCipherSpec),
        ALERT => Some(TlsPhase::Alert),
        APPLICATION_DATA => Some(TlsPhase::ApplicationData),
        _ => None,
    };

    Ok(phase)
}

// ---------------------------------------------------------------------------
// SNI extraction
// ---------------------------------------------------------------------------

/// Extract the SNI host name from a Client Hello starting at `record`.
///
/// Returns `Ok(None)` when the record is not a complete Client Hello or
/// carries no server_name extension. Bounds failures inside the hello are
/// reported as errors; the classifier treats both the same way.
pub fn extract_sni(frame: &ByteReader<'_>, record: usize) -> Result<Option<String>, DecodeError> {
    if frame.u8_at(record)? != HANDSHAKE {
        return Ok(None);
    }

    // The hello spans more than this frame.
    let record_len = frame.u16_at(record + 3)? as usize;
    let record_end = record + TLS_RECORD_HEADER_LEN + record_len;
    if record_end > frame.len() {
        tracing::trace!(record_end, frame_len = frame.len(), "split Client Hello");
        return Ok(None);
    }

    let version = frame.u16_at(record + 1)?;
    if !(MIN_RECORD_VERSION..=MAX_RECORD_VERSION).contains(&version) {
        return Ok(None);
    }
    if frame.u8_at(record + TLS_RECORD_HEADER_LEN)? != CLIENT_HELLO {
        return Ok(None);
    }

    let hello = frame.sub(0, record_end)?;
    let mut cur = hello.cursor_at(record + SESSION_ID_OFFSET);
    cur.skip_u8_prefixed()?; // session id
    cur.skip_u16_prefixed()?; // cipher suites
    cur.skip_u8_prefixed()?; // compression methods

    let ext_total_len = cur.read_u16()? as usize;
    let ext_end = cur.position() + ext_total_len;

    while cur.position() + 4 <= ext_end {
        let ext_type = cur.read_u16()?;
        let ext_len = cur.read_u16()? as usize;
        let ext_data = cur.position();

        if ext_type == EXT_SERVER_NAME {
            let _list_len = cur.read_u16()?;
            if cur.read_u8()? != NAME_TYPE_HOST {
                return Ok(None);
            }
            let name_len = cur.read_u16()? as usize;
            let name = cur.read_bytes(name_len)?;
            tracing::trace!(version = version_to_string(version), "SNI found");
            return Ok(Some(String::from_utf8_lossy(name).into_owned()));
        }

        cur.seek(ext_data + ext_len);
    }

    Ok(None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
