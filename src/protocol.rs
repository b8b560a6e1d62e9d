//! Client-server communication protocol definitions.
//!
//! A request is a handful of length-prefixed byte fields plus an action
//! byte; the response is a single acknowledgment byte. Where the action byte
//! sits and which fields exist depends on the [`ProtocolVersion`], so every
//! version gets its own [`WireCodec`].

use std::io::Read;

use crate::config::ProtocolVersion;
use crate::error::{MutexError, Result};

/// Longest accepted key, in characters.
pub const MAX_KEY_CHARS: usize = 128;

/// Longest encodable field, in bytes: the length prefix is a single byte.
pub const MAX_FIELD_BYTES: usize = u8::MAX as usize;

/// Acknowledgment byte meaning success.
pub const ACK_SUCCESS: u8 = b'+';

/// Acknowledgment byte the reference server uses for failure. Any byte other
/// than [`ACK_SUCCESS`] is a failure.
pub const ACK_FAILURE: u8 = b'-';

/// Server operation requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Take the named lock.
    Lock,
    /// Release the named lock.
    Unlock,
    /// Forcibly clear the named lock.
    ResetByKey,
    /// Forcibly clear every lock held by a source address.
    ResetBySource,
}

impl Action {
    /// Human readable name.
    pub fn name(self) -> &'static str {
        match self {
            Action::Lock => "Lock",
            Action::Unlock => "Unlock",
            Action::ResetByKey => "ResetByKey",
            Action::ResetBySource => "ResetBySource",
        }
    }

    /// Whether the action carries a key.
    pub fn requires_key(self) -> bool {
        !matches!(self, Action::ResetBySource)
    }
}

/// One request to the lock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Requested operation.
    pub action: Action,
    /// Lock name; empty for [`Action::ResetBySource`].
    pub key: String,
    /// Holder tag for [`Action::Lock`], selector for [`Action::ResetBySource`].
    pub source: String,
}

impl Request {
    /// Take `key`, tagged with `source` when given.
    pub fn lock(key: impl Into<String>, source: Option<&str>) -> Self {
        Self::new(Action::Lock, key.into(), source)
    }

    /// Release `key`.
    pub fn unlock(key: impl Into<String>) -> Self {
        Self::new(Action::Unlock, key.into(), None)
    }

    /// Clear `key` whoever holds it.
    pub fn reset_by_key(key: impl Into<String>) -> Self {
        Self::new(Action::ResetByKey, key.into(), None)
    }

    /// Clear every lock tagged with `source`. `None` selects the empty tag.
    pub fn reset_by_source(source: Option<&str>) -> Self {
        Self::new(Action::ResetBySource, String::new(), source)
    }

    fn new(action: Action, key: String, source: Option<&str>) -> Self {
        Self {
            action,
            key,
            source: source.unwrap_or_default().to_string(),
        }
    }
}

/// Decoded acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The server performed the request.
    Success,
    /// Anything else, including no byte at all.
    Failure,
}

impl Ack {
    /// Decode the bytes read for an acknowledgment. Only a leading `+` is
    /// success; an empty read is a failure.
    pub fn decode(bytes: &[u8]) -> Ack {
        match bytes.first() {
            Some(&ACK_SUCCESS) => Ack::Success,
            _ => Ack::Failure,
        }
    }

    /// Byte sent on the wire.
    pub fn to_byte(self) -> u8 {
        match self {
            Ack::Success => ACK_SUCCESS,
            Ack::Failure => ACK_FAILURE,
        }
    }
}

/// Encoding and decoding of requests for one protocol version.
pub trait WireCodec: Send + Sync {
    /// Version implemented by this codec.
    fn version(&self) -> ProtocolVersion;

    /// Check that `request` can be encoded. Never touches the network.
    fn validate(&self, request: &Request) -> Result<()>;

    /// Encode a request into its wire bytes.
    fn encode(&self, request: &Request) -> Result<Vec<u8>>;

    /// Read exactly one request from `reader`.
    fn decode_request(&self, reader: &mut dyn Read) -> Result<Request>;
}

/// Codec for a protocol version.
pub fn codec_for(version: ProtocolVersion) -> &'static dyn WireCodec {
    match version {
        ProtocolVersion::Current => &CurrentCodec,
        ProtocolVersion::Legacy => &LegacyCodec,
    }
}

/// `action | keyLen | key | [srcLen | src]`, the source trailer only for
/// `Lock` and `ResetBySource`, and no key block for `ResetBySource`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentCodec;

impl CurrentCodec {
    fn code(action: Action) -> u8 {
        match action {
            Action::Lock => 1,
            Action::Unlock => 2,
            Action::ResetByKey => 3,
            Action::ResetBySource => 4,
        }
    }

    fn action(code: u8) -> Result<Action> {
        match code {
            1 => Ok(Action::Lock),
            2 => Ok(Action::Unlock),
            3 => Ok(Action::ResetByKey),
            4 => Ok(Action::ResetBySource),
            other => Err(MutexError::InvalidRequest(format!(
                "unknown action code {other}"
            ))),
        }
    }

    fn has_source(action: Action) -> bool {
        matches!(action, Action::Lock | Action::ResetBySource)
    }
}

impl WireCodec for CurrentCodec {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Current
    }

    fn validate(&self, request: &Request) -> Result<()> {
        if request.action.requires_key() {
            validate_key(&request.key)?;
        }
        if Self::has_source(request.action) {
            validate_field("source address", &request.source)?;
        }
        Ok(())
    }

    fn encode(&self, request: &Request) -> Result<Vec<u8>> {
        self.validate(request)?;
        let mut buf = vec![Self::code(request.action)];
        if request.action.requires_key() {
            put_field(&mut buf, &request.key);
        }
        if Self::has_source(request.action) {
            put_field(&mut buf, &request.source);
        }
        Ok(buf)
    }

    fn decode_request(&self, reader: &mut dyn Read) -> Result<Request> {
        let action = Self::action(read_u8(reader)?)?;
        let key = if action.requires_key() {
            read_field(reader)?
        } else {
            String::new()
        };
        let source = if Self::has_source(action) {
            read_field(reader)?
        } else {
            String::new()
        };
        Ok(Request {
            action,
            key,
            source,
        })
    }
}

/// `keyLen | key | action`. `Reset` (code 3) clears by key; there is no way
/// to clear by source and no holder tag, so a lock's source is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

impl LegacyCodec {
    fn code(action: Action) -> Result<u8> {
        match action {
            Action::Lock => Ok(1),
            Action::Unlock => Ok(2),
            Action::ResetByKey => Ok(3),
            Action::ResetBySource => Err(MutexError::Unsupported {
                action: action.name(),
                version: ProtocolVersion::Legacy.name(),
            }),
        }
    }

    fn action(code: u8) -> Result<Action> {
        match code {
            1 => Ok(Action::Lock),
            2 => Ok(Action::Unlock),
            3 => Ok(Action::ResetByKey),
            other => Err(MutexError::InvalidRequest(format!(
                "unknown action code {other}"
            ))),
        }
    }
}

impl WireCodec for LegacyCodec {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Legacy
    }

    fn validate(&self, request: &Request) -> Result<()> {
        Self::code(request.action)?;
        validate_key(&request.key)
    }

    fn encode(&self, request: &Request) -> Result<Vec<u8>> {
        self.validate(request)?;
        if !request.source.is_empty() {
            log::debug!(
                "legacy protocol has no source address, dropping {:?}",
                request.source
            );
        }
        let mut buf = Vec::with_capacity(request.key.len() + 2);
        put_field(&mut buf, &request.key);
        buf.push(Self::code(request.action)?);
        Ok(buf)
    }

    fn decode_request(&self, reader: &mut dyn Read) -> Result<Request> {
        let key = read_field(reader)?;
        let action = Self::action(read_u8(reader)?)?;
        Ok(Request {
            action,
            key,
            source: String::new(),
        })
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MutexError::InvalidRequest("key is empty".to_string()));
    }
    let chars = key.chars().count();
    if chars > MAX_KEY_CHARS {
        return Err(MutexError::InvalidRequest(format!(
            "key has {chars} characters, at most {MAX_KEY_CHARS} allowed"
        )));
    }
    validate_field("key", key)
}

fn validate_field(name: &str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_BYTES {
        return Err(MutexError::InvalidRequest(format!(
            "{name} is {} bytes, at most {MAX_FIELD_BYTES} fit the length prefix",
            value.len()
        )));
    }
    Ok(())
}

// Callers validate first, so the length always fits.
fn put_field(buf: &mut Vec<u8>, value: &str) {
    buf.push(value.len() as u8);
    buf.extend_from_slice(value.as_bytes());
}

fn read_u8(reader: &mut dyn Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_field(reader: &mut dyn Read) -> Result<String> {
    let len = read_u8(reader)? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| MutexError::InvalidRequest(format!("field is not utf-8: {e}")))
}
