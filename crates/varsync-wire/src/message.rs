//! Message envelope and typed bus messages
//!
//! Every payload is `[version:1][kind:1][body]`. A receiver decoding the
//! wrong kind gets `UnexpectedMessage` rather than garbage.

use bytes::{BufMut, Bytes, BytesMut};

use varsync_core::{ProviderId, VariableId, VarsyncError, VarsyncResult};

use crate::{put_count, put_short_string, DefinitionSet, VariableBatch, WireReader};

/// Current wire format version
pub const WIRE_VERSION: u8 = 1;

/// Envelope size in bytes
pub const ENVELOPE_SIZE: usize = 2;

/// Message kind identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    DefinitionChanged = 0x01,
    ReadDefinitionQuery = 0x02,
    ReadDefinitionResponse = 0x03,
    ReadProvidersQuery = 0x04,
    ReadProvidersResponse = 0x05,
    ProvidersChanged = 0x06,
    ReadVariablesQuery = 0x07,
    ReadVariablesResponse = 0x08,
    VariablesChanged = 0x09,
    WriteVariables = 0x0A,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageKind::DefinitionChanged),
            0x02 => Some(MessageKind::ReadDefinitionQuery),
            0x03 => Some(MessageKind::ReadDefinitionResponse),
            0x04 => Some(MessageKind::ReadProvidersQuery),
            0x05 => Some(MessageKind::ReadProvidersResponse),
            0x06 => Some(MessageKind::ProvidersChanged),
            0x07 => Some(MessageKind::ReadVariablesQuery),
            0x08 => Some(MessageKind::ReadVariablesResponse),
            0x09 => Some(MessageKind::VariablesChanged),
            0x0A => Some(MessageKind::WriteVariables),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Read the kind of an encoded message without decoding the body
pub fn peek_kind(buf: &[u8]) -> VarsyncResult<MessageKind> {
    let mut r = WireReader::new(buf);
    let version = r.u8()?;
    if version != WIRE_VERSION {
        return Err(VarsyncError::InvalidWireFormat(format!(
            "Unsupported wire version {}",
            version
        )));
    }
    let kind = r.u8()?;
    MessageKind::from_byte(kind)
        .ok_or_else(|| VarsyncError::InvalidWireFormat(format!("Unknown message kind {}", kind)))
}

/// A typed payload with a fixed envelope kind
pub trait WireMessage: Sized {
    const KIND: MessageKind;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()>;

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self>;

    fn to_bytes(&self) -> VarsyncResult<Bytes> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(Self::KIND.to_byte());
        self.encode_body(&mut buf)?;
        Ok(buf.freeze())
    }

    fn from_bytes(buf: &[u8]) -> VarsyncResult<Self> {
        let kind = peek_kind(buf)?;
        if kind != Self::KIND {
            return Err(VarsyncError::UnexpectedMessage {
                expected: Self::KIND.to_byte(),
                actual: kind.to_byte(),
            });
        }
        Self::decode_body(&mut WireReader::new(&buf[ENVELOPE_SIZE..]))
    }
}

fn put_optional_definition(buf: &mut BytesMut, def: &Option<DefinitionSet>) -> VarsyncResult<()> {
    match def {
        Some(set) => {
            buf.put_u8(1);
            set.encode_into(buf)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

fn read_optional_definition(r: &mut WireReader<'_>) -> VarsyncResult<Option<DefinitionSet>> {
    match r.u8()? {
        0 => Ok(None),
        _ => Ok(Some(DefinitionSet::decode_from(r)?)),
    }
}

fn put_providers(buf: &mut BytesMut, providers: &[ProviderId]) -> VarsyncResult<()> {
    put_count(buf, providers.len())?;
    for p in providers {
        put_short_string(buf, p.as_str())?;
    }
    Ok(())
}

fn read_providers(r: &mut WireReader<'_>) -> VarsyncResult<Vec<ProviderId>> {
    let count = r.count(2)?;
    let mut providers = Vec::with_capacity(count);
    for _ in 0..count {
        providers.push(ProviderId::new(r.short_string()?));
    }
    Ok(providers)
}

/// Definition announcement (provider → registry) and validation
/// notification (registry → provider). No definition means the provider
/// was removed from the registry.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DefinitionChangedEvent {
    pub definition: Option<DefinitionSet>,
}

impl WireMessage for DefinitionChangedEvent {
    const KIND: MessageKind = MessageKind::DefinitionChanged;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        put_optional_definition(buf, &self.definition)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(DefinitionChangedEvent {
            definition: read_optional_definition(r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadDefinitionQuery;

impl WireMessage for ReadDefinitionQuery {
    const KIND: MessageKind = MessageKind::ReadDefinitionQuery;

    fn encode_body(&self, _buf: &mut BytesMut) -> VarsyncResult<()> {
        Ok(())
    }

    fn decode_body(_r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ReadDefinitionQuery)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadDefinitionResponse {
    pub definition: Option<DefinitionSet>,
}

impl WireMessage for ReadDefinitionResponse {
    const KIND: MessageKind = MessageKind::ReadDefinitionResponse;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        put_optional_definition(buf, &self.definition)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ReadDefinitionResponse {
            definition: read_optional_definition(r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadProvidersQuery;

impl WireMessage for ReadProvidersQuery {
    const KIND: MessageKind = MessageKind::ReadProvidersQuery;

    fn encode_body(&self, _buf: &mut BytesMut) -> VarsyncResult<()> {
        Ok(())
    }

    fn decode_body(_r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ReadProvidersQuery)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadProvidersResponse {
    pub providers: Vec<ProviderId>,
}

impl WireMessage for ReadProvidersResponse {
    const KIND: MessageKind = MessageKind::ReadProvidersResponse;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        put_providers(buf, &self.providers)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ReadProvidersResponse {
            providers: read_providers(r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ProvidersChangedEvent {
    pub providers: Vec<ProviderId>,
}

impl WireMessage for ProvidersChangedEvent {
    const KIND: MessageKind = MessageKind::ProvidersChanged;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        put_providers(buf, &self.providers)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ProvidersChangedEvent {
            providers: read_providers(r)?,
        })
    }
}

/// Snapshot request. `None` asks for every variable.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadVariablesQuery {
    pub ids: Option<Vec<VariableId>>,
}

impl ReadVariablesQuery {
    pub fn all() -> Self {
        ReadVariablesQuery { ids: None }
    }

    pub fn only(ids: impl IntoIterator<Item = VariableId>) -> Self {
        ReadVariablesQuery {
            ids: Some(ids.into_iter().collect()),
        }
    }
}

impl WireMessage for ReadVariablesQuery {
    const KIND: MessageKind = MessageKind::ReadVariablesQuery;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        match &self.ids {
            Some(ids) => {
                buf.put_u8(1);
                put_count(buf, ids.len())?;
                for id in ids {
                    buf.put_u32_le(id.0);
                }
            }
            None => buf.put_u8(0),
        }
        Ok(())
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        let ids = match r.u8()? {
            0 => None,
            _ => {
                let count = r.count(4)?;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(VariableId(r.u32()?));
                }
                Some(ids)
            }
        };
        Ok(ReadVariablesQuery { ids })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReadVariablesResponse {
    pub variables: VariableBatch,
}

impl WireMessage for ReadVariablesResponse {
    const KIND: MessageKind = MessageKind::ReadVariablesResponse;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        self.variables.encode_into(buf)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(ReadVariablesResponse {
            variables: VariableBatch::decode_from(r)?,
        })
    }
}

/// Periodic broadcast; always the full state despite the name
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct VariablesChangedEvent {
    pub changed: VariableBatch,
}

impl WireMessage for VariablesChangedEvent {
    const KIND: MessageKind = MessageKind::VariablesChanged;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        self.changed.encode_into(buf)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(VariablesChangedEvent {
            changed: VariableBatch::decode_from(r)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct WriteVariablesCommand {
    pub variables: VariableBatch,
}

impl WireMessage for WriteVariablesCommand {
    const KIND: MessageKind = MessageKind::WriteVariables;

    fn encode_body(&self, buf: &mut BytesMut) -> VarsyncResult<()> {
        self.variables.encode_into(buf)
    }

    fn decode_body(r: &mut WireReader<'_>) -> VarsyncResult<Self> {
        Ok(WriteVariablesCommand {
            variables: VariableBatch::decode_from(r)?,
        })
    }
}
