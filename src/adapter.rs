//! Payload adapters.
//!
//! An adapter turns one native payload type into bytes and back, tagging the
//! bytes with a schema name so a reader can refuse buffers meant for another
//! type. [`PayloadCodecs`] keeps the adapters a bus knows about.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::payload::{ErasedPayload, TypeKey};

/// Codec between one native payload type and an external buffer.
pub trait PayloadAdapter: Send + Sync + 'static {
    /// Native type this adapter handles.
    fn type_key(&self) -> TypeKey;

    /// Serialize `payload` under `schema`.
    ///
    /// Fails with [`Error::PayloadTypeMismatch`] if `payload` is not of
    /// [`type_key`](Self::type_key).
    fn encode(&self, payload: &ErasedPayload, schema: &str) -> Result<Vec<u8>>;

    /// Parse `bytes`, checking that they were written under `expected_schema`.
    fn decode(&self, bytes: &[u8], expected_schema: &str) -> Result<ErasedPayload>;
}

fn check_schema(expected: &str, found: &str) -> Result<()> {
    if expected != found {
        return Err(Error::SchemaMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// JSON
// ----------------------------------------------------------------------------

/// JSON envelope: `{"schema": "<name>", "payload": <value>}`.
pub struct JsonAdapter<T>(PhantomData<fn() -> T>);

impl<T> JsonAdapter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    schema: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn<T> {
    schema: String,
    payload: T,
}

#[derive(Deserialize)]
struct SchemaOnly {
    schema: String,
}

impl<T> PayloadAdapter for JsonAdapter<T>
where
    T: Serialize + DeserializeOwned + Any + Send + Sync,
{
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    fn encode(&self, payload: &ErasedPayload, schema: &str) -> Result<Vec<u8>> {
        let value = payload.expect_type::<T>()?;
        serde_json::to_vec(&EnvelopeOut {
            schema,
            payload: value,
        })
        .map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8], expected_schema: &str) -> Result<ErasedPayload> {
        // Read the schema first so a foreign payload reports a mismatch, not a parse error.
        let head: SchemaOnly =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedBuffer(e.to_string()))?;
        check_schema(expected_schema, &head.schema)?;

        let envelope: EnvelopeIn<T> =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedBuffer(e.to_string()))?;
        Ok(ErasedPayload::new(envelope.payload))
    }
}

// ----------------------------------------------------------------------------
// Packed binary frames
// ----------------------------------------------------------------------------

const FRAME_MAGIC: [u8; 4] = *b"TBUS";
const FRAME_VERSION: u8 = 1;

/// Fixed frame header. All integers little-endian.
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub flags: u8,
    pub schema_len: U16,
    pub body_len: U32,
}

/// Size of [`FrameHeader`] on the wire.
pub const FRAME_HEADER_LEN: usize = size_of::<FrameHeader>();

/// Binary frame: [`FrameHeader`], schema bytes, MessagePack body.
pub struct PackedAdapter<T>(PhantomData<fn() -> T>);

impl<T> PackedAdapter<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for PackedAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PayloadAdapter for PackedAdapter<T>
where
    T: Serialize + DeserializeOwned + Any + Send + Sync,
{
    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    fn encode(&self, payload: &ErasedPayload, schema: &str) -> Result<Vec<u8>> {
        let value = payload.expect_type::<T>()?;
        let body = rmp_serde::to_vec_named(value).map_err(|e| Error::Encode(e.to_string()))?;

        let schema_len = u16::try_from(schema.len())
            .map_err(|_| Error::Encode(format!("schema name of {} bytes is too long", schema.len())))?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| Error::Encode(format!("body of {} bytes is too large", body.len())))?;

        let header = FrameHeader {
            magic: FRAME_MAGIC,
            version: FRAME_VERSION,
            flags: 0,
            schema_len: U16::new(schema_len),
            body_len: U32::new(body_len),
        };

        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + schema.len() + body.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(schema.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8], expected_schema: &str) -> Result<ErasedPayload> {
        let (header, rest) = FrameHeader::ref_from_prefix(bytes).map_err(|_| {
            Error::MalformedBuffer(format!(
                "frame of {} bytes is shorter than its {}-byte header",
                bytes.len(),
                FRAME_HEADER_LEN
            ))
        })?;

        if header.magic != FRAME_MAGIC {
            return Err(Error::MalformedBuffer("bad frame magic".into()));
        }
        if header.version != FRAME_VERSION {
            return Err(Error::MalformedBuffer(format!(
                "unsupported frame version {}",
                header.version
            )));
        }

        let schema_len = usize::from(header.schema_len.get());
        let body_len = header.body_len.get() as usize;
        if rest.len() != schema_len + body_len {
            return Err(Error::MalformedBuffer(format!(
                "frame declares {} payload bytes, found {}",
                schema_len + body_len,
                rest.len()
            )));
        }

        let (schema, body) = rest.split_at(schema_len);
        let schema = std::str::from_utf8(schema)
            .map_err(|e| Error::MalformedBuffer(format!("schema name: {e}")))?;
        check_schema(expected_schema, schema)?;

        let value: T =
            rmp_serde::from_slice(body).map_err(|e| Error::MalformedBuffer(e.to_string()))?;
        Ok(ErasedPayload::new(value))
    }
}

// ----------------------------------------------------------------------------
// Codec registry
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Codecs {
    by_schema: HashMap<Arc<str>, Arc<dyn PayloadAdapter>>,
    /// Schemas per native type in registration order; the first is the default.
    schemas_of: HashMap<TypeKey, Vec<Arc<str>>>,
}

/// Schema name → adapter, and native type → schema name.
///
/// A type registered under several schemas encodes with the first one.
#[derive(Default)]
pub struct PayloadCodecs {
    inner: RwLock<Codecs>,
}

impl PayloadCodecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `schema`, replacing any adapter already there.
    ///
    /// A replaced adapter's type stops encoding with `schema` and falls back
    /// to its next registered schema, if any.
    pub fn register(&self, schema: &str, adapter: impl PayloadAdapter) {
        let key = adapter.type_key();
        let schema: Arc<str> = Arc::from(schema);
        let mut inner = self.inner.write();

        if let Some(old) = inner.by_schema.insert(schema.clone(), Arc::new(adapter)) {
            let old_key = old.type_key();
            if old_key != key {
                debug!(schema = %schema, replaced = ?old_key, "payload codec replaced");
                if let Some(list) = inner.schemas_of.get_mut(&old_key) {
                    list.retain(|s| *s != schema);
                    if list.is_empty() {
                        inner.schemas_of.remove(&old_key);
                    }
                }
            }
        }

        let list = inner.schemas_of.entry(key).or_default();
        if !list.contains(&schema) {
            list.push(schema.clone());
        }
        debug!(schema = %schema, payload = ?key, "registered payload codec");
    }

    pub fn register_json<T>(&self, schema: &str)
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register(schema, JsonAdapter::<T>::new());
    }

    pub fn register_packed<T>(&self, schema: &str)
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        self.register(schema, PackedAdapter::<T>::new());
    }

    /// Schema used to encode payloads of `key`.
    pub fn schema_for(&self, key: TypeKey) -> Option<Arc<str>> {
        self.inner
            .read()
            .schemas_of
            .get(&key)
            .and_then(|list| list.first().cloned())
    }

    pub fn contains(&self, schema: &str) -> bool {
        self.inner.read().by_schema.contains_key(schema)
    }

    fn adapter(&self, schema: &str) -> Result<Arc<dyn PayloadAdapter>> {
        self.inner
            .read()
            .by_schema
            .get(schema)
            .cloned()
            .ok_or_else(|| Error::UnknownSchema(schema.to_string()))
    }

    /// Decode `bytes` with the adapter registered for `schema`.
    pub fn decode(&self, schema: &str, bytes: &[u8]) -> Result<ErasedPayload> {
        self.adapter(schema)?.decode(bytes, schema)
    }

    /// Encode `payload` with its type's default schema.
    pub fn encode(&self, payload: &ErasedPayload) -> Result<(Arc<str>, Vec<u8>)> {
        let key = payload.type_key();
        let schema = self
            .schema_for(key)
            .ok_or_else(|| Error::UnknownSchema(key.name().to_string()))?;
        let bytes = self.encode_as(&schema, payload)?;
        Ok((schema, bytes))
    }

    /// Encode `payload` under an explicit `schema`.
    pub fn encode_as(&self, schema: &str, payload: &ErasedPayload) -> Result<Vec<u8>> {
        self.adapter(schema)?.encode(payload, schema)
    }
}

impl fmt::Debug for PayloadCodecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut schemas: Vec<&str> = inner.by_schema.keys().map(|s| &**s).collect();
        schemas.sort_unstable();
        f.debug_struct("PayloadCodecs").field("schemas", &schemas).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Damage {
        amount: u32,
        source: String,
        critical: bool,
    }

    fn sample() -> Damage {
        Damage {
            amount: 42,
            source: "fireball".into(),
            critical: true,
        }
    }

    #[test]
    fn frame_header_is_twelve_bytes() {
        assert_eq!(FRAME_HEADER_LEN, 12);
    }

    #[test]
    fn json_round_trip() {
        let adapter = JsonAdapter::<Damage>::new();
        let bytes = adapter
            .encode(&ErasedPayload::new(sample()), "combat.damage")
            .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["schema"], "combat.damage");
        assert_eq!(json["payload"]["amount"], 42);

        let decoded = adapter.decode(&bytes, "combat.damage").unwrap();
        assert_eq!(decoded.downcast_ref::<Damage>(), Some(&sample()));
    }

    #[test]
    fn json_schema_mismatch() {
        let adapter = JsonAdapter::<Damage>::new();
        let bytes = br#"{"schema":"movement.jump","payload":{"height":3}}"#;

        let err = adapter.decode(bytes, "combat.damage").unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaMismatch { ref expected, ref found }
                if expected == "combat.damage" && found == "movement.jump"
        ));
    }

    #[test]
    fn json_malformed() {
        let adapter = JsonAdapter::<Damage>::new();
        assert!(matches!(
            adapter.decode(b"{\"schema\":", "combat.damage"),
            Err(Error::MalformedBuffer(_))
        ));
        assert!(matches!(
            adapter.decode(br#"{"schema":"combat.damage","payload":{"amount":"x"}}"#, "combat.damage"),
            Err(Error::MalformedBuffer(_))
        ));
    }

    #[test]
    fn packed_round_trip() {
        let adapter = PackedAdapter::<Damage>::new();
        let bytes = adapter
            .encode(&ErasedPayload::new(sample()), "combat.damage")
            .unwrap();

        assert_eq!(&bytes[..4], b"TBUS");
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 13], b"combat.damage");

        let decoded = adapter.decode(&bytes, "combat.damage").unwrap();
        assert_eq!(decoded.downcast_ref::<Damage>(), Some(&sample()));
    }

    #[test]
    fn packed_schema_mismatch() {
        let adapter = PackedAdapter::<Damage>::new();
        let bytes = adapter
            .encode(&ErasedPayload::new(sample()), "combat.damage.v2")
            .unwrap();

        assert!(matches!(
            adapter.decode(&bytes, "combat.damage"),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn packed_truncated() {
        let adapter = PackedAdapter::<Damage>::new();
        let bytes = adapter
            .encode(&ErasedPayload::new(sample()), "combat.damage")
            .unwrap();

        for len in [0, 5, FRAME_HEADER_LEN, bytes.len() - 1] {
            assert!(
                matches!(
                    adapter.decode(&bytes[..len], "combat.damage"),
                    Err(Error::MalformedBuffer(_))
                ),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn packed_bad_magic() {
        let adapter = PackedAdapter::<Damage>::new();
        let mut bytes = adapter
            .encode(&ErasedPayload::new(sample()), "combat.damage")
            .unwrap();
        bytes[0] = b'X';

        assert!(matches!(
            adapter.decode(&bytes, "combat.damage"),
            Err(Error::MalformedBuffer(_))
        ));
    }

    #[test]
    fn encode_rejects_wrong_native_type() {
        let adapter = JsonAdapter::<Damage>::new();
        assert!(matches!(
            adapter.encode(&ErasedPayload::new(7u32), "combat.damage"),
            Err(Error::PayloadTypeMismatch { found: "u32", .. })
        ));
    }

    #[test]
    fn codecs_route_by_schema() {
        let codecs = PayloadCodecs::new();
        codecs.register_json::<Damage>("combat.damage.json");
        codecs.register_packed::<Damage>("combat.damage.bin");

        assert_eq!(
            codecs.schema_for(TypeKey::of::<Damage>()).as_deref(),
            Some("combat.damage.json")
        );

        let (schema, bytes) = codecs.encode(&ErasedPayload::new(sample())).unwrap();
        assert_eq!(&*schema, "combat.damage.json");
        let decoded = codecs.decode(&schema, &bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<Damage>(), Some(&sample()));

        let packed = codecs
            .encode_as("combat.damage.bin", &ErasedPayload::new(sample()))
            .unwrap();
        let decoded = codecs.decode("combat.damage.bin", &packed).unwrap();
        assert_eq!(decoded.downcast_ref::<Damage>(), Some(&sample()));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Heal {
        amount: u32,
    }

    #[test]
    fn replacing_a_schema_moves_the_old_type_off_it() {
        let codecs = PayloadCodecs::new();
        codecs.register_json::<Damage>("shared");
        codecs.register_packed::<Damage>("combat.damage.bin");
        codecs.register_json::<Heal>("shared");

        let (schema, _) = codecs.encode(&ErasedPayload::new(sample())).unwrap();
        assert_eq!(&*schema, "combat.damage.bin");

        let (schema, bytes) = codecs.encode(&ErasedPayload::new(Heal { amount: 5 })).unwrap();
        assert_eq!(&*schema, "shared");
        let decoded = codecs.decode("shared", &bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<Heal>(), Some(&Heal { amount: 5 }));
    }

    #[test]
    fn replaced_schema_was_the_only_one() {
        let codecs = PayloadCodecs::new();
        codecs.register_json::<Damage>("shared");
        codecs.register_json::<Heal>("shared");

        assert_eq!(codecs.schema_for(TypeKey::of::<Damage>()), None);
        assert!(matches!(
            codecs.encode(&ErasedPayload::new(sample())),
            Err(Error::UnknownSchema(_))
        ));

        codecs.register_json::<Heal>("shared");
        assert_eq!(
            codecs.schema_for(TypeKey::of::<Heal>()).as_deref(),
            Some("shared")
        );
    }

    #[test]
    fn codecs_unknown_schema() {
        let codecs = PayloadCodecs::new();
        assert!(matches!(
            codecs.decode("nope", b"{}"),
            Err(Error::UnknownSchema(s)) if s == "nope"
        ));
        assert!(matches!(
            codecs.encode(&ErasedPayload::new(1u8)),
            Err(Error::UnknownSchema(_))
        ));
    }
}
