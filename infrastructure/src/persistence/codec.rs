// ./infrastructure/src/persistence/codec.rs
use application::{CodecError, SchemaCodec};
use domain::SchemaSet;

/// Stores the mapping as one pretty-printed JSON object: `{ "<name>": <document>, ... }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaCodec;

impl SchemaCodec for JsonSchemaCodec {
    fn decode(&self, bytes: &[u8]) -> Result<SchemaSet, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode(&self, schemas: &SchemaSet) -> Result<Vec<u8>, CodecError> {
        let mut bytes = serde_json::to_vec_pretty(schemas)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
