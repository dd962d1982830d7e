use super::MetadataCodec;
use tessera_core::{Metadata, Result, TesseraError};

/// Human readable records, handy when inspecting the metadata store.
pub struct JsonCodec;

impl MetadataCodec for JsonCodec {
    fn tag(&self) -> &'static str {
        "json"
    }

    fn encode(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        serde_json::to_vec(metadata).map_err(|err| TesseraError::Encoding(err.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Metadata> {
        serde_json::from_slice(data).map_err(|err| TesseraError::Encoding(err.to_string()))
    }
}
