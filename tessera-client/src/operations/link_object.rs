use crate::operations::{WriteObjectOperation, WriteObjectOperationRequest};
use std::collections::BTreeMap;
use tessera_core::{Metadata, Reader, Result, TesseraError};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct LinkObjectOperation {
    writer: WriteObjectOperation,
    metastore: MetaStore,
}

#[derive(Debug, Clone, Default)]
pub struct LinkObjectOperationRequest {
    pub key: Vec<u8>,
    pub previous_key: Vec<u8>,
    pub user_defined: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LinkObjectOperationResult {
    pub metadata: Metadata,
    pub previous: Metadata,
}

impl LinkObjectOperation {
    pub fn new(writer: WriteObjectOperation, metastore: MetaStore) -> Self {
        Self { writer, metastore }
    }

    /// Writes the object as the successor of `previous_key`.
    ///
    /// The previous record must exist. Its `next_key` is set through a
    /// compare-and-set update once the new record is stored; if that update
    /// fails the new object stays written but unlinked.
    pub async fn run(
        &self,
        request: LinkObjectOperationRequest,
        reader: &mut Reader<'_>,
        cancel: &CancellationToken,
    ) -> Result<LinkObjectOperationResult> {
        let LinkObjectOperationRequest {
            key,
            previous_key,
            user_defined,
        } = request;

        if key.is_empty() || previous_key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        if key == previous_key {
            return Err(TesseraError::InvalidRequest(
                "an object cannot be linked to itself".to_string(),
            ));
        }

        // fail before writing any data when there is nothing to link to
        self.metastore.get_metadata(&previous_key).await?;

        let metadata = self
            .writer
            .run(
                WriteObjectOperationRequest {
                    key: key.clone(),
                    previous_key: Some(previous_key.clone()),
                    user_defined,
                },
                reader,
                cancel,
            )
            .await?;

        let previous = self
            .metastore
            .update_metadata(&previous_key, |mut previous| {
                previous.next_key = Some(key.clone());
                Ok(previous)
            })
            .await
            .inspect_err(|err| {
                tracing::error!(
                    "failed to link object to its predecessor. key={} previous={} error={}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&previous_key),
                    err
                );
            })?;

        Ok(LinkObjectOperationResult { metadata, previous })
    }
}
