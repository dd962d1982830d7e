use super::Distributor;
use crate::{Result, TesseraError};
use reed_solomon_erasure::galois_8::ReedSolomon;

const PAD_FACTOR: usize = 256;

/// Reed-Solomon over GF(2^8).
///
/// Input is zero padded to a multiple of `data_shards * 256` and split into
/// `data_shards` equal slices followed by `parity_shards` parity slices.
/// The pad length is not stored; decode truncates to the declared size.
pub struct ReedSolomonDistributor {
    codec: ReedSolomon,
    data_shards: usize,
    parity_shards: usize,
}

impl ReedSolomonDistributor {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self> {
        if data_shards == 0 || parity_shards == 0 {
            return Err(TesseraError::Config(format!(
                "erasure coding requires at least one data and one parity shard, got {}+{}",
                data_shards, parity_shards
            )));
        }
        let codec = ReedSolomon::new(data_shards, parity_shards)
            .map_err(|e| TesseraError::Config(format!("invalid erasure coding: {:?}", e)))?;
        Ok(Self {
            codec,
            data_shards,
            parity_shards,
        })
    }

    fn padded_len(&self, len: usize) -> usize {
        let block = self.data_shards * PAD_FACTOR;
        match len % block {
            0 => len,
            rem => len + (block - rem),
        }
    }
}

impl Distributor for ReedSolomonDistributor {
    fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(TesseraError::InvalidRequest(
                "no data given to encode".to_string(),
            ));
        }

        let padded_len = self.padded_len(data.len());
        let part_len = padded_len / self.data_shards;

        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(self.data_shards + self.parity_shards);
        for index in 0..self.data_shards {
            let start = (index * part_len).min(data.len());
            let end = ((index + 1) * part_len).min(data.len());
            let mut part = Vec::with_capacity(part_len);
            part.extend_from_slice(&data[start..end]);
            part.resize(part_len, 0);
            parts.push(part);
        }
        parts.extend((0..self.parity_shards).map(|_| vec![0u8; part_len]));

        self.codec
            .encode(&mut parts)
            .map_err(|e| TesseraError::internal("ERASURE", format!("{:?}", e)))?;
        Ok(parts)
    }

    fn decode(&self, mut parts: Vec<Option<Vec<u8>>>, size: usize) -> Result<Vec<u8>> {
        let required = self.data_shards + self.parity_shards;
        if parts.len() != required {
            return Err(TesseraError::UnexpectedShardsCount {
                expected: required,
                actual: parts.len(),
            });
        }
        if parts.iter().filter(|part| part.is_some()).count() < self.data_shards {
            return Err(TesseraError::ShardsUnavailable);
        }

        self.codec
            .reconstruct_data(&mut parts)
            .map_err(|e| TesseraError::internal("ERASURE", format!("{:?}", e)))?;

        let mut data = Vec::with_capacity(size);
        for part in parts.into_iter().take(self.data_shards) {
            let part = part.ok_or_else(|| {
                TesseraError::internal("ERASURE", "data part missing after reconstruction")
            })?;
            data.extend_from_slice(&part);
        }
        if data.len() < size {
            return Err(TesseraError::InvalidDataSize {
                expected: size,
                actual: data.len(),
            });
        }
        data.truncate(size);
        Ok(data)
    }

    fn required_part_count(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    fn min_valid_parts(&self) -> usize {
        self.data_shards
    }
}
