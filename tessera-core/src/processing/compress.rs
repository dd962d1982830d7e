use super::Processor;
use crate::{Result, TesseraError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    #[default]
    Snappy,
    Lz4,
    Gzip,
}

/// Compression mode hint; algorithms without levels ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    #[default]
    Default,
    BestSpeed,
    BestCompression,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(rename = "type", default)]
    pub compression_type: CompressionType,
    #[serde(default)]
    pub mode: CompressionMode,
}

pub fn new_compressor_decompressor(
    compression_type: CompressionType,
    mode: CompressionMode,
) -> Result<Box<dyn Processor>> {
    let processor: Box<dyn Processor> = match compression_type {
        CompressionType::Snappy => Box::new(SnappyProcessor::new(mode)),
        CompressionType::Lz4 => Box::new(Lz4Processor::new(mode)),
        CompressionType::Gzip => Box::new(GzipProcessor::new(mode)),
    };
    Ok(processor)
}

fn compression_error(algorithm: &str, err: impl ToString) -> TesseraError {
    TesseraError::Processing(format!("{} failed: {}", algorithm, err.to_string()))
}

/// Snappy raw block format, written into a reused buffer.
pub struct SnappyProcessor {
    encoder: snap::raw::Encoder,
    decoder: snap::raw::Decoder,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
}

impl SnappyProcessor {
    pub fn new(mode: CompressionMode) -> Self {
        if mode != CompressionMode::Default {
            tracing::warn!("snappy ignores compression mode. mode={:?}", mode);
        }
        Self {
            encoder: snap::raw::Encoder::new(),
            decoder: snap::raw::Decoder::new(),
            write_buf: Vec::new(),
            read_buf: Vec::new(),
        }
    }
}

impl Processor for SnappyProcessor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        self.write_buf.resize(snap::raw::max_compress_len(data.len()), 0);
        let n = self
            .encoder
            .compress(data, &mut self.write_buf)
            .map_err(|e| compression_error("snappy compression", e))?;
        self.write_buf.truncate(n);
        Ok(Cow::Borrowed(&self.write_buf))
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let len = snap::raw::decompress_len(data)
            .map_err(|e| compression_error("snappy decompression", e))?;
        self.read_buf.resize(len, 0);
        let n = self
            .decoder
            .decompress(data, &mut self.read_buf)
            .map_err(|e| compression_error("snappy decompression", e))?;
        self.read_buf.truncate(n);
        Ok(Cow::Borrowed(&self.read_buf))
    }

    fn shared_write_buffer(&self) -> bool {
        true
    }

    fn shared_read_buffer(&self) -> bool {
        true
    }
}

/// LZ4 block format with the decompressed size prepended.
pub struct Lz4Processor;

impl Lz4Processor {
    pub fn new(mode: CompressionMode) -> Self {
        if mode != CompressionMode::Default {
            tracing::warn!("lz4 ignores compression mode. mode={:?}", mode);
        }
        Self
    }
}

impl Processor for Lz4Processor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let plain = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| compression_error("lz4 decompression", e))?;
        Ok(Cow::Owned(plain))
    }

    fn shared_write_buffer(&self) -> bool {
        false
    }

    fn shared_read_buffer(&self) -> bool {
        false
    }
}

pub struct GzipProcessor {
    level: Compression,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
}

impl GzipProcessor {
    pub fn new(mode: CompressionMode) -> Self {
        let level = match mode {
            CompressionMode::Default => Compression::default(),
            CompressionMode::BestSpeed => Compression::fast(),
            CompressionMode::BestCompression => Compression::best(),
        };
        Self {
            level,
            write_buf: Vec::new(),
            read_buf: Vec::new(),
        }
    }
}

impl Processor for GzipProcessor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut buf = std::mem::take(&mut self.write_buf);
        buf.clear();
        let mut encoder = GzEncoder::new(buf, self.level);
        encoder
            .write_all(data)
            .map_err(|e| compression_error("gzip compression", e))?;
        self.write_buf = encoder
            .finish()
            .map_err(|e| compression_error("gzip compression", e))?;
        Ok(Cow::Borrowed(&self.write_buf))
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        self.read_buf.clear();
        GzDecoder::new(data)
            .read_to_end(&mut self.read_buf)
            .map_err(|e| compression_error("gzip decompression", e))?;
        Ok(Cow::Borrowed(&self.read_buf))
    }

    fn shared_write_buffer(&self) -> bool {
        true
    }

    fn shared_read_buffer(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog. ".repeat(64)
    }

    #[test]
    fn test_compressors_round_trip() {
        let data = sample();
        for compression_type in [
            CompressionType::Snappy,
            CompressionType::Lz4,
            CompressionType::Gzip,
        ] {
            for mode in [
                CompressionMode::Default,
                CompressionMode::BestSpeed,
                CompressionMode::BestCompression,
            ] {
                let mut processor = new_compressor_decompressor(compression_type, mode).unwrap();
                let compressed = processor.write_process(&data).unwrap().into_owned();
                assert!(
                    compressed.len() < data.len(),
                    "{:?} did not compress",
                    compression_type
                );
                let plain = processor.read_process(&compressed).unwrap();
                assert_eq!(plain.as_ref(), data.as_slice());
            }
        }
    }

    #[test]
    fn test_empty_input() {
        for compression_type in [
            CompressionType::Snappy,
            CompressionType::Lz4,
            CompressionType::Gzip,
        ] {
            let mut processor =
                new_compressor_decompressor(compression_type, CompressionMode::Default).unwrap();
            let compressed = processor.write_process(&[]).unwrap().into_owned();
            let plain = processor.read_process(&compressed).unwrap();
            assert!(plain.is_empty());
        }
    }

    #[test]
    fn test_malformed_input() {
        let garbage = [0xffu8; 32];
        let mut gzip = GzipProcessor::new(CompressionMode::Default);
        assert!(gzip.read_process(&garbage).is_err());

        let mut lz4 = Lz4Processor::new(CompressionMode::Default);
        assert!(lz4.read_process(&[8, 0, 0, 0, 0xf0]).is_err());
    }

    #[test]
    fn test_config_deserialize() {
        let config: CompressionConfig =
            serde_json::from_str(r#"{"type": "lz4", "mode": "best_speed"}"#).unwrap();
        assert_eq!(config.compression_type, CompressionType::Lz4);
        assert_eq!(config.mode, CompressionMode::BestSpeed);
    }
}
