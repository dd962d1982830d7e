mod compress;
mod encrypt;

pub use compress::{
    CompressionConfig, CompressionMode, CompressionType, GzipProcessor, Lz4Processor,
    SnappyProcessor, new_compressor_decompressor,
};
pub use encrypt::{AesGcmProcessor, EncryptionConfig, EncryptionType, new_encrypter_decrypter};

use crate::Result;
use std::borrow::Cow;
use std::sync::Arc;

/// Reversible byte transform applied to every chunk.
///
/// A `Cow::Borrowed` output either aliases the input or, when the matching
/// `shared_*_buffer` flag is set, an internal buffer that the next call overwrites.
/// Processors are single-threaded: construct one per task through a
/// [`ProcessorConstructor`].
pub trait Processor: Send {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    fn shared_write_buffer(&self) -> bool;

    fn shared_read_buffer(&self) -> bool;
}

pub type ProcessorConstructor = Arc<dyn Fn() -> Result<Box<dyn Processor>> + Send + Sync>;

/// Output is always the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopProcessor;

impl Processor for NopProcessor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn shared_write_buffer(&self) -> bool {
        false
    }

    fn shared_read_buffer(&self) -> bool {
        false
    }
}

/// Runs its links head to tail on write and tail to head on read.
pub struct ChainProcessor {
    processors: Vec<Box<dyn Processor>>,
}

impl ChainProcessor {
    pub fn new(processors: Vec<Box<dyn Processor>>) -> Self {
        Self { processors }
    }
}

impl Processor for ChainProcessor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut current = Cow::Borrowed(data);
        for processor in self.processors.iter_mut() {
            let processor: &'a mut (dyn Processor + 'static) = processor.as_mut();
            current = match current {
                Cow::Borrowed(input) => processor.write_process(input)?,
                Cow::Owned(input) => Cow::Owned(processor.write_process(&input)?.into_owned()),
            };
        }
        Ok(current)
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut current = Cow::Borrowed(data);
        for processor in self.processors.iter_mut().rev() {
            let processor: &'a mut (dyn Processor + 'static) = processor.as_mut();
            current = match current {
                Cow::Borrowed(input) => processor.read_process(input)?,
                Cow::Owned(input) => Cow::Owned(processor.read_process(&input)?.into_owned()),
            };
        }
        Ok(current)
    }

    fn shared_write_buffer(&self) -> bool {
        self.processors
            .last()
            .is_some_and(|processor| processor.shared_write_buffer())
    }

    fn shared_read_buffer(&self) -> bool {
        self.processors
            .first()
            .is_some_and(|processor| processor.shared_read_buffer())
    }
}

/// Builds the constructor for the configured processing stack:
/// nothing configured gives a nop processor, both configured give
/// compression followed by encryption.
pub fn processor_constructor(
    compression: Option<&CompressionConfig>,
    encryption: Option<&EncryptionConfig>,
) -> Result<ProcessorConstructor> {
    let compression = compression.cloned();
    let encryption = encryption.cloned();

    let constructor: ProcessorConstructor = match (compression, encryption) {
        (None, None) => Arc::new(|| Ok(Box::new(NopProcessor) as Box<dyn Processor>)),
        (Some(compression), None) => {
            Arc::new(move || new_compressor_decompressor(compression.compression_type, compression.mode))
        }
        (None, Some(encryption)) => Arc::new(move || {
            new_encrypter_decrypter(encryption.encryption_type, encryption.private_key.as_bytes())
        }),
        (Some(compression), Some(encryption)) => Arc::new(move || {
            let compressor =
                new_compressor_decompressor(compression.compression_type, compression.mode)?;
            let encrypter = new_encrypter_decrypter(
                encryption.encryption_type,
                encryption.private_key.as_bytes(),
            )?;
            Ok(Box::new(ChainProcessor::new(vec![compressor, encrypter])) as Box<dyn Processor>)
        }),
    };

    constructor()?;
    Ok(constructor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AES_KEY: &str = "01234567890123456789012345678901";

    fn round_trip(processor: &mut dyn Processor, data: &[u8]) -> Vec<u8> {
        let processed = processor.write_process(data).unwrap().into_owned();
        processor.read_process(&processed).unwrap().into_owned()
    }

    #[test]
    fn test_nop_processor() {
        let mut processor = NopProcessor;
        let data = b"hello";
        let processed = processor.write_process(data).unwrap();
        assert!(matches!(processed, Cow::Borrowed(out) if out.as_ptr() == data.as_ptr()));
        assert!(!processor.shared_write_buffer());
        assert!(!processor.shared_read_buffer());
    }

    #[test]
    fn test_chain_processor() {
        let compression = CompressionConfig {
            compression_type: CompressionType::Gzip,
            mode: CompressionMode::BestCompression,
        };
        let encryption = EncryptionConfig {
            encryption_type: EncryptionType::Aes,
            private_key: AES_KEY.to_string(),
        };
        let constructor = processor_constructor(Some(&compression), Some(&encryption)).unwrap();
        let mut processor = constructor().unwrap();

        let data = b"a chain of processors, a chain of processors, a chain of processors".repeat(16);
        let processed = processor.write_process(&data).unwrap().into_owned();
        assert_ne!(processed, data);
        assert_eq!(round_trip(processor.as_mut(), &data), data);
    }

    #[test]
    fn test_chain_mirrors_terminal_link() {
        let chain = ChainProcessor::new(vec![
            Box::new(NopProcessor),
            new_encrypter_decrypter(EncryptionType::Aes, AES_KEY.as_bytes()).unwrap(),
        ]);
        let encrypter = new_encrypter_decrypter(EncryptionType::Aes, AES_KEY.as_bytes()).unwrap();
        assert_eq!(chain.shared_write_buffer(), encrypter.shared_write_buffer());
        assert!(!chain.shared_read_buffer());

        let empty = ChainProcessor::new(Vec::new());
        assert!(!empty.shared_write_buffer());
    }

    #[test]
    fn test_processor_constructor_variants() {
        let constructor = processor_constructor(None, None).unwrap();
        let mut processor = constructor().unwrap();
        assert_eq!(round_trip(processor.as_mut(), b"plain"), b"plain");

        let bad_key = EncryptionConfig {
            encryption_type: EncryptionType::Aes,
            private_key: "short".to_string(),
        };
        assert!(processor_constructor(None, Some(&bad_key)).is_err());
    }
}
