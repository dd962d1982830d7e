use crate::{Result, TesseraError};
use blake2::digest::consts::{U32, U64};
use blake2::{Blake2b, Blake2bMac};
use hmac::digest::OutputSizeUser;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

/// Content fingerprint over chunk bytes.
///
/// A hasher is owned by a single worker; use a [`HasherConstructor`] to get one per task.
pub trait Hasher: Send {
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    fn size(&self) -> usize;
}

pub type HasherConstructor = Arc<dyn Fn() -> Result<Box<dyn Hasher>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashType {
    #[default]
    #[serde(rename = "blake2b_256")]
    Blake2b256,
    #[serde(rename = "blake2b_512")]
    Blake2b512,
    #[serde(rename = "sha_256")]
    Sha256,
    #[serde(rename = "sha_512")]
    Sha512,
}

impl HashType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashType::Blake2b256 => "blake2b_256",
            HashType::Blake2b512 => "blake2b_512",
            HashType::Sha256 => "sha_256",
            HashType::Sha512 => "sha_512",
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashType {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "blake2b_256" => Ok(HashType::Blake2b256),
            "blake2b_512" => Ok(HashType::Blake2b512),
            "sha_256" => Ok(HashType::Sha256),
            "sha_512" => Ok(HashType::Sha512),
            other => Err(TesseraError::Config(format!(
                "unsupported hash type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashingConfig {
    #[serde(rename = "type", default)]
    pub hash_type: HashType,
    #[serde(default)]
    pub private_key: Option<String>,
}

impl HashingConfig {
    /// Builds a constructor, keying the hasher with `fallback_key` when no
    /// private key of its own is configured.
    pub fn constructor(&self, fallback_key: Option<&str>) -> Result<HasherConstructor> {
        let hash_type = self.hash_type;
        let key = self
            .private_key
            .as_deref()
            .or(fallback_key)
            .filter(|key| !key.is_empty())
            .map(|key| key.as_bytes().to_vec());

        // surface key errors at configuration time
        new_hasher(hash_type, key.as_deref())?;

        Ok(Arc::new(move || new_hasher(hash_type, key.as_deref())))
    }
}

pub fn new_hasher(hash_type: HashType, key: Option<&[u8]>) -> Result<Box<dyn Hasher>> {
    let key = key.filter(|key| !key.is_empty());
    let hasher: Box<dyn Hasher> = match (hash_type, key) {
        (HashType::Blake2b256, None) => Box::new(DigestHasher::<Blake2b<U32>>::new()),
        (HashType::Blake2b512, None) => Box::new(DigestHasher::<Blake2b<U64>>::new()),
        (HashType::Sha256, None) => Box::new(DigestHasher::<Sha256>::new()),
        (HashType::Sha512, None) => Box::new(DigestHasher::<Sha512>::new()),
        (HashType::Blake2b256, Some(key)) => {
            Box::new(MacHasher::new(Blake2bMac::<U32>::new_from_slice(key).map_err(
                |_| invalid_key(hash_type, key.len()),
            )?))
        }
        (HashType::Blake2b512, Some(key)) => {
            Box::new(MacHasher::new(Blake2bMac::<U64>::new_from_slice(key).map_err(
                |_| invalid_key(hash_type, key.len()),
            )?))
        }
        (HashType::Sha256, Some(key)) => Box::new(MacHasher::new(
            Hmac::<Sha256>::new_from_slice(key).map_err(|_| invalid_key(hash_type, key.len()))?,
        )),
        (HashType::Sha512, Some(key)) => Box::new(MacHasher::new(
            Hmac::<Sha512>::new_from_slice(key).map_err(|_| invalid_key(hash_type, key.len()))?,
        )),
    };
    Ok(hasher)
}

fn invalid_key(hash_type: HashType, len: usize) -> TesseraError {
    TesseraError::Config(format!(
        "invalid private key length {} for hash type {}",
        len, hash_type
    ))
}

struct DigestHasher<D> {
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestHasher<D> {
    fn new() -> Self {
        Self {
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> Hasher for DigestHasher<D> {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        D::digest(data).to_vec()
    }

    fn size(&self) -> usize {
        <D as Digest>::output_size()
    }
}

/// Keyed variant; the prepared MAC state is cloned for every input.
struct MacHasher<M> {
    mac: M,
}

impl<M> MacHasher<M> {
    fn new(mac: M) -> Self {
        Self { mac }
    }
}

impl<M: Mac + Clone + Send> Hasher for MacHasher<M> {
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn size(&self) -> usize {
        <M as OutputSizeUser>::output_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_sizes() {
        let cases = [
            (HashType::Blake2b256, 32),
            (HashType::Blake2b512, 64),
            (HashType::Sha256, 32),
            (HashType::Sha512, 64),
        ];
        for (hash_type, size) in cases {
            let plain = new_hasher(hash_type, None).unwrap();
            assert_eq!(plain.hash(b"hello world").len(), size);
            assert_eq!(plain.size(), size);

            let keyed = new_hasher(hash_type, Some(b"01234567890123456789012345678901")).unwrap();
            assert_eq!(keyed.hash(b"hello world").len(), size);
        }
    }

    #[test]
    fn test_keyed_hash_differs() {
        for hash_type in [
            HashType::Blake2b256,
            HashType::Blake2b512,
            HashType::Sha256,
            HashType::Sha512,
        ] {
            let plain = new_hasher(hash_type, None).unwrap();
            let keyed = new_hasher(hash_type, Some(b"secret")).unwrap();
            let other = new_hasher(hash_type, Some(b"other secret")).unwrap();

            let data = b"some chunk of data";
            assert_eq!(plain.hash(data), plain.hash(data));
            assert_eq!(keyed.hash(data), keyed.hash(data));
            assert_ne!(plain.hash(data), keyed.hash(data));
            assert_ne!(keyed.hash(data), other.hash(data));
        }
    }

    #[test]
    fn test_sha256_known_digest() {
        let hasher = new_hasher(HashType::Sha256, None).unwrap();
        assert_eq!(
            hex::encode(hasher.hash(b"hello world")),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_hash_type_parsing() {
        assert_eq!("".parse::<HashType>().unwrap(), HashType::Blake2b256);
        assert_eq!("SHA_512".parse::<HashType>().unwrap(), HashType::Sha512);
        assert!("md5".parse::<HashType>().is_err());

        let parsed: HashType = serde_json::from_str("\"blake2b_512\"").unwrap();
        assert_eq!(parsed, HashType::Blake2b512);
    }

    #[test]
    fn test_constructor_uses_fallback_key() {
        let config = HashingConfig::default();
        let with_fallback = config.constructor(Some("encryption key")).unwrap();
        let without = config.constructor(None).unwrap();

        let data = b"abc";
        assert_ne!(
            with_fallback().unwrap().hash(data),
            without().unwrap().hash(data)
        );
    }

    #[test]
    fn test_blake2b_key_too_long() {
        let key = vec![7u8; 65];
        assert!(new_hasher(HashType::Blake2b256, Some(&key)).is_err());
    }
}
