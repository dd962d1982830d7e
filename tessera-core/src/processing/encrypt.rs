use super::Processor;
use crate::{Result, TesseraError};
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionType {
    #[default]
    Aes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(rename = "type", default)]
    pub encryption_type: EncryptionType,
    pub private_key: String,
}

pub fn new_encrypter_decrypter(
    encryption_type: EncryptionType,
    key: &[u8],
) -> Result<Box<dyn Processor>> {
    match encryption_type {
        EncryptionType::Aes => Ok(Box::new(AesGcmProcessor::new(key)?)),
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM, the variant picked by key length (16, 24 or 32 bytes).
///
/// Sealed output is `nonce || ciphertext || tag`, a fresh random nonce per call.
pub struct AesGcmProcessor {
    cipher: Cipher,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
}

impl AesGcmProcessor {
    pub fn new(key: &[u8]) -> Result<Self> {
        let invalid = || {
            TesseraError::Config(format!(
                "invalid AES key length {}: expected 16, 24 or 32 bytes",
                key.len()
            ))
        };
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(|_| invalid())?)),
            24 => Cipher::Aes192(Box::new(Aes192Gcm::new_from_slice(key).map_err(|_| invalid())?)),
            32 => Cipher::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| invalid())?)),
            _ => return Err(invalid()),
        };
        Ok(Self {
            cipher,
            write_buf: Vec::new(),
            read_buf: Vec::new(),
        })
    }
}

impl Processor for AesGcmProcessor {
    fn write_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        self.write_buf.clear();
        self.write_buf.reserve(NONCE_SIZE + data.len() + TAG_SIZE);
        self.write_buf.extend_from_slice(&nonce);
        self.write_buf.extend_from_slice(data);

        let payload = &mut self.write_buf[NONCE_SIZE..];
        let tag = match &self.cipher {
            Cipher::Aes128(cipher) => seal(cipher.as_ref(), &nonce, payload)?,
            Cipher::Aes192(cipher) => seal(cipher.as_ref(), &nonce, payload)?,
            Cipher::Aes256(cipher) => seal(cipher.as_ref(), &nonce, payload)?,
        };
        self.write_buf.extend_from_slice(&tag);
        Ok(Cow::Borrowed(&self.write_buf))
    }

    fn read_process<'a>(&'a mut self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(TesseraError::Processing("malformed ciphertext".to_string()));
        }
        let (nonce, rest) = data.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

        self.read_buf.clear();
        self.read_buf.extend_from_slice(ciphertext);

        let payload = self.read_buf.as_mut_slice();
        match &self.cipher {
            Cipher::Aes128(cipher) => open(cipher.as_ref(), nonce, payload, tag)?,
            Cipher::Aes192(cipher) => open(cipher.as_ref(), nonce, payload, tag)?,
            Cipher::Aes256(cipher) => open(cipher.as_ref(), nonce, payload, tag)?,
        }
        Ok(Cow::Borrowed(&self.read_buf))
    }

    fn shared_write_buffer(&self) -> bool {
        true
    }

    fn shared_read_buffer(&self) -> bool {
        true
    }
}

fn seal<C>(cipher: &C, nonce: &[u8], payload: &mut [u8]) -> Result<Vec<u8>>
where
    C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), &[], payload)
        .map_err(|_| TesseraError::Processing("encryption failed".to_string()))?;
    Ok(tag.to_vec())
}

fn open<C>(cipher: &C, nonce: &[u8], payload: &mut [u8], tag: &[u8]) -> Result<()>
where
    C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
    if tag.len() != TAG_SIZE {
        return Err(TesseraError::Processing("malformed ciphertext".to_string()));
    }
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            &[],
            payload,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| TesseraError::Processing("message authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_variants_round_trip() {
        let data = b"some secret chunk data";
        for key in [
            "0123456789abcdef",
            "0123456789abcdef01234567",
            "0123456789abcdef0123456789abcdef",
        ] {
            let mut processor = AesGcmProcessor::new(key.as_bytes()).unwrap();
            let sealed = processor.write_process(data).unwrap().into_owned();
            assert_eq!(sealed.len(), NONCE_SIZE + data.len() + TAG_SIZE);
            assert_ne!(&sealed[NONCE_SIZE..NONCE_SIZE + data.len()], &data[..]);

            let plain = processor.read_process(&sealed).unwrap();
            assert_eq!(plain.as_ref(), &data[..]);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let mut processor = AesGcmProcessor::new(&[1u8; 32]).unwrap();
        let first = processor.write_process(b"same input").unwrap().into_owned();
        let second = processor.write_process(b"same input").unwrap().into_owned();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(AesGcmProcessor::new(b"too short").is_err());
        assert!(AesGcmProcessor::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_tampered_ciphertext() {
        let mut processor = AesGcmProcessor::new(&[9u8; 16]).unwrap();
        let mut sealed = processor.write_process(b"payload").unwrap().into_owned();
        sealed[NONCE_SIZE] ^= 0x01;
        assert!(processor.read_process(&sealed).is_err());

        assert!(processor.read_process(&[0u8; NONCE_SIZE]).is_err());
    }

    #[test]
    fn test_wrong_key() {
        let mut writer = AesGcmProcessor::new(&[1u8; 32]).unwrap();
        let mut reader = AesGcmProcessor::new(&[2u8; 32]).unwrap();
        let sealed = writer.write_process(b"payload").unwrap().into_owned();
        assert!(reader.read_process(&sealed).is_err());
    }
}
