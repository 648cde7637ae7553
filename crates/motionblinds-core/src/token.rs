use crate::KeyError;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Shared secret baked into every Motion bridge.
pub const DEFAULT_KEY: &str = "d5d967ca-5d37-4c";

const BLOCK_LEN: usize = 16;

/// AES-128 key used to turn a bridge session token into an [`AccessToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey([u8; BLOCK_LEN]);

impl AccessKey {
    pub fn new(key: &str) -> Result<Self, KeyError> {
        let bytes: [u8; BLOCK_LEN] = key
            .as_bytes()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(key.len()))?;
        Ok(Self(bytes))
    }

    /// Encrypts the first block of `token` (PKCS#7 padded when shorter than
    /// one block) and renders it as 32 upper-case hex digits.
    pub fn derive(&self, token: &str) -> AccessToken {
        let raw = token.as_bytes();
        let mut block = [0u8; BLOCK_LEN];
        if raw.len() >= BLOCK_LEN {
            block.copy_from_slice(&raw[..BLOCK_LEN]);
        } else {
            let pad = (BLOCK_LEN - raw.len()) as u8;
            block[..raw.len()].copy_from_slice(raw);
            block[raw.len()..].fill(pad);
        }

        let cipher = Aes128::new(GenericArray::from_slice(&self.0));
        let mut block = GenericArray::from(block);
        cipher.encrypt_block(&mut block);

        let mut hex = String::with_capacity(BLOCK_LEN * 2);
        for byte in block.iter() {
            let _ = write!(hex, "{byte:02X}");
        }
        AccessToken(hex)
    }
}

impl Default for AccessKey {
    fn default() -> Self {
        Self(*b"d5d967ca-5d37-4c")
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(..)")
    }
}

/// Value of the `AccessToken` envelope field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
