//! Passphrase-based encryption of JSON values.
//!
//! Every ciphertext is a self-describing string: it carries the Argon2id
//! parameters, the salt and the XChaCha20-Poly1305 nonce it was produced
//! with, so callers only ever hand over the ciphertext and a [`Passphrase`].
//!
//! ```text
//! rdb1:<base64( version | memory_kib | iterations | parallelism | salt | nonce | ct )>
//! ```
//!
//! Decryption never panics and never guesses: it either yields the exact
//! plaintext or a [`DecryptFailure`] that callers inspect and skip.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{aead::Aead, KeyInit};
use rand_core::RngCore;
use serde_json::Value;
use thiserror::Error;
use zeroize::Zeroizing;

const PREFIX: &str = "rdb1:";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 4 * 3 + SALT_LEN;

const MIB: u32 = 1024;
const MAX_MEMORY_KIB: u32 = 1024 * MIB;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 16;

/// Secret passphrase. Wiped on drop and deliberately not `Debug`.
///
/// ```compile_fail
/// fn assert_debug<T: std::fmt::Debug>() {}
/// assert_debug::<ronydb_crypto::Passphrase>();
/// ```
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Argon2id cost parameters used when producing new ciphertexts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * MIB,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn within_bounds(&self) -> bool {
        self.memory_kib <= MAX_MEMORY_KIB
            && (1..=MAX_ITERATIONS).contains(&self.iterations)
            && (1..=MAX_PARALLELISM).contains(&self.parallelism)
    }

    /// Check that ciphertexts produced with these parameters can be opened
    /// again: Argon2 must accept them and they must lie within the bounds
    /// decryption enforces on the header.
    pub fn validate(&self) -> Result<(), KdfError> {
        if !self.within_bounds() {
            return Err(KdfError::OutOfRange {
                max_memory_kib: MAX_MEMORY_KIB,
                max_iterations: MAX_ITERATIONS,
                max_parallelism: MAX_PARALLELISM,
            });
        }
        argon2::Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map(|_| ())
            .map_err(KdfError::InvalidParams)
    }
}

#[derive(Debug, Error)]
pub enum KdfError {
    #[error("invalid kdf parameters: {0}")]
    InvalidParams(argon2::Error),
    #[error(
        "kdf parameters out of range (memory_kib <= {max_memory_kib}, \
         iterations 1..={max_iterations}, parallelism 1..={max_parallelism})"
    )]
    OutOfRange {
        max_memory_kib: u32,
        max_iterations: u32,
        max_parallelism: u32,
    },
    #[error("key derivation failed")]
    DerivationFailed(argon2::Error),
}

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Kdf(#[from] KdfError),
    #[error("AEAD encryption failed")]
    AeadFailed(chacha20poly1305::aead::Error),
}

/// Why a ciphertext could not be opened.
///
/// This is the soft-failure channel: callers match on it and carry on
/// (skip a row, report a bad backup) instead of unwinding.
#[derive(Debug, Error)]
pub enum DecryptFailure {
    #[error("ciphertext is not a string")]
    NotAString,
    #[error("malformed ciphertext: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Kdf(#[from] KdfError),
    #[error("AEAD decryption failed (wrong passphrase or tampered data)")]
    Aead,
    #[error("plaintext is not valid UTF-8")]
    NotUtf8,
}

fn derive_key(
    passphrase: &Passphrase,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KdfError> {
    let argon_params = argon2::Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(KdfError::InvalidParams)?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon_params,
    );

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.expose().as_bytes(), salt, key.as_mut())
        .map_err(KdfError::DerivationFailed)?;

    Ok(key)
}

fn encode_header(params: &KdfParams, salt: &[u8; SALT_LEN]) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = VERSION;
    header[1..5].copy_from_slice(&params.memory_kib.to_le_bytes());
    header[5..9].copy_from_slice(&params.iterations.to_le_bytes());
    header[9..13].copy_from_slice(&params.parallelism.to_le_bytes());
    header[13..].copy_from_slice(salt);
    header
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// Encrypts and decrypts under one passphrase.
///
/// Constructed once from configuration and passed to whoever needs it;
/// rotation simply holds two of these.
#[derive(Clone)]
pub struct Codec {
    passphrase: Passphrase,
    params: KdfParams,
}

impl Codec {
    pub fn new(passphrase: Passphrase, params: KdfParams) -> Self {
        Self { passphrase, params }
    }

    pub fn passphrase(&self) -> &Passphrase {
        &self.passphrase
    }

    /// Encrypt a JSON value. Strings are encrypted as-is, everything else
    /// as its JSON text.
    ///
    /// [`decrypt`](Self::decrypt) parses the plaintext as JSON first, so a
    /// string whose text is itself JSON (`"123"`, `"true"`, `"[1]"`) comes
    /// back as that JSON value rather than as a string. Use
    /// [`encrypt_str`](Self::encrypt_str) and [`decrypt_str`](Self::decrypt_str)
    /// when the exact text matters.
    pub fn encrypt(&self, value: &Value) -> Result<String, EncryptError> {
        match value {
            Value::String(s) => self.encrypt_str(s),
            other => {
                let text = Zeroizing::new(serde_json::to_string(other)?);
                self.encrypt_str(&text)
            }
        }
    }

    /// Encrypt plaintext text without any JSON interpretation.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, EncryptError> {
        self.params.validate()?;

        let mut salt = [0u8; SALT_LEN];
        rand_core::OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand_core::OsRng.fill_bytes(&mut nonce_bytes);

        let key = derive_key(&self.passphrase, &salt, &self.params)?;
        let header = encode_header(&self.params, &salt);

        let cipher = chacha20poly1305::XChaCha20Poly1305::new(&chacha20poly1305::Key::from(*key));
        let nonce = chacha20poly1305::XNonce::from(nonce_bytes);
        let ct = cipher
            .encrypt(
                &nonce,
                chacha20poly1305::aead::Payload {
                    msg: plaintext.as_bytes(),
                    aad: &header,
                },
            )
            .map_err(EncryptError::AeadFailed)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + NONCE_LEN + ct.len());
        blob.extend_from_slice(&header);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ct);

        Ok(format!("{PREFIX}{}", STANDARD.encode(blob)))
    }

    /// Decrypt to the exact plaintext text that was encrypted.
    pub fn decrypt_str(&self, ciphertext: &str) -> Result<Zeroizing<String>, DecryptFailure> {
        let encoded = ciphertext
            .strip_prefix(PREFIX)
            .ok_or(DecryptFailure::Malformed("missing prefix"))?;
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|_| DecryptFailure::Malformed("invalid base64"))?;

        if blob.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(DecryptFailure::Malformed("too short"));
        }
        let (header, rest) = blob.split_at(HEADER_LEN);
        let (nonce_bytes, ct) = rest.split_at(NONCE_LEN);

        if header[0] != VERSION {
            return Err(DecryptFailure::Malformed("unsupported version"));
        }
        let params = KdfParams {
            memory_kib: read_u32(&header[1..5]),
            iterations: read_u32(&header[5..9]),
            parallelism: read_u32(&header[9..13]),
        };
        if !params.within_bounds() {
            return Err(DecryptFailure::Malformed("kdf parameters out of range"));
        }

        let key = derive_key(&self.passphrase, &header[13..], &params)?;
        let cipher = chacha20poly1305::XChaCha20Poly1305::new(&chacha20poly1305::Key::from(*key));

        let mut nonce_array = [0u8; NONCE_LEN];
        nonce_array.copy_from_slice(nonce_bytes);
        let nonce = chacha20poly1305::XNonce::from(nonce_array);

        let pt = cipher
            .decrypt(
                &nonce,
                chacha20poly1305::aead::Payload {
                    msg: ct,
                    aad: header,
                },
            )
            .map_err(|_| DecryptFailure::Aead)?;
        let pt = Zeroizing::new(pt);

        let text = std::str::from_utf8(&pt).map_err(|_| DecryptFailure::NotUtf8)?;
        Ok(Zeroizing::new(text.to_owned()))
    }

    /// Decrypt and parse as JSON, falling back to the raw string when the
    /// plaintext is not JSON.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Value, DecryptFailure> {
        let text = self.decrypt_str(ciphertext)?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.to_string())))
    }

    /// Decrypt a stored column value; anything but a string is a failure.
    pub fn decrypt_value(&self, value: &Value) -> Result<Value, DecryptFailure> {
        match value {
            Value::String(s) => self.decrypt(s),
            _ => Err(DecryptFailure::NotAString),
        }
    }
}
