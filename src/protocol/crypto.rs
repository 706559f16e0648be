//! Session crypto.
//!
//! Both peers generate an X25519 key pair and exchange public keys in the
//! handshake. The session key is SHA-256 over a domain tag and the shared
//! secret, used with ChaCha20-Poly1305. Encrypted payloads are laid out as
//! `[12-byte nonce][ciphertext][16-byte tag]`.

use std::fmt;
use std::sync::{Arc, RwLock};

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::codec::{CryptoPublicKey, PUBLIC_KEY_SIZE};
use crate::error::{Error, Result};

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const KDF_DOMAIN: &[u8] = b"overlay-sync session key v1";

pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| Error::Crypto(format!("rng failure: {e}")))
}

/// Ephemeral key pair for one handshake
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        fill_random(&mut bytes)?;
        Ok(Self::from_secret_bytes(bytes))
    }

    pub fn from_secret_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> CryptoPublicKey {
        CryptoPublicKey(*self.public.as_bytes())
    }

    /// Combine with the peer's public key into a symmetric session box.
    pub fn derive(&self, peer: &CryptoPublicKey) -> Result<CryptoBox> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer.0));
        if !shared.was_contributory() {
            return Err(Error::Crypto("peer sent a low-order public key".into()));
        }

        let digest = Sha256::new()
            .chain_update(KDF_DOMAIN)
            .chain_update(shared.as_bytes())
            .finalize();
        Ok(CryptoBox::from_key(digest.into()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Symmetric AEAD box for packet payloads
#[derive(Clone)]
pub struct CryptoBox {
    cipher: ChaCha20Poly1305,
}

impl CryptoBox {
    pub fn from_key(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        fill_random(&mut nonce)?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Crypto(format!("ciphertext too short: {} bytes", data.len())));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("authentication failed".into()))
    }
}

impl fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CryptoBox { .. }")
    }
}

/// Session box shared between the update thread (which installs it once the
/// handshake completes) and the I/O task (which decrypts with it).
#[derive(Debug, Clone, Default)]
pub struct SharedCrypto(Arc<RwLock<Option<CryptoBox>>>);

impl SharedCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, crypto: CryptoBox) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(crypto);
    }

    pub fn clear(&self) {
        let mut guard = self.0.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn is_established(&self) -> bool {
        self.0.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn with<R>(&self, f: impl FnOnce(Option<&CryptoBox>) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(|e| e.into_inner());
        f(guard.as_ref())
    }
}
