//! API key generation and verification.
//!
//! ## Hashing algorithm
//!
//! API keys are 256 bits of `rand::thread_rng()` entropy, not user-chosen
//! passwords, so they are hashed with SHA-256 rather than bcrypt/argon2:
//! bcrypt's random salt makes `WHERE key_hash = ?` lookups impossible (the
//! same key hashes differently every call), and its slow cost defends
//! against brute-forcing low-entropy secrets, which a 256-bit random key
//! already isn't. SHA-256 gives deterministic, indexable lookups and no
//! meaningful loss of security for inputs this random.

use base64::{engine::general_purpose, Engine as _};
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};

/// Generates and hashes API keys.
#[derive(Debug, Clone, Default)]
pub struct TokenGenerator;

impl TokenGenerator
{
  /// Create a new generator.
  #[must_use]
  pub fn new() -> Self
  {
    Self
  }

  /// Generate a new API key with the `gw_` prefix.
  #[must_use]
  pub fn generate(&self) -> String
  {
    let mut rng = thread_rng();
    let random_bytes: [u8; 32] = rng.gen();
    format!("gw_{}", general_purpose::URL_SAFE_NO_PAD.encode(random_bytes))
  }

  /// Hash a key with SHA-256 for storage/lookup.
  #[must_use]
  pub fn hash_key(&self, key: &str) -> String
  {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
  }

  /// Check a presented key against a stored hash.
  #[must_use]
  pub fn verify_key(&self, key: &str, stored_hash: &str) -> bool
  {
    self.hash_key(key) == stored_hash
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn generated_keys_have_prefix_and_are_unique()
  {
    let gen = TokenGenerator::new();
    let a = gen.generate();
    let b = gen.generate();
    assert!(a.starts_with("gw_"));
    assert_ne!(a, b);
  }

  #[test]
  fn hash_is_deterministic_and_verifies()
  {
    let gen = TokenGenerator::new();
    let key = gen.generate();
    let hash = gen.hash_key(&key);
    assert_eq!(hash, gen.hash_key(&key));
    assert!(gen.verify_key(&key, &hash));
    assert!(!gen.verify_key("wrong-key", &hash));
  }
}
