//! Utility functions and helpers
//!
//! Cryptographic primitives (hashing, ECDSA signing, base-58) and the
//! bincode serialization layer used by every persisted and wire type.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};

pub use serialization::{deserialize, serialize};
