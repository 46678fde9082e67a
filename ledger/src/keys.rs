//! This module contains the `PublicKey` type used throughout the ledger
//! and the bridge. Vault keys and validator keys are both points on the
//! secp256k1 curve; the bridge never holds the matching private key of a
//! vault, it only asks the TSS subsystem to sign on its behalf.
//!
//! ## Encodings
//!
//! Keys are written as the lower-case hex of their 33 byte compressed
//! SEC1 serialization. The same encoding is used for `Display`,
//! `FromStr` and serde, so that keys round-trip through config files,
//! JSON payloads and store keys alike.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

/// The public key type for the secp256k1 elliptic curve.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(secp256k1::PublicKey);

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(value: secp256k1::PublicKey) -> Self {
        Self(value)
    }
}

impl From<&secp256k1::PublicKey> for PublicKey {
    fn from(value: &secp256k1::PublicKey) -> Self {
        Self(*value)
    }
}

impl From<&PublicKey> for secp256k1::PublicKey {
    fn from(value: &PublicKey) -> Self {
        value.0
    }
}

impl PublicKey {
    /// Creates a public key directly from a slice.
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        secp256k1::PublicKey::from_slice(data)
            .map(Self)
            .map_err(Error::InvalidPublicKey)
    }

    /// Derive the public key of the given secret key.
    pub fn from_secret_key(secret_key: &secp256k1::SecretKey) -> Self {
        Self(secret_key.public_key(secp256k1::SECP256K1))
    }

    /// Serializes the key as a byte-encoded pair of values in compressed
    /// form. In compressed form the y-coordinate is represented by only a
    /// single bit, as x determines it up to one bit.
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// Serializes the key in uncompressed form, a 0x04 prefix followed by
    /// the 32 byte x- and y-coordinates.
    pub fn serialize_uncompressed(&self) -> [u8; 65] {
        self.0.serialize_uncompressed()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.serialize()))
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(Error::InvalidPublicKeyHex)?;
        Self::from_slice(&bytes)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}
