//! Legacy EIP-155 transactions: encoding for signing, attaching a threshold
//! signature and decoding what was signed.

use alloy::primitives::keccak256;
use alloy::primitives::Address;
use alloy::primitives::Bytes;
use alloy::primitives::B256;
use alloy::primitives::U256;
use alloy::rlp::Decodable;
use alloy::rlp::Encodable;
use alloy::rlp::Header;
use ledger::keys::PublicKey;
use secp256k1::ecdsa::RecoverableSignature;
use secp256k1::ecdsa::RecoveryId;
use secp256k1::Message;
use secp256k1::SECP256K1;

use crate::error::Error;

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    /// The nonce of the vault.
    pub nonce: u64,
    /// The gas price, in wei.
    pub gas_price: u128,
    /// The gas limit.
    pub gas_limit: u64,
    /// The recipient or called contract.
    pub to: Address,
    /// The native value, in wei.
    pub value: U256,
    /// The call data.
    pub data: Bytes,
    /// The EIP-155 chain id.
    pub chain_id: u64,
}

/// A recoverable signature in the form carried by a legacy transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The `r` value.
    pub r: U256,
    /// The `s` value, always in the lower half of the curve order.
    pub s: U256,
    /// The recovery id, 0 or 1.
    pub recovery_id: u8,
}

impl LegacyTransaction {
    fn fields_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
    }

    fn encode_fields(&self, out: &mut dyn alloy::rlp::BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// The RLP payload that is hashed for signing.
    pub fn signing_payload(&self) -> Vec<u8> {
        let payload_length = self.fields_length() + self.chain_id.length() + 2 * 0u8.length();
        let mut out = Vec::with_capacity(payload_length + 4);
        Header { list: true, payload_length }.encode(&mut out);
        self.encode_fields(&mut out);
        self.chain_id.encode(&mut out);
        0u8.encode(&mut out);
        0u8.encode(&mut out);
        out
    }

    /// The hash the vault signs.
    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// The `v` value of a signature with the given recovery id.
    pub fn v(&self, recovery_id: u8) -> u64 {
        recovery_id as u64 + self.chain_id * 2 + 35
    }

    /// Encode the transaction with its signature, ready for broadcast.
    pub fn encode_signed(&self, signature: &Signature) -> Vec<u8> {
        let v = self.v(signature.recovery_id);
        let payload_length =
            self.fields_length() + v.length() + signature.r.length() + signature.s.length();
        let mut out = Vec::with_capacity(payload_length + 4);
        Header { list: true, payload_length }.encode(&mut out);
        self.encode_fields(&mut out);
        v.encode(&mut out);
        signature.r.encode(&mut out);
        signature.s.encode(&mut out);
        out
    }

    /// Decode a signed transaction produced by [`Self::encode_signed`].
    pub fn decode_signed(mut raw: &[u8]) -> Result<(Self, Signature), Error> {
        let buf = &mut raw;
        let header = Header::decode(buf).map_err(rlp_error)?;
        if !header.list {
            return Err(Error::InvalidTxOutItem("signed transaction is not an rlp list"));
        }

        let nonce = u64::decode(buf).map_err(rlp_error)?;
        let gas_price = u128::decode(buf).map_err(rlp_error)?;
        let gas_limit = u64::decode(buf).map_err(rlp_error)?;
        let to = Address::decode(buf).map_err(rlp_error)?;
        let value = U256::decode(buf).map_err(rlp_error)?;
        let data = Bytes::decode(buf).map_err(rlp_error)?;
        let v = u64::decode(buf).map_err(rlp_error)?;
        let r = U256::decode(buf).map_err(rlp_error)?;
        let s = U256::decode(buf).map_err(rlp_error)?;

        if v < 35 {
            return Err(Error::InvalidTxOutItem("signed transaction is not replay protected"));
        }
        let chain_id = (v - 35) / 2;
        let recovery_id = ((v - 35) % 2) as u8;
        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
            chain_id,
        };
        Ok((tx, Signature { r, s, recovery_id }))
    }
}

fn rlp_error(error: alloy::rlp::Error) -> Error {
    Error::UnexpectedChainRpcResponse(format!("invalid rlp: {error}").into())
}

/// Normalise a 64 byte compact signature of `hash` and find the recovery id
/// that recovers it to `pub_key`.
pub fn recover_signature(hash: B256, compact: &[u8; 64], pub_key: &PublicKey) -> Result<Signature, Error> {
    let mut signature =
        secp256k1::ecdsa::Signature::from_compact(compact).map_err(Error::InvalidSignature)?;
    signature.normalize_s();
    let compact = signature.serialize_compact();

    let message = Message::from_digest(hash.0);
    let expected = secp256k1::PublicKey::from(pub_key);
    for id in 0..=1 {
        let recovery_id = RecoveryId::from_i32(id).map_err(Error::InvalidSignature)?;
        let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
            .map_err(Error::InvalidSignature)?;
        if SECP256K1.recover_ecdsa(&message, &recoverable).ok() == Some(expected) {
            return Ok(Signature {
                r: U256::from_be_slice(&compact[..32]),
                s: U256::from_be_slice(&compact[32..]),
                recovery_id: id as u8,
            });
        }
    }

    Err(Error::SignatureRecovery(*pub_key))
}

/// Recover the public key that signed `tx`.
pub fn recover_signer(tx: &LegacyTransaction, signature: &Signature) -> Result<PublicKey, Error> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r.to_be_bytes::<32>());
    compact[32..].copy_from_slice(&signature.s.to_be_bytes::<32>());

    let recovery_id = RecoveryId::from_i32(signature.recovery_id as i32).map_err(Error::InvalidSignature)?;
    let recoverable =
        RecoverableSignature::from_compact(&compact, recovery_id).map_err(Error::InvalidSignature)?;
    let message = Message::from_digest(tx.signing_hash().0);
    let key = SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(Error::InvalidSignature)?;
    Ok(PublicKey::from(key))
}

/// The account address of a public key.
pub fn address_of(pub_key: &PublicKey) -> Address {
    let uncompressed = pub_key.serialize_uncompressed();
    Address::from_slice(&keccak256(&uncompressed[1..])[12..])
}
