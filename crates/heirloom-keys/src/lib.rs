//! Script key parsing and normalization
//!
//! Every key that ends up inside a vault witness script is a 33-byte
//! compressed-format point. Callers may supply either the raw hex form or an
//! extended public key; extended keys are resolved to the non-hardened child
//! at `0/0` — the same leaf a third-party wallet sees when watching a
//! standard receive chain.
//!
//! [`ScriptKey`] is format-checked (length + `0x02`/`0x03` prefix) but not
//! curve-checked: the engine embeds the owner's bytes verbatim and never
//! substitutes or hashes. Curve membership is only enforced where a key has
//! to sign or be rendered through miniscript ([`ScriptKey::to_public_key`]).

use bitcoin::bip32::{ChildNumber, Fingerprint, Xpub};
use bitcoin::hashes::{hash160, ripemd160, sha256};
use bitcoin::secp256k1::Secp256k1;
use miniscript::MiniscriptKey;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("not an extended public key: {0}")]
    NotExtended(String),

    #[error("base58 decoding failed: {0}")]
    Base58(#[from] bitcoin::base58::Error),

    #[error("bip32 derivation failed: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    #[error("key {0} is not a point on the curve")]
    NotOnCurve(String),
}

/// Serialized length of a BIP-32 extended key payload.
const BIP32_PAYLOAD_LEN: usize = 78;

/// SLIP-132 version bytes. Non-standard versions (ypub/zpub/upub/vpub) are
/// rewritten to the standard xpub/tpub version before decoding, so wallets
/// exporting segwit-flavoured keys still resolve to the same node.
const VERSION_XPUB: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];
const VERSION_YPUB: [u8; 4] = [0x04, 0x9d, 0x7c, 0xb2];
const VERSION_ZPUB: [u8; 4] = [0x04, 0xb2, 0x47, 0x46];
const VERSION_TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xcf];
const VERSION_UPUB: [u8; 4] = [0x04, 0x4a, 0x52, 0x62];
const VERSION_VPUB: [u8; 4] = [0x04, 0x5f, 0x1c, 0xf6];

/// A 33-byte compressed-format public key destined for a witness script.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptKey([u8; 33]);

impl ScriptKey {
    /// Accept exactly 33 bytes with a compressed-point prefix.
    pub fn from_bytes(bytes: [u8; 33]) -> Result<Self, KeyError> {
        if bytes[0] != 0x02 && bytes[0] != 0x03 {
            return Err(KeyError::InvalidKey(format!(
                "compressed key must start with 02 or 03, got {:02x}",
                bytes[0]
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse the 66-character hex form.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(s).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let bytes: [u8; 33] = raw
            .try_into()
            .map_err(|_| KeyError::InvalidKey(format!("expected 33 bytes, got {}", s.len() / 2)))?;
        Self::from_bytes(bytes)
    }

    pub fn from_public_key(key: &bitcoin::PublicKey) -> Result<Self, KeyError> {
        if !key.compressed {
            return Err(KeyError::InvalidKey("uncompressed key".into()));
        }
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&key.to_bytes());
        Self::from_bytes(bytes)
    }

    pub fn to_bytes(self) -> [u8; 33] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Curve-checked view, required for signing and ASM rendering.
    pub fn to_public_key(&self) -> Result<bitcoin::PublicKey, KeyError> {
        bitcoin::PublicKey::from_slice(&self.0).map_err(|_| KeyError::NotOnCurve(self.to_string()))
    }
}

impl fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptKey({})", self)
    }
}

impl FromStr for ScriptKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl MiniscriptKey for ScriptKey {
    type Sha256 = sha256::Hash;
    type Hash256 = miniscript::hash256::Hash;
    type Ripemd160 = ripemd160::Hash;
    type Hash160 = hash160::Hash;
}

impl serde::Serialize for ScriptKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ScriptKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ScriptKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Normalize any supported key material to a [`ScriptKey`].
///
/// Accepts the 33-byte hex form or an extended public key (resolved via
/// [`derive_script_key`]). Anything else is a hard error — the codec never
/// silently substitutes or hashes.
pub fn normalize(key: &str) -> Result<ScriptKey, KeyError> {
    let key = key.trim();
    if is_extended(key) {
        derive_script_key(key)
    } else {
        ScriptKey::from_hex(key)
    }
}

/// Recognize Base58Check strings carrying a 78-byte BIP-32 payload under any
/// SLIP-132 prefix (xpub/ypub/zpub/tpub/upub/vpub, case-insensitive first
/// letter).
pub fn is_extended(key: &str) -> bool {
    let mut chars = key.chars();
    let first = match chars.next() {
        Some(c) => c.to_ascii_lowercase(),
        None => return false,
    };
    if !matches!(first, 'x' | 'y' | 'z' | 't' | 'u' | 'v') {
        return false;
    }
    if !key[1..].starts_with("pub") {
        return false;
    }
    matches!(bitcoin::base58::decode_check(key), Ok(data) if data.len() == BIP32_PAYLOAD_LEN)
}

/// Decode an extended key, rewriting SLIP-132 version bytes to the standard
/// xpub/tpub version so `bitcoin::bip32` accepts segwit-flavoured exports.
fn parse_xpub(key: &str) -> Result<Xpub, KeyError> {
    let mut data = bitcoin::base58::decode_check(key)?;
    if data.len() != BIP32_PAYLOAD_LEN {
        return Err(KeyError::NotExtended(format!(
            "payload is {} bytes, expected {}",
            data.len(),
            BIP32_PAYLOAD_LEN
        )));
    }
    let version: [u8; 4] = data[..4].try_into().expect("length checked");
    let standard = match version {
        VERSION_XPUB | VERSION_TPUB => version,
        VERSION_YPUB | VERSION_ZPUB => VERSION_XPUB,
        VERSION_UPUB | VERSION_VPUB => VERSION_TPUB,
        _ => {
            return Err(KeyError::NotExtended(format!(
                "unknown version bytes {}",
                hex::encode(version)
            )))
        }
    };
    data[..4].copy_from_slice(&standard);
    Ok(Xpub::decode(&data)?)
}

/// Derive the script key: the non-hardened child at `0/0` of the supplied
/// account-level key. Third-party wallets signing a vault output see the
/// same leaf they would see when watching a standard receive chain.
pub fn derive_script_key(xpub: &str) -> Result<ScriptKey, KeyError> {
    let node = parse_xpub(xpub)?;
    let secp = Secp256k1::verification_only();
    let child = node.derive_pub(
        &secp,
        &[
            ChildNumber::Normal { index: 0 },
            ChildNumber::Normal { index: 0 },
        ],
    )?;
    let mut bytes = [0u8; 33];
    bytes.copy_from_slice(&child.public_key.serialize());
    ScriptKey::from_bytes(bytes)
}

/// Fingerprint of the supplied node itself (HASH160 prefix).
///
/// Callers needing a *master* fingerprint for PSBT BIP-32 hints must supply
/// it separately; the engine never fabricates one.
pub fn fingerprint_of(xpub: &str) -> Result<Fingerprint, KeyError> {
    Ok(parse_xpub(xpub)?.fingerprint())
}
