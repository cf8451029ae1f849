use std::fmt;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::TypeError;

const SCHEME: &[u8] = b"sha1:";

/// Content-addressed identifier for a stored node or blob.
///
/// A `ContentKey` is the SHA-1 digest of the exact serialised bytes it
/// names. It renders as `sha1:<40 lowercase hex digits>`, which is also the
/// form written into internal CHK nodes to reference their children.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey([u8; 20]);

impl ContentKey {
    /// Compute the key for a byte string.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(Sha1::digest(data).into())
    }

    /// The raw 20-byte digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex-encoded digest without the scheme.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// The `sha1:<hex>` form as bytes, as written into serialised nodes.
    pub fn to_ref_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SCHEME.len() + 40);
        out.extend_from_slice(SCHEME);
        out.extend_from_slice(self.to_hex().as_bytes());
        out
    }

    /// Parse the `sha1:<hex>` form.
    pub fn parse(data: &[u8]) -> Result<Self, TypeError> {
        let hex_part = data
            .strip_prefix(SCHEME)
            .ok_or_else(|| TypeError::MissingScheme(String::from_utf8_lossy(data).into_owned()))?;
        if hex_part.len() != 40 {
            return Err(TypeError::InvalidLength {
                expected: 40,
                actual: hex_part.len(),
            });
        }
        let bytes = hex::decode(hex_part).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns `true` if `data` hashes to this key.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::for_bytes(data) == *self
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey(sha1:{})", self.short_hex())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha1:{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentKey {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s.as_bytes())
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.to_string()
    }
}
