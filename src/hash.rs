//! SHA1 identities for loose objects.

use std::fmt;

use sha1::{Digest, Sha1 as Sha1Hasher};

use crate::{Error, Result};

/// A 20-byte object identity, kept raw. The 40-char lowercase hex form is
/// derived on demand; the two forms are mutual inverses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha1([u8; 20]);

impl Sha1 {
    /// Digests an uncompressed object envelope into its identity.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha1Hasher::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// # Returns
    /// - `Err` if `raw` is not exactly 20 bytes.
    /// - `Ok` otherwise.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        Ok(Self(raw.try_into().map_err(|_| Error::CorruptObject {
            hash: hex::encode(raw),
            reason: format!("hash is {} bytes, want 20", raw.len()),
        })?))
    }

    /// # Returns
    /// - `Err` if `s` is not a 40-char hex string.
    /// - `Ok` otherwise.
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|_| Error::CorruptObject {
            hash: s.to_string(),
            reason: "not a hex string".to_string(),
        })?;
        Self::from_raw(&raw)
    }

    #[inline]
    pub fn raw(&self) -> &[u8; 20] {
        &self.0
    }

    #[inline]
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1({})", self.hex())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::Error;

    #[test]
    fn digest_known_value() {
        // sha1("hello world"), straight out of `echo -n 'hello world' | sha1sum`.
        assert_eq!(
            Sha1::digest(b"hello world").hex(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[test]
    fn hex_round_trip() {
        let sha1 = Sha1::digest(b"round trip");
        assert_eq!(Sha1::from_hex(&sha1.hex()).unwrap(), sha1);
        assert_eq!(Sha1::from_raw(sha1.raw()).unwrap(), sha1);
    }

    #[test]
    fn rejects_bad_input() {
        assert_matches!(Sha1::from_hex("zz"), Err(Error::CorruptObject { .. }));
        assert_matches!(Sha1::from_hex("abcd"), Err(Error::CorruptObject { .. }));
        assert_matches!(Sha1::from_raw(&[0u8; 19]), Err(Error::CorruptObject { .. }));
    }
}
