use std::fmt;

/// A key stored in a CHK map: a tuple of opaque byte strings.
///
/// Keys order element-wise, which is also the order entries are written
/// in a serialised leaf. A map fixes the number of components per key (its
/// key width); filters may use shorter tuples as prefixes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<Vec<u8>>);

impl Key {
    /// Build a key from its components.
    pub fn new(components: Vec<Vec<u8>>) -> Self {
        Self(components)
    }

    /// Single-component key.
    pub fn single(component: impl AsRef<[u8]>) -> Self {
        Self(vec![component.as_ref().to_vec()])
    }

    /// Number of components.
    pub fn width(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[Vec<u8>] {
        &self.0
    }

    /// Components joined with `\x00`.
    pub fn serialise(&self) -> Vec<u8> {
        self.0.join(&b'\x00')
    }

    /// Split a `\x00`-joined byte string back into components.
    pub fn from_serialised(data: &[u8]) -> Self {
        Self(data.split(|&b| b == b'\x00').map(|c| c.to_vec()).collect())
    }

    /// Returns `true` if `prefix`'s components are the leading components of
    /// this key.
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::single(s)
    }
}

impl From<&[u8]> for Key {
    fn from(s: &[u8]) -> Self {
        Self::single(s)
    }
}

impl From<Vec<Vec<u8>>> for Key {
    fn from(components: Vec<Vec<u8>>) -> Self {
        Self(components)
    }
}

impl<const N: usize> From<[&str; N]> for Key {
    fn from(parts: [&str; N]) -> Self {
        Self(parts.iter().map(|p| p.as_bytes().to_vec()).collect())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.0.iter().map(|c| String::from_utf8_lossy(c)).collect();
        write!(f, "Key({parts:?})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&String::from_utf8_lossy(component))?;
        }
        Ok(())
    }
}
