use std::fmt;
use std::str::FromStr;

use chk_types::Key;
use serde::{Deserialize, Serialize};

use crate::error::ChkError;

/// How keys are turned into the byte strings internal nodes route on.
///
/// The format is part of a map's identity: nodes written under one format
/// route keys differently from another, so a map must always be reopened
/// with the format it was built with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchKeyFormat {
    /// Key components joined with `\x00`.
    #[default]
    #[serde(rename = "plain")]
    Plain,
    /// CRC32 of each component as 8 uppercase hex digits, joined with `\x00`.
    #[serde(rename = "hash-16-way")]
    Hash16,
    /// Big-endian CRC32 bytes of each component, joined with `\x00`, with
    /// any `\n` byte replaced by `_`.
    #[serde(rename = "hash-255-way")]
    Hash255,
}

impl SearchKeyFormat {
    /// Derive the search key for `key`.
    pub fn search_key(self, key: &Key) -> Vec<u8> {
        match self {
            SearchKeyFormat::Plain => search_key_plain(key),
            SearchKeyFormat::Hash16 => search_key_16(key),
            SearchKeyFormat::Hash255 => search_key_255(key),
        }
    }

    /// The stable name stored alongside a map's root.
    pub fn name(self) -> &'static str {
        match self {
            SearchKeyFormat::Plain => "plain",
            SearchKeyFormat::Hash16 => "hash-16-way",
            SearchKeyFormat::Hash255 => "hash-255-way",
        }
    }
}

impl fmt::Display for SearchKeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SearchKeyFormat {
    type Err = ChkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(SearchKeyFormat::Plain),
            "hash-16-way" => Ok(SearchKeyFormat::Hash16),
            "hash-255-way" => Ok(SearchKeyFormat::Hash255),
            other => Err(ChkError::InvalidConfig(format!(
                "unknown search key format {other:?}"
            ))),
        }
    }
}

pub fn search_key_plain(key: &Key) -> Vec<u8> {
    key.serialise()
}

pub fn search_key_16(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.width() * 9);
    for (i, component) in key.components().iter().enumerate() {
        if i > 0 {
            out.push(b'\x00');
        }
        out.extend_from_slice(format!("{:08X}", crc32fast::hash(component)).as_bytes());
    }
    out
}

pub fn search_key_255(key: &Key) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.width() * 5);
    for (i, component) in key.components().iter().enumerate() {
        if i > 0 {
            out.push(b'\x00');
        }
        out.extend_from_slice(&crc32fast::hash(component).to_be_bytes());
    }
    for byte in &mut out {
        if *byte == b'\n' {
            *byte = b'_';
        }
    }
    out
}
