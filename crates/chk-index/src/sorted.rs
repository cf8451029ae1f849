use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use chk_types::Key;
use memmap2::Mmap;
use tracing::debug;

use crate::bisect::{bisect_multi, Probe};
use crate::error::{IndexError, IndexResult};

const SIGNATURE: &[u8] = b"Sorted Index 1\n";
const OPTION_KEY_ELEMENTS: &[u8] = b"key_elements=";
const OPTION_LEN: &[u8] = b"len=";

/// Builds a sorted index file.
///
/// Layout:
/// ```text
/// Sorted Index 1\n
/// key_elements=<n>\n
/// len=<record count>\n
/// <key components joined by \x00>\x00<value>\n   (one per record, key order)
/// \n
/// ```
#[derive(Debug)]
pub struct SortedIndexBuilder {
    key_elements: usize,
    records: BTreeMap<Key, Vec<u8>>,
}

impl SortedIndexBuilder {
    pub fn new(key_elements: usize) -> Self {
        Self {
            key_elements,
            records: BTreeMap::new(),
        }
    }

    /// Add one record. Keys must have exactly `key_elements` components and
    /// neither keys nor values may contain `\n` or `\x00`.
    pub fn add(&mut self, key: Key, value: impl Into<Vec<u8>>) -> IndexResult<()> {
        let value = value.into();
        if key.width() != self.key_elements {
            return Err(IndexError::InvalidRecord(format!(
                "key {key} has {} elements, index expects {}",
                key.width(),
                self.key_elements
            )));
        }
        let bad = |b: &u8| *b == b'\n' || *b == b'\x00';
        if key.components().iter().any(|c| c.is_empty() || c.iter().any(bad)) {
            return Err(IndexError::InvalidRecord(format!("bad key {key:?}")));
        }
        if value.iter().any(bad) {
            return Err(IndexError::InvalidRecord(format!(
                "value for {key} contains a newline or NUL"
            )));
        }
        if self.records.contains_key(&key) {
            return Err(IndexError::InvalidRecord(format!("duplicate key {key}")));
        }
        self.records.insert(key, value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialise the index.
    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(OPTION_KEY_ELEMENTS);
        out.extend_from_slice(format!("{}\n", self.key_elements).as_bytes());
        out.extend_from_slice(OPTION_LEN);
        out.extend_from_slice(format!("{}\n", self.records.len()).as_bytes());
        for (key, value) in &self.records {
            out.extend_from_slice(&key.serialise());
            out.push(b'\x00');
            out.extend_from_slice(value);
            out.push(b'\n');
        }
        out.push(b'\n');
        out
    }

    /// Serialise the index to `path`.
    pub fn write_to(&self, path: &Path) -> IndexResult<()> {
        std::fs::write(path, self.finish())?;
        Ok(())
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => &map[..],
            Backing::Owned(bytes) => &bytes[..],
        }
    }
}

/// One parsed record and the byte range it occupies.
struct Record {
    key: Key,
    value: Vec<u8>,
    /// Offset one past the record's terminating newline.
    next: usize,
}

/// Read-only view of a sorted index.
///
/// Lookups bisect the record region through [`bisect_multi`], parsing only
/// the records under each probe, so large index files are never read in
/// full unless a caller asks for a large share of the keys.
pub struct SortedIndex {
    data: Backing,
    key_elements: usize,
    key_count: usize,
    /// First byte of the first record.
    data_start: usize,
    /// Offset of the terminating blank line.
    data_end: usize,
}

impl SortedIndex {
    /// Memory-map an index file.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let file = File::open(path)?;
        // SAFETY: index files are immutable once written; the mapping is
        // read-only and never outlives `self`.
        let map = unsafe { Mmap::map(&file) }?;
        Self::from_backing(Backing::Mapped(map))
    }

    /// Wrap an in-memory index.
    pub fn from_bytes(data: Vec<u8>) -> IndexResult<Self> {
        Self::from_backing(Backing::Owned(data))
    }

    fn from_backing(data: Backing) -> IndexResult<Self> {
        if !data.starts_with(SIGNATURE) {
            let shown = &data[..data.len().min(SIGNATURE.len())];
            return Err(IndexError::BadSignature(
                String::from_utf8_lossy(shown).into_owned(),
            ));
        }
        let mut pos = SIGNATURE.len();
        let key_elements = read_option(&data, &mut pos, OPTION_KEY_ELEMENTS)?;
        let key_count = read_option(&data, &mut pos, OPTION_LEN)?;
        if data.len() <= pos || data[data.len() - 1] != b'\n' {
            return Err(IndexError::Corrupt {
                offset: data.len() as u64,
                reason: "missing terminating newline".into(),
            });
        }
        let data_end = data.len() - 1;
        if data_end < pos || (data_end > pos && data[data_end - 1] != b'\n') {
            return Err(IndexError::Corrupt {
                offset: data_end as u64,
                reason: "truncated final record".into(),
            });
        }
        Ok(Self {
            data,
            key_elements,
            key_count,
            data_start: pos,
            data_end,
        })
    }

    /// Number of records, as declared by the header.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn key_elements(&self) -> usize {
        self.key_elements
    }

    /// Total addressable size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Look up `keys`, returning the `(key, value)` pairs that are present.
    ///
    /// When more than a twentieth of the index is requested the whole
    /// record region is parsed once instead of bisecting.
    pub fn iter_entries(&self, keys: &[Key]) -> IndexResult<Vec<(Key, Vec<u8>)>> {
        let wanted: BTreeSet<Key> = keys.iter().cloned().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        if wanted.len() * 20 > self.key_count {
            let all: BTreeMap<Key, Vec<u8>> = self.iter_all_entries()?.into_iter().collect();
            return Ok(wanted
                .into_iter()
                .filter_map(|key| all.get(&key).cloned().map(|value| (key, value)))
                .collect());
        }
        let mut rounds = 0usize;
        let found = bisect_multi(
            |batch: Vec<(i64, Key)>| {
                rounds += 1;
                batch
                    .into_iter()
                    .map(|(offset, key)| {
                        let probe = self.probe(offset, &key)?;
                        Ok::<_, IndexError>(((offset, key), probe))
                    })
                    .collect::<IndexResult<Vec<_>>>()
            },
            self.size(),
            wanted,
        )?;
        debug!(rounds, requested = keys.len(), found = found.len(), "index bisect");
        Ok(found)
    }

    /// Parse every record in key order.
    pub fn iter_all_entries(&self) -> IndexResult<Vec<(Key, Vec<u8>)>> {
        let mut out = Vec::with_capacity(self.key_count);
        let mut pos = self.data_start;
        while pos < self.data_end {
            let record = self.parse_record(pos)?;
            pos = record.next;
            out.push((record.key, record.value));
        }
        if out.len() != self.key_count {
            return Err(IndexError::Corrupt {
                offset: self.data_start as u64,
                reason: format!("header declares {} records, found {}", self.key_count, out.len()),
            });
        }
        Ok(out)
    }

    /// Classify `key` against the record containing byte `offset`.
    fn probe(&self, offset: i64, key: &Key) -> IndexResult<Probe<Vec<u8>>> {
        if self.data_start >= self.data_end {
            return Ok(Probe::Absent);
        }
        let location = (offset.max(0) as usize).clamp(self.data_start, self.data_end - 1);
        let start = self.data[self.data_start..location]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(self.data_start, |p| self.data_start + p + 1);
        let record = self.parse_record(start)?;
        if record.key == *key {
            return Ok(Probe::Found(record.value));
        }
        if *key < record.key {
            return Ok(if start == self.data_start {
                Probe::Absent
            } else {
                Probe::TooEarly
            });
        }
        if record.next >= self.data_end {
            return Ok(Probe::Absent);
        }
        let following = self.parse_record(record.next)?;
        Ok(if *key < following.key {
            Probe::Absent
        } else if *key == following.key {
            Probe::Found(following.value)
        } else {
            Probe::TooLate
        })
    }

    fn parse_record(&self, start: usize) -> IndexResult<Record> {
        let region = &self.data[start..self.data_end];
        let len = region
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| IndexError::Corrupt {
                offset: start as u64,
                reason: "unterminated record".into(),
            })?;
        let line = &region[..len];
        let split = line
            .iter()
            .rposition(|&b| b == b'\x00')
            .ok_or_else(|| IndexError::Corrupt {
                offset: start as u64,
                reason: "record has no value separator".into(),
            })?;
        let key = Key::from_serialised(&line[..split]);
        if key.width() != self.key_elements {
            return Err(IndexError::Corrupt {
                offset: start as u64,
                reason: format!("key has {} elements, expected {}", key.width(), self.key_elements),
            });
        }
        Ok(Record {
            key,
            value: line[split + 1..].to_vec(),
            next: start + len + 1,
        })
    }
}

impl std::fmt::Debug for SortedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedIndex")
            .field("key_elements", &self.key_elements)
            .field("key_count", &self.key_count)
            .field("size", &self.data.len())
            .finish()
    }
}

fn read_option(data: &[u8], pos: &mut usize, name: &[u8]) -> IndexResult<usize> {
    let rest = &data[*pos..];
    let bad = |reason: String| IndexError::Corrupt {
        offset: *pos as u64,
        reason,
    };
    let body = rest
        .strip_prefix(name)
        .ok_or_else(|| bad(format!("expected option {:?}", String::from_utf8_lossy(name))))?;
    let len = body
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| bad("unterminated option line".into()))?;
    let digits = &body[..len];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(bad(format!("non-numeric option value {:?}", String::from_utf8_lossy(digits))));
    }
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| bad("option value out of range".into()))?;
    *pos += name.len() + len + 1;
    Ok(value)
}
