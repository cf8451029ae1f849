//! Byte format of stored nodes.
//!
//! Leaf:
//!
//! ```text
//! chkleaf:\n
//! <maximum_size>\n<key_width>\n<item count>\n<common serialised prefix>\n
//! <key suffix>\x00<value line count>\n<value lines...>   (per entry)
//! ```
//!
//! Internal:
//!
//! ```text
//! chknode:\n
//! <maximum_size>\n<key_width>\n<entry count>\n<search prefix>\n
//! <slot suffix>\x00sha1:<hex>\n                          (per child)
//! ```
//!
//! Key and slot suffixes have the common prefix stripped. Entries and
//! children are written in sorted order, so equal trees always serialise to
//! equal bytes. Parsing is strict: any deviation is [`ChkError::Malformed`].

use std::collections::BTreeMap;

use chk_types::{ContentKey, Key};

use crate::error::{ChkError, ChkResult};
use crate::node::{value_line_count, ChildRef, InternalNode, LeafNode, Node, NodeParams};
use crate::search_key::SearchKeyFormat;

pub const LEAF_HEADER: &[u8] = b"chkleaf:\n";
pub const INTERNAL_HEADER: &[u8] = b"chknode:\n";

/// Serialise a node. Internal nodes must only reference saved children.
pub fn serialise(node: &Node) -> ChkResult<Vec<u8>> {
    match node {
        Node::Leaf(leaf) => Ok(serialise_leaf(leaf)),
        Node::Internal(internal) => serialise_internal(internal),
    }
}

fn write_header(out: &mut Vec<u8>, header: &[u8], params: NodeParams, len: usize) {
    out.extend_from_slice(header);
    out.extend_from_slice(format!("{}\n{}\n{}\n", params.maximum_size, params.key_width, len).as_bytes());
}

fn serialise_leaf(leaf: &LeafNode) -> Vec<u8> {
    let mut out = Vec::with_capacity(leaf.current_size());
    write_header(&mut out, LEAF_HEADER, leaf.params(), leaf.len());
    let prefix = leaf.common_serialised_prefix().unwrap_or_default();
    out.extend_from_slice(prefix);
    out.push(b'\n');
    for (key, value) in leaf.items() {
        let serialised = key.serialise();
        out.extend_from_slice(&serialised[prefix.len()..]);
        out.push(b'\x00');
        out.extend_from_slice(value_line_count(value).to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(value);
        out.push(b'\n');
    }
    debug_assert_eq!(out.len(), leaf.current_size());
    out
}

fn serialise_internal(internal: &InternalNode) -> ChkResult<Vec<u8>> {
    let mut out = Vec::new();
    write_header(&mut out, INTERNAL_HEADER, internal.params(), internal.len());
    let prefix = internal.search_prefix();
    out.extend_from_slice(prefix);
    out.push(b'\n');
    for (slot, child) in internal.children() {
        let key = child.key().ok_or_else(|| {
            ChkError::malformed(None, "internal node references an unsaved child")
        })?;
        out.extend_from_slice(&slot[prefix.len()..]);
        out.push(b'\x00');
        out.extend_from_slice(&key.to_ref_bytes());
        out.push(b'\n');
    }
    Ok(out)
}

/// Parse stored node bytes. `key` is only used to label errors.
pub fn deserialise(
    data: &[u8],
    key: Option<ContentKey>,
    format: SearchKeyFormat,
) -> ChkResult<Node> {
    if data.starts_with(LEAF_HEADER) {
        deserialise_leaf(data, key, format).map(Node::Leaf)
    } else if data.starts_with(INTERNAL_HEADER) {
        deserialise_internal(data, key, format).map(Node::Internal)
    } else {
        Err(ChkError::malformed(key, "unknown node header"))
    }
}

/// Split into lines, requiring the data to end with a newline.
fn lines(data: &[u8], key: Option<ContentKey>) -> ChkResult<Vec<&[u8]>> {
    let Some(body) = data.strip_suffix(b"\n") else {
        return Err(ChkError::malformed(key, "missing final newline"));
    };
    Ok(body.split(|&b| b == b'\n').collect())
}

fn parse_number(line: Option<&&[u8]>, field: &str, key: Option<ContentKey>) -> ChkResult<usize> {
    let line = line.ok_or_else(|| ChkError::malformed(key, format!("truncated before {field}")))?;
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(ChkError::malformed(
            key,
            format!("{field} is not a number: {:?}", String::from_utf8_lossy(line)),
        ));
    }
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ChkError::malformed(key, format!("{field} out of range")))
}

struct Header<'a> {
    params: NodeParams,
    len: usize,
    prefix: &'a [u8],
}

fn parse_header<'a>(
    lines: &[&'a [u8]],
    key: Option<ContentKey>,
    format: SearchKeyFormat,
) -> ChkResult<Header<'a>> {
    let maximum_size = parse_number(lines.get(1), "maximum size", key)?;
    let key_width = parse_number(lines.get(2), "key width", key)?;
    let len = parse_number(lines.get(3), "length", key)?;
    if key_width == 0 {
        return Err(ChkError::malformed(key, "key width is zero"));
    }
    let prefix = lines
        .get(4)
        .copied()
        .ok_or_else(|| ChkError::malformed(key, "truncated before prefix"))?;
    Ok(Header {
        params: NodeParams {
            maximum_size,
            key_width,
            format,
        },
        len,
        prefix,
    })
}

fn deserialise_leaf(
    data: &[u8],
    key: Option<ContentKey>,
    format: SearchKeyFormat,
) -> ChkResult<LeafNode> {
    let lines = lines(data, key)?;
    if lines[0] != &LEAF_HEADER[..LEAF_HEADER.len() - 1] {
        return Err(ChkError::malformed(key, "not a leaf node"));
    }
    let header = parse_header(&lines, key, format)?;
    let width = header.params.key_width;

    let mut items = BTreeMap::new();
    let mut previous: Option<Key> = None;
    let mut pos = 5;
    while pos < lines.len() {
        let mut entry = header.prefix.to_vec();
        entry.extend_from_slice(lines[pos]);
        pos += 1;
        let split = entry
            .iter()
            .rposition(|&b| b == b'\x00')
            .ok_or_else(|| ChkError::malformed(key, "entry without value line count"))?;
        let line_count = parse_number(Some(&&entry[split + 1..]), "value line count", key)?;
        if line_count == 0 {
            return Err(ChkError::malformed(key, "entry with zero value lines"));
        }
        let entry_key = Key::from_serialised(&entry[..split]);
        if entry_key.width() != width {
            return Err(ChkError::malformed(
                key,
                format!("entry key has {} elements, expected {width}", entry_key.width()),
            ));
        }
        if pos + line_count > lines.len() {
            return Err(ChkError::malformed(key, "truncated value"));
        }
        let value = lines[pos..pos + line_count].join(&b'\n');
        pos += line_count;
        if previous.as_ref().is_some_and(|p| *p >= entry_key) {
            return Err(ChkError::malformed(key, "entries out of order"));
        }
        previous = Some(entry_key.clone());
        items.insert(entry_key, value);
    }
    if items.len() != header.len {
        return Err(ChkError::malformed(
            key,
            format!("header says {} items, found {}", header.len, items.len()),
        ));
    }
    Ok(LeafNode::from_items(header.params, items))
}

fn deserialise_internal(
    data: &[u8],
    key: Option<ContentKey>,
    format: SearchKeyFormat,
) -> ChkResult<InternalNode> {
    let lines = lines(data, key)?;
    if lines[0] != &INTERNAL_HEADER[..INTERNAL_HEADER.len() - 1] {
        return Err(ChkError::malformed(key, "not an internal node"));
    }
    let header = parse_header(&lines, key, format)?;
    let width = header.prefix.len() + 1;

    let mut children = BTreeMap::new();
    for line in &lines[5..] {
        let mut entry = header.prefix.to_vec();
        entry.extend_from_slice(line);
        let split = entry
            .iter()
            .rposition(|&b| b == b'\x00')
            .ok_or_else(|| ChkError::malformed(key, "child without reference"))?;
        let slot = entry[..split].to_vec();
        if slot.len() != width {
            return Err(ChkError::malformed(
                key,
                format!("child prefix has width {}, expected {width}", slot.len()),
            ));
        }
        let child = ContentKey::parse(&entry[split + 1..])
            .map_err(|e| ChkError::malformed(key, format!("bad child reference: {e}")))?;
        if children.insert(slot, ChildRef::Stored(child)).is_some() {
            return Err(ChkError::malformed(key, "duplicate child prefix"));
        }
    }
    if children.is_empty() {
        return Err(ChkError::malformed(key, "internal node without children"));
    }
    Ok(InternalNode::from_parts(
        header.prefix.to_vec(),
        header.params,
        header.len,
        children,
    ))
}
