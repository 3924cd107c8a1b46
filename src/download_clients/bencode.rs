//! Just enough bencode to locate the raw `info` dictionary of a torrent.
//!
//! The info hash is the SHA-1 of the exact bytes of that dictionary as they
//! appear in the file, so we slice rather than decode and re-encode.

use sha1::{Digest, Sha1};

/// Compute the lowercase hex info hash of a `.torrent` file.
pub fn info_hash_from_torrent(data: &[u8]) -> Option<String> {
    let info = info_dict_span(data)?;
    let mut hasher = Sha1::new();
    hasher.update(info);
    Some(hex::encode(hasher.finalize()))
}

fn info_dict_span(data: &[u8]) -> Option<&[u8]> {
    if data.first() != Some(&b'd') {
        return None;
    }
    let mut pos = 1;
    while *data.get(pos)? != b'e' {
        let (key_start, key_end) = string_span(data, pos)?;
        let value_start = key_end;
        let value_end = skip_value(data, value_start, 0)?;
        if &data[key_start..key_end] == b"info" {
            if data.get(value_start) != Some(&b'd') {
                return None;
            }
            return Some(&data[value_start..value_end]);
        }
        pos = value_end;
    }
    None
}

/// Returns (payload start, end of string) for a string at `pos`.
fn string_span(data: &[u8], pos: usize) -> Option<(usize, usize)> {
    let colon = pos + data.get(pos..)?.iter().position(|&b| b == b':')?;
    let len: usize = std::str::from_utf8(&data[pos..colon]).ok()?.parse().ok()?;
    let start = colon + 1;
    let end = start.checked_add(len)?;
    if end > data.len() {
        return None;
    }
    Some((start, end))
}

const MAX_DEPTH: usize = 64;

/// Returns the index just past the value starting at `pos`.
fn skip_value(data: &[u8], pos: usize, depth: usize) -> Option<usize> {
    if depth > MAX_DEPTH {
        return None;
    }
    match *data.get(pos)? {
        b'i' => {
            let end = pos + data.get(pos..)?.iter().position(|&b| b == b'e')?;
            Some(end + 1)
        }
        b'l' => {
            let mut cursor = pos + 1;
            while *data.get(cursor)? != b'e' {
                cursor = skip_value(data, cursor, depth + 1)?;
            }
            Some(cursor + 1)
        }
        b'd' => {
            let mut cursor = pos + 1;
            while *data.get(cursor)? != b'e' {
                let (_, key_end) = string_span(data, cursor)?;
                cursor = skip_value(data, key_end, depth + 1)?;
            }
            Some(cursor + 1)
        }
        b'0'..=b'9' => string_span(data, pos).map(|(_, end)| end),
        _ => None,
    }
}
