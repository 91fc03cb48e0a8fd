//! Asset-ID Codec (C8, spec §4.8).
//!
//! Two families:
//!
//! - **Timestamp-prefixed** (photos, episodes, comments, activities):
//!   `<prefix><b64hex(timestamp_seconds, 5 bytes)><b64hex(device_id)><b64hex(local_id)>`,
//!   with a `reverse_ts` variant (used for photos) that reverses the
//!   timestamp bytes so ids sort newest-first.
//! - **Device/local** (operations, viewpoints):
//!   `<prefix>-<b64hex(device_id)>-<b64hex(local_id)>`.
//!
//! The base64hex alphabet and algorithm are grounded on
//! `backend/base/base64hex.py`: standard base64, but with the translated
//! alphabet `-0-9A-Z_a-z` so the encoding is order-preserving over the
//! underlying byte string.
//!
//! Post ids are a supplemental third family (§10.6): not a fifth asset-id
//! kind but `episode_id[1:] + "+" + photo_id[1:]`, grounded on
//! `backend/db/post.py::ConstructPostId`/`DeconstructPostId`.

use crate::errors::VfError;

/// Order-preserving base64 alphabet: `-`, then `0-9`, then `A-Z`, then `_`,
/// then `a-z`. Sorted identically to the underlying bytes it encodes.
const ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

fn decode_table() -> [i8; 256] {
    let mut table = [-1i8; 256];
    for (i, &c) in ALPHABET.iter().enumerate() {
        table[c as usize] = i as i8;
    }
    table
}

/// Encodes `bytes` using the order-preserving base64hex alphabet, with `=`
/// padding to a multiple of 4 characters.
pub fn b64hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        let c0 = ALPHABET[((n >> 18) & 0x3f) as usize];
        let c1 = ALPHABET[((n >> 12) & 0x3f) as usize];
        let c2 = ALPHABET[((n >> 6) & 0x3f) as usize];
        let c3 = ALPHABET[(n & 0x3f) as usize];
        out.push(c0 as char);
        out.push(c1 as char);
        match chunk.len() {
            1 => {
                out.push('=');
                out.push('=');
            }
            2 => {
                out.push(c2 as char);
                out.push('=');
            }
            _ => {
                out.push(c2 as char);
                out.push(c3 as char);
            }
        }
    }
    out
}

/// Decodes a base64hex string back to bytes. Accepts both padded and
/// unpadded input (unpadded is what asset ids use in practice, since `=`
/// would collide with nothing in the alphabet but is still reserved).
pub fn b64hex_decode(s: &str) -> Result<Vec<u8>, VfError> {
    let table = decode_table();
    let stripped = s.trim_end_matches('=');
    if !stripped.bytes().all(|b| table[b as usize] >= 0) {
        return Err(VfError::invalid_request(
            "INVALID_BASE64HEX",
            format!("invalid base64hex characters in {s:?}"),
        ));
    }
    let mut out = Vec::with_capacity(stripped.len() * 3 / 4 + 1);
    let bytes: Vec<u8> = stripped.bytes().collect();
    for chunk in bytes.chunks(4) {
        let vals: Vec<u32> = chunk.iter().map(|&b| table[b as usize] as u32).collect();
        match vals.len() {
            4 => {
                let n = (vals[0] << 18) | (vals[1] << 12) | (vals[2] << 6) | vals[3];
                out.push((n >> 16) as u8);
                out.push((n >> 8) as u8);
                out.push(n as u8);
            }
            3 => {
                let n = (vals[0] << 18) | (vals[1] << 12) | (vals[2] << 6);
                out.push((n >> 16) as u8);
                out.push((n >> 8) as u8);
            }
            2 => {
                let n = (vals[0] << 18) | (vals[1] << 12);
                out.push((n >> 16) as u8);
            }
            _ => {
                return Err(VfError::invalid_request(
                    "INVALID_BASE64HEX",
                    "truncated base64hex group",
                ))
            }
        }
    }
    Ok(out)
}

/// Stable one-character prefixes for each timestamp-prefixed and
/// device/local asset kind, mirroring `asset_id.py::IdPrefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Photo,
    Episode,
    Comment,
    Activity,
    Operation,
    Viewpoint,
}

impl IdPrefix {
    pub fn as_char(self) -> char {
        match self {
            IdPrefix::Photo => 'p',
            IdPrefix::Episode => 'e',
            IdPrefix::Comment => 'c',
            IdPrefix::Activity => 'a',
            IdPrefix::Operation => 'o',
            IdPrefix::Viewpoint => 'v',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'p' => Some(IdPrefix::Photo),
            'e' => Some(IdPrefix::Episode),
            'c' => Some(IdPrefix::Comment),
            'a' => Some(IdPrefix::Activity),
            'o' => Some(IdPrefix::Operation),
            'v' => Some(IdPrefix::Viewpoint),
            _ => None,
        }
    }
}

/// `local_id` is either a plain integer, or an integer paired with a
/// caller-chosen uniquifier string (used by comments to fold in a
/// client-generated tag alongside the counter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalId {
    Int(u64),
    Tagged(u64, String),
}

/// Minimal-length big-endian encoding of `v`, prefixed with a length byte
/// so that both same-length and cross-length values compare correctly
/// byte-for-byte (and therefore under base64hex, which preserves byte
/// ordering).
fn encode_ordered_u64(v: u64) -> Vec<u8> {
    let be = v.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(7);
    let trimmed = &be[first_nonzero..];
    let mut out = Vec::with_capacity(1 + trimmed.len());
    out.push(0x80 | (trimmed.len() as u8));
    out.extend_from_slice(trimmed);
    out
}

fn decode_ordered_u64(buf: &[u8]) -> Result<(u64, usize), VfError> {
    let Some(&len_byte) = buf.first() else {
        return Err(VfError::invalid_request("INVALID_ASSET_ID", "empty varint"));
    };
    let n = (len_byte & 0x7f) as usize;
    if buf.len() < 1 + n || n > 8 {
        return Err(VfError::invalid_request("INVALID_ASSET_ID", "truncated varint"));
    }
    let mut v: u64 = 0;
    for &b in &buf[1..1 + n] {
        v = (v << 8) | b as u64;
    }
    Ok((v, 1 + n))
}

fn encode_local_id(local_id: &LocalId) -> Vec<u8> {
    match local_id {
        LocalId::Int(n) => {
            let mut out = vec![0u8];
            out.extend(encode_ordered_u64(*n));
            out
        }
        LocalId::Tagged(n, tag) => {
            let mut out = vec![1u8];
            out.extend(encode_ordered_u64(*n));
            out.extend(tag.as_bytes());
            out
        }
    }
}

fn decode_local_id(buf: &[u8]) -> Result<LocalId, VfError> {
    let Some((&tag_byte, rest)) = buf.split_first() else {
        return Err(VfError::invalid_request("INVALID_ASSET_ID", "empty local id"));
    };
    let (n, used) = decode_ordered_u64(rest)?;
    match tag_byte {
        0 => Ok(LocalId::Int(n)),
        1 => {
            let tag = String::from_utf8(rest[used..].to_vec())
                .map_err(|_| VfError::invalid_request("INVALID_ASSET_ID", "non-utf8 local id tag"))?;
            Ok(LocalId::Tagged(n, tag))
        }
        _ => Err(VfError::invalid_request("INVALID_ASSET_ID", "unknown local id tag")),
    }
}

/// Encodes a timestamp-prefixed asset id. `timestamp_seconds` is packed
/// into 5 bytes (enough until year 36812), reversed when `reverse_ts` is
/// set so lexicographic (and therefore base64hex) order runs newest-first.
pub fn construct_timestamp_asset_id(
    prefix: IdPrefix,
    timestamp_seconds: u64,
    device_id: u64,
    local_id: &LocalId,
    reverse_ts: bool,
) -> String {
    let mut ts_bytes = timestamp_seconds.to_be_bytes()[3..].to_vec(); // low 5 bytes
    if reverse_ts {
        ts_bytes.reverse();
    }
    let device_bytes = encode_ordered_u64(device_id);
    let local_bytes = encode_local_id(local_id);

    let mut payload = Vec::with_capacity(ts_bytes.len() + device_bytes.len() + local_bytes.len());
    payload.extend(ts_bytes);
    payload.extend(device_bytes);
    payload.extend(local_bytes);

    format!("{}{}", prefix.as_char(), b64hex_encode(&payload))
}

pub struct TimestampAssetId {
    pub timestamp_seconds: u64,
    pub device_id: u64,
    pub local_id: LocalId,
}

pub fn deconstruct_timestamp_asset_id(
    expected_prefix: IdPrefix,
    asset_id: &str,
    reverse_ts: bool,
) -> Result<TimestampAssetId, VfError> {
    let mut chars = asset_id.chars();
    let prefix_char = chars
        .next()
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "empty asset id"))?;
    if IdPrefix::from_char(prefix_char) != Some(expected_prefix) {
        return Err(VfError::invalid_request(
            "INVALID_ASSET_ID",
            format!("asset id {asset_id:?} has wrong prefix for {expected_prefix:?}"),
        ));
    }
    let payload = b64hex_decode(chars.as_str())?;
    if payload.len() < 5 {
        return Err(VfError::invalid_request("INVALID_ASSET_ID", "truncated timestamp asset id"));
    }
    let mut ts_bytes = payload[0..5].to_vec();
    if reverse_ts {
        ts_bytes.reverse();
    }
    let mut full_ts = [0u8; 8];
    full_ts[3..].copy_from_slice(&ts_bytes);
    let timestamp_seconds = u64::from_be_bytes(full_ts);

    let (device_id, used) = decode_ordered_u64(&payload[5..])?;
    let local_id = decode_local_id(&payload[5 + used..])?;

    Ok(TimestampAssetId { timestamp_seconds, device_id, local_id })
}

/// Encodes a device/local asset id: `<prefix>-<b64hex(device_id)>-<b64hex(local_id)>`.
/// Used for operation ids (`o-...`) and viewpoint ids (`v-...`).
pub fn construct_device_local_asset_id(prefix: IdPrefix, device_id: u64, local_id: u64) -> String {
    format!(
        "{}-{}-{}",
        prefix.as_char(),
        b64hex_encode(&encode_ordered_u64(device_id)),
        b64hex_encode(&encode_ordered_u64(local_id)),
    )
}

pub struct DeviceLocalAssetId {
    pub device_id: u64,
    pub local_id: u64,
}

pub fn deconstruct_device_local_asset_id(
    expected_prefix: IdPrefix,
    asset_id: &str,
) -> Result<DeviceLocalAssetId, VfError> {
    let mut parts = asset_id.splitn(3, '-');
    let prefix_part = parts
        .next()
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "empty asset id"))?;
    let mut prefix_chars = prefix_part.chars();
    let prefix_char = prefix_chars
        .next()
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "missing prefix"))?;
    if prefix_chars.next().is_some() || IdPrefix::from_char(prefix_char) != Some(expected_prefix) {
        return Err(VfError::invalid_request(
            "INVALID_ASSET_ID",
            format!("asset id {asset_id:?} has wrong prefix for {expected_prefix:?}"),
        ));
    }
    let device_part = parts
        .next()
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "missing device segment"))?;
    let local_part = parts
        .next()
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "missing local segment"))?;
    let (device_id, _) = decode_ordered_u64(&b64hex_decode(device_part)?)?;
    let (local_id, _) = decode_ordered_u64(&b64hex_decode(local_part)?)?;
    Ok(DeviceLocalAssetId { device_id, local_id })
}

/// Builds a Post id from an episode id and photo id (§10.6). `+` sorts
/// below every character in the base64hex alphabet, so a Post id still
/// sorts chronologically by its episode prefix. The first character of
/// each component (its `IdPrefix` letter) is dropped before joining, per
/// `ConstructPostId`, then restored on deconstruction.
pub fn construct_post_id(episode_id: &str, photo_id: &str) -> Result<String, VfError> {
    if episode_id.is_empty() || photo_id.is_empty() {
        return Err(VfError::invalid_request("INVALID_ASSET_ID", "empty episode or photo id"));
    }
    Ok(format!("{}+{}", &episode_id[1..], &photo_id[1..]))
}

pub fn deconstruct_post_id(post_id: &str) -> Result<(String, String), VfError> {
    let (episode_rest, photo_rest) = post_id
        .split_once('+')
        .ok_or_else(|| VfError::invalid_request("INVALID_ASSET_ID", "post id missing '+' separator"))?;
    Ok((
        format!("{}{}", IdPrefix::Episode.as_char(), episode_rest),
        format!("{}{}", IdPrefix::Photo.as_char(), photo_rest),
    ))
}
