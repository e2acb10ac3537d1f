//! Multi-part clipboard payload blobs.
//!
//! A blob is a concatenation of parts, each laid out as
//!
//! ```text
//! <mime>\n<hex byte length>\n<data>\n
//! ```
//!
//! The explicit length lets `data` carry newlines or arbitrary binary. This is
//! the body the clipboard endpoint expects in its `file` form field.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{CoreError, MAX_MIME_LEN, MIME_TEXT_PLAIN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub mime: String,
    pub data: Bytes,
}

impl PayloadPart {
    pub fn new(mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime: mime.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadBlob {
    parts: Vec<PayloadPart>,
}

impl PayloadBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<PayloadPart>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, mime: impl Into<String>, data: impl Into<Bytes>) {
        self.parts.push(PayloadPart::new(mime, data));
    }

    pub fn parts(&self) -> &[PayloadPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<PayloadPart> {
        self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// First part whose MIME matches, with `"text"` treated as `text/plain`.
    pub fn get(&self, mime: &str) -> Option<&PayloadPart> {
        let wanted = normalize_mime(mime);
        self.parts
            .iter()
            .find(|part| normalize_mime(&part.mime) == wanted)
    }

    pub fn encode(&self) -> Result<Bytes, CoreError> {
        encode_payload(&self.parts)
    }

    pub fn decode(blob: Bytes) -> Result<Self, CoreError> {
        decode_payload(blob).map(Self::from_parts)
    }
}

pub fn normalize_mime(mime: &str) -> &str {
    if mime == "text" { MIME_TEXT_PLAIN } else { mime }
}

pub fn encode_payload(parts: &[PayloadPart]) -> Result<Bytes, CoreError> {
    let mut capacity = 0usize;
    for part in parts {
        let mime = normalize_mime(&part.mime);
        if mime.is_empty() || mime.len() > MAX_MIME_LEN || mime.contains('\n') {
            return Err(CoreError::InvalidMime);
        }
        // mime, two newlines, up to 16 hex digits, data, trailing newline
        capacity += mime.len() + 2 + 16 + part.data.len() + 1;
    }

    let mut out = BytesMut::with_capacity(capacity);
    for part in parts {
        out.put_slice(normalize_mime(&part.mime).as_bytes());
        out.put_u8(b'\n');
        out.put_slice(format!("{:x}", part.data.len()).as_bytes());
        out.put_u8(b'\n');
        out.put_slice(&part.data);
        out.put_u8(b'\n');
    }
    Ok(out.freeze())
}

pub fn decode_payload(blob: Bytes) -> Result<Vec<PayloadPart>, CoreError> {
    let mut parts = Vec::new();
    let mut offset = 0usize;

    while offset < blob.len() {
        let (mime, after_mime) = read_line(&blob, offset, "missing MIME terminator")?;
        let mime = std::str::from_utf8(mime).map_err(|_| CoreError::MalformedPayload {
            offset,
            reason: "MIME is not UTF-8",
        })?;
        if mime.is_empty() {
            return Err(CoreError::MalformedPayload {
                offset,
                reason: "empty MIME",
            });
        }
        let mime = mime.to_owned();

        let (length, data_start) = read_line(&blob, after_mime, "missing length terminator")?;
        let length = parse_hex_length(length).ok_or(CoreError::MalformedPayload {
            offset: after_mime,
            reason: "length is not hexadecimal",
        })?;

        let data_end = data_start
            .checked_add(length)
            .filter(|end| *end < blob.len())
            .ok_or(CoreError::MalformedPayload {
                offset: data_start,
                reason: "part is truncated",
            })?;
        if blob[data_end] != b'\n' {
            return Err(CoreError::MalformedPayload {
                offset: data_end,
                reason: "length does not match part data",
            });
        }

        parts.push(PayloadPart {
            mime,
            data: blob.slice(data_start..data_end),
        });
        offset = data_end + 1;
    }

    Ok(parts)
}

fn read_line<'a>(
    blob: &'a [u8],
    start: usize,
    reason: &'static str,
) -> Result<(&'a [u8], usize), CoreError> {
    let newline = blob[start..]
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or(CoreError::MalformedPayload {
            offset: start,
            reason,
        })?;
    Ok((&blob[start..start + newline], start + newline + 1))
}

fn parse_hex_length(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let digits = std::str::from_utf8(digits).ok()?;
    usize::from_str_radix(digits, 16).ok()
}
