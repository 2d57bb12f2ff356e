//! The XML-shaped attribute record preceding container payloads.
//!
//! A serialized container opens with a single self-closing element,
//!
//! ```text
//! <Terse prolix_bits="12" signed="0" block="12" number_of_values="262144"
//!  dimensions="512 512" number_of_frames="2"
//!  memory_sizes_of_frames="45694 45694" memory_size="91388"
//!  metadata_string_sizes="10 15"/>
//! ```
//!
//! followed immediately by the metadata strings and the frame payloads.
//! The element is plain ASCII with double-quoted values; the writer
//! emits attributes in a fixed order so re-serialization is
//! byte-stable. The parser scans the stream for the element, tolerating
//! leading bytes that are not part of it.

use std::io::{BufRead, Read, Write};

use crate::error::TrpxError;

/// Parsed form of the container prelude.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct WireHeader {
    pub prolix_bits: u32,
    pub signed: bool,
    pub block: usize,
    pub number_of_values: usize,
    pub dimensions: Vec<usize>,
    pub number_of_frames: usize,
    /// Byte length of each frame payload; absent in legacy streams.
    pub frame_sizes: Option<Vec<usize>>,
    /// Sum of all payload byte lengths.
    pub memory_size: usize,
    /// Byte length of each metadata string; absent means no metadata.
    pub metadata_sizes: Option<Vec<usize>>,
}

impl WireHeader {
    /// Serialize in the fixed attribute order.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), TrpxError> {
        let mut s = String::with_capacity(192);
        s.push_str("<Terse");
        push_attr(&mut s, "prolix_bits", &self.prolix_bits.to_string());
        push_attr(&mut s, "signed", if self.signed { "1" } else { "0" });
        push_attr(&mut s, "block", &self.block.to_string());
        push_attr(&mut s, "number_of_values", &self.number_of_values.to_string());
        if !self.dimensions.is_empty() {
            push_attr(&mut s, "dimensions", &join(&self.dimensions));
        }
        push_attr(&mut s, "number_of_frames", &self.number_of_frames.to_string());
        if let Some(sizes) = &self.frame_sizes {
            push_attr(&mut s, "memory_sizes_of_frames", &join(sizes));
        }
        push_attr(&mut s, "memory_size", &self.memory_size.to_string());
        if let Some(sizes) = &self.metadata_sizes {
            push_attr(&mut s, "metadata_string_sizes", &join(sizes));
        }
        s.push_str("/>");
        out.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Byte length of the serialized element.
    pub fn wire_len(&self) -> usize {
        let mut buf = Vec::new();
        // writing to a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf.len()
    }

    /// Scan `input` for the element and parse it, leaving the stream
    /// positioned one byte past the closing `>`. Returns `None` when
    /// the stream ends before an element is found.
    pub fn read_from<R: BufRead>(input: &mut R) -> Result<Option<WireHeader>, TrpxError> {
        let Some(body) = scan_element(input, b"<Terse")? else {
            return Ok(None);
        };
        let attrs = parse_attributes(&body)?;
        let mut h = WireHeader {
            prolix_bits: require_number(&attrs, "prolix_bits")? as u32,
            signed: match require(&attrs, "signed")? {
                "0" => false,
                "1" => true,
                other => {
                    return Err(TrpxError::Header(format!(
                        "signed attribute must be 0 or 1, got {other:?}"
                    )))
                }
            },
            block: require_number(&attrs, "block")?,
            number_of_values: require_number(&attrs, "number_of_values")?,
            number_of_frames: require_number(&attrs, "number_of_frames")?,
            memory_size: require_number(&attrs, "memory_size")?,
            ..WireHeader::default()
        };
        if let Some(v) = lookup(&attrs, "dimensions") {
            h.dimensions = parse_list(v, "dimensions")?;
        }
        if let Some(v) = lookup(&attrs, "memory_sizes_of_frames") {
            h.frame_sizes = Some(parse_list(v, "memory_sizes_of_frames")?);
        }
        if let Some(v) = lookup(&attrs, "metadata_string_sizes") {
            h.metadata_sizes = Some(parse_list(v, "metadata_string_sizes")?);
        }
        Ok(Some(h))
    }
}

fn push_attr(s: &mut String, key: &str, value: &str) {
    s.push(' ');
    s.push_str(key);
    s.push_str("=\"");
    s.push_str(value);
    s.push('"');
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read until `needle` is seen, then collect everything up to the
/// closing `>`, returning the attribute text between them.
fn scan_element<R: BufRead>(input: &mut R, needle: &[u8]) -> Result<Option<Vec<u8>>, TrpxError> {
    let mut matched = 0;
    loop {
        let mut byte = [0u8; 1];
        if input.read(&mut byte)? == 0 {
            return Ok(None);
        }
        if byte[0] == needle[matched] {
            matched += 1;
            if matched == needle.len() {
                break;
            }
        } else {
            matched = usize::from(byte[0] == needle[0]);
        }
    }
    let mut body = Vec::with_capacity(160);
    loop {
        let mut byte = [0u8; 1];
        if input.read(&mut byte)? == 0 {
            return Err(TrpxError::Header("unterminated element".into()));
        }
        if byte[0] == b'>' {
            break;
        }
        body.push(byte[0]);
    }
    if body.last() != Some(&b'/') {
        return Err(TrpxError::Header("element is not self-closing".into()));
    }
    body.pop();
    Ok(Some(body))
}

/// Tokenize `key="value"` pairs.
fn parse_attributes(body: &[u8]) -> Result<Vec<(String, String)>, TrpxError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| TrpxError::Header("non-ASCII bytes in element".into()))?;
    let mut attrs = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| TrpxError::Header(format!("attribute without value near {rest:?}")))?;
        let key = rest[..eq].trim().to_string();
        let after = &rest[eq + 1..];
        let after = after
            .strip_prefix('"')
            .ok_or_else(|| TrpxError::Header(format!("attribute {key} value is not quoted")))?;
        let close = after
            .find('"')
            .ok_or_else(|| TrpxError::Header(format!("attribute {key} value is not closed")))?;
        attrs.push((key, after[..close].to_string()));
        rest = after[close + 1..].trim_start();
    }
    Ok(attrs)
}

fn lookup<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn require<'a>(attrs: &'a [(String, String)], key: &str) -> Result<&'a str, TrpxError> {
    lookup(attrs, key).ok_or_else(|| TrpxError::Header(format!("missing attribute {key}")))
}

fn require_number(attrs: &[(String, String)], key: &str) -> Result<usize, TrpxError> {
    require(attrs, key)?
        .parse()
        .map_err(|_| TrpxError::Header(format!("attribute {key} is not a number")))
}

fn parse_list(value: &str, key: &str) -> Result<Vec<usize>, TrpxError> {
    value
        .split_whitespace()
        .map(|tok| {
            tok.parse()
                .map_err(|_| TrpxError::Header(format!("attribute {key} holds non-number {tok:?}")))
        })
        .collect()
}
