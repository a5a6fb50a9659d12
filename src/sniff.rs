//! Content-type detection for responses that did not declare one.
//!
//! Implements the signature table of the WHATWG MIME Sniffing standard. Only
//! the first [`SNIFF_LEN`] bytes are considered and the result is always one
//! of a fixed set of strings, so it can be stored as a static header value.

/// Maximum number of bytes inspected.
pub const SNIFF_LEN: usize = 512;

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

enum Signature {
    /// Case-insensitive HTML tag, after leading whitespace, followed by a
    /// space or `>`.
    Html(&'static [u8]),
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        skip_whitespace: bool,
        content_type: &'static str,
    },
    Exact(&'static [u8], &'static str),
    Mp4,
    Text,
}

const fn masked(
    mask: &'static [u8],
    pattern: &'static [u8],
    content_type: &'static str,
) -> Signature {
    Signature::Masked {
        mask,
        pattern,
        skip_whitespace: false,
        content_type,
    }
}

const HTML: &str = "text/html; charset=utf-8";

const RIFF_MASK: &[u8] = b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF";

const EOT_MASK: &[u8] = &eot_signature(0xFF, 0xFF);
const EOT_PATTERN: &[u8] = &eot_signature(b'L', b'P');

/// 34 ignored bytes followed by the two-byte magic at offset 34.
const fn eot_signature(first: u8, second: u8) -> [u8; 36] {
    let mut bytes = [0; 36];
    bytes[34] = first;
    bytes[35] = second;
    bytes
}

static SIGNATURES: &[Signature] = &[
    Signature::Html(b"<!DOCTYPE HTML"),
    Signature::Html(b"<HTML"),
    Signature::Html(b"<HEAD"),
    Signature::Html(b"<SCRIPT"),
    Signature::Html(b"<IFRAME"),
    Signature::Html(b"<H1"),
    Signature::Html(b"<DIV"),
    Signature::Html(b"<FONT"),
    Signature::Html(b"<TABLE"),
    Signature::Html(b"<A"),
    Signature::Html(b"<STYLE"),
    Signature::Html(b"<TITLE"),
    Signature::Html(b"<B"),
    Signature::Html(b"<BODY"),
    Signature::Html(b"<BR"),
    Signature::Html(b"<P"),
    Signature::Html(b"<!--"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\xFF",
        pattern: b"<?xml",
        skip_whitespace: true,
        content_type: "text/xml; charset=utf-8",
    },
    Signature::Exact(b"%PDF-", "application/pdf"),
    Signature::Exact(b"%!PS-Adobe-", "application/postscript"),
    // Byte order marks
    masked(b"\xFF\xFF\x00\x00", b"\xFE\xFF\x00\x00", "text/plain; charset=utf-16be"),
    masked(b"\xFF\xFF\x00\x00", b"\xFF\xFE\x00\x00", "text/plain; charset=utf-16le"),
    masked(b"\xFF\xFF\xFF\x00", b"\xEF\xBB\xBF\x00", TEXT_PLAIN_UTF8),
    // Images
    Signature::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Signature::Exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Signature::Exact(b"BM", "image/bmp"),
    Signature::Exact(b"GIF87a", "image/gif"),
    Signature::Exact(b"GIF89a", "image/gif"),
    masked(
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        b"RIFF\x00\x00\x00\x00WEBPVP",
        "image/webp",
    ),
    Signature::Exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Signature::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    // Audio and video
    masked(RIFF_MASK, b"FORM\x00\x00\x00\x00AIFF", "audio/aiff"),
    masked(b"\xFF\xFF\xFF", b"ID3", "audio/mpeg"),
    masked(b"\xFF\xFF\xFF\xFF\xFF", b"OggS\x00", "application/ogg"),
    masked(
        b"\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF",
        b"MThd\x00\x00\x00\x06",
        "audio/midi",
    ),
    masked(RIFF_MASK, b"RIFF\x00\x00\x00\x00AVI ", "video/avi"),
    masked(RIFF_MASK, b"RIFF\x00\x00\x00\x00WAVE", "audio/wave"),
    Signature::Mp4,
    Signature::Exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    // Fonts
    masked(EOT_MASK, EOT_PATTERN, "application/vnd.ms-fontobject"),
    Signature::Exact(b"\x00\x01\x00\x00", "font/ttf"),
    Signature::Exact(b"OTTO", "font/otf"),
    Signature::Exact(b"ttcf", "font/collection"),
    Signature::Exact(b"wOFF", "font/woff"),
    Signature::Exact(b"wOF2", "font/woff2"),
    // Archives
    Signature::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Signature::Exact(b"PK\x03\x04", "application/zip"),
    Signature::Exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Signature::Exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Signature::Exact(b"\x00\x61\x73\x6D", "application/wasm"),
    Signature::Text,
];

/// Guesses the content type of a response body from its first bytes.
///
/// Falls back to `application/octet-stream` when nothing matches.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let first_non_ws = data
        .iter()
        .position(|&b| !is_whitespace(b))
        .unwrap_or(data.len());

    SIGNATURES
        .iter()
        .find_map(|signature| signature.matches(data, first_non_ws))
        .unwrap_or(OCTET_STREAM)
}

impl Signature {
    fn matches(&self, data: &[u8], first_non_ws: usize) -> Option<&'static str> {
        match *self {
            Signature::Html(tag) => match_html(&data[first_non_ws..], tag).then_some(HTML),
            Signature::Masked {
                mask,
                pattern,
                skip_whitespace,
                content_type,
            } => {
                let data = if skip_whitespace {
                    &data[first_non_ws..]
                } else {
                    data
                };
                match_masked(data, mask, pattern).then_some(content_type)
            }
            Signature::Exact(prefix, content_type) => {
                data.starts_with(prefix).then_some(content_type)
            }
            Signature::Mp4 => match_mp4(data).then_some("video/mp4"),
            Signature::Text => (!data.iter().copied().any(is_binary)).then_some(TEXT_PLAIN_UTF8),
        }
    }
}

fn match_html(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }

    let tag_matches = tag.iter().zip(data).all(|(&expected, &actual)| {
        if expected.is_ascii_uppercase() {
            actual & 0xDF == expected
        } else {
            actual == expected
        }
    });

    tag_matches && matches!(data[tag.len()], b' ' | b'>')
}

fn match_masked(data: &[u8], mask: &[u8], pattern: &[u8]) -> bool {
    data.len() >= pattern.len()
        && mask
            .iter()
            .zip(pattern)
            .zip(data)
            .all(|((&mask, &pattern), &byte)| byte & mask == pattern)
}

fn match_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }

    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < box_size || box_size % 4 != 0 || &data[4..8] != b"ftyp" {
        return false;
    }

    // Brands start at offset 8; offset 12 holds the minor version.
    (8..box_size)
        .step_by(4)
        .filter(|&offset| offset != 12)
        .any(|offset| &data[offset..offset + 3] == b"mp4")
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
