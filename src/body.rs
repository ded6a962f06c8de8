//! Request payload parsing.
//!
//! The payload is fully buffered before it gets here; this module only turns
//! bytes plus a `Content-Type` into a structured body. Three shapes are
//! understood:
//!
//! | Content-Type | Body |
//! |---|---|
//! | `application/json` | whatever the JSON says |
//! | `application/x-www-form-urlencoded` | object of strings |
//! | `multipart/form-data` | object of strings, plus [`UploadedFile`]s |
//!
//! Anything else leaves the body as an empty object. Failures never reach
//! the handler as an error: the request carries an empty object and the
//! [`BodyError`] is kept on the side for handlers that care.

use std::borrow::Cow;

use bytes::Bytes;
use percent_encoding::percent_decode;
use serde_json::{Map, Value};
use thiserror::Error;

/// Content type assumed for a file part that does not declare one (RFC 7578 §4.4).
const DEFAULT_PART_TYPE: &str = "text/plain";

/// Why a payload could not be turned into a body.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("malformed form body: {0}")]
    Form(#[from] FormError),

    #[error("request body exceeds the {limit}-byte limit")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MultipartError {
    #[error("content type has no boundary parameter")]
    MissingBoundary,

    #[error("payload never contains the boundary delimiter")]
    NoDelimiter,

    #[error("part {0} has no blank line after its headers")]
    MissingHeaderEnd(usize),

    #[error("part {0} has no Content-Disposition name")]
    MissingName(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("invalid percent escape in {0:?}")]
    BadEscape(String),

    #[error("{0:?} does not decode to UTF-8")]
    NotUtf8(String),
}

/// One file extracted from a multipart payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file was submitted under.
    pub field: String,
    /// File name as declared by the client.
    pub filename: String,
    /// The `name` parameter of the part's disposition.
    pub name: String,
    /// The part's `Content-Type`, `text/plain` when absent.
    pub content_type: String,
    pub size: usize,
    pub bytes: Bytes,
}

/// Files attached to a request.
///
/// A lone upload lives in the single-file slot; two or more form a
/// collection. [`Uploads::file`] and [`Uploads::files`] read one shape each.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Uploads {
    #[default]
    None,
    Single(UploadedFile),
    Many(Vec<UploadedFile>),
}

impl Uploads {
    fn from_vec(mut files: Vec<UploadedFile>) -> Self {
        match files.len() {
            0 => Self::None,
            1 => files.pop().map_or(Self::None, Self::Single),
            _ => Self::Many(files),
        }
    }

    /// The upload, when exactly one file was sent.
    pub fn file(&self) -> Option<&UploadedFile> {
        match self {
            Self::Single(file) => Some(file),
            _ => None,
        }
    }

    /// The uploads, when more than one file was sent. Empty otherwise.
    pub fn files(&self) -> &[UploadedFile] {
        match self {
            Self::Many(files) => files,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single(_) => 1,
            Self::Many(files) => files.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parsed payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Parsed {
    pub value: Value,
    pub uploads: Uploads,
}

impl Parsed {
    pub fn empty() -> Self {
        Self { value: Value::Object(Map::new()), uploads: Uploads::None }
    }
}

/// Parses `payload` according to `content_type`.
pub fn parse(content_type: Option<&str>, payload: &[u8]) -> Result<Parsed, BodyError> {
    let Some(content_type) = content_type else {
        return Ok(Parsed::empty());
    };
    let essence = content_type.split(';').next().unwrap_or_default().trim();

    if essence == "application/json" {
        let value = serde_json::from_slice(payload)?;
        return Ok(Parsed { value, uploads: Uploads::None });
    }
    if essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        return Ok(Parsed { value: Value::Object(parse_urlencoded(payload)?), uploads: Uploads::None });
    }
    if essence.eq_ignore_ascii_case("multipart/form-data") {
        let boundary = boundary(content_type).ok_or(MultipartError::MissingBoundary)?;
        return Ok(parse_multipart(&boundary, payload)?);
    }
    Ok(Parsed::empty())
}

/// Decodes `a=1&b=two%20words` into an object of strings.
///
/// Pairs split on the first `=`; a missing value is the empty string.
/// Only `%XX` escapes are decoded, so `+` stays a literal plus. A later
/// repeat of a key replaces the earlier value.
pub fn parse_urlencoded(payload: &[u8]) -> Result<Map<String, Value>, FormError> {
    let mut fields = Map::new();
    for pair in payload.split(|&b| b == b'&').filter(|pair| !pair.is_empty()) {
        let (key, value) = match pair.iter().position(|&b| b == b'=') {
            Some(at) => (&pair[..at], &pair[at + 1..]),
            None => (pair, &[][..]),
        };
        fields.insert(decode_component(key)?, Value::String(decode_component(value)?));
    }
    Ok(fields)
}

fn decode_component(raw: &[u8]) -> Result<String, FormError> {
    let lossy = || String::from_utf8_lossy(raw).into_owned();
    let mut rest = raw;
    while let Some(at) = rest.iter().position(|&b| b == b'%') {
        match rest.get(at + 1..at + 3) {
            Some(hex) if hex.iter().all(u8::is_ascii_hexdigit) => rest = &rest[at + 3..],
            _ => return Err(FormError::BadEscape(lossy())),
        }
    }
    percent_decode(raw)
        .decode_utf8()
        .map(Cow::into_owned)
        .map_err(|_| FormError::NotUtf8(lossy()))
}

/// Extracts the `boundary` parameter from a multipart content type.
pub fn boundary(content_type: &str) -> Option<String> {
    split_params(content_type)
        .into_iter()
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|b| !b.is_empty())
}

/// Splits a multipart payload on `--boundary` and sorts its parts into
/// scalar fields and files.
pub fn parse_multipart(boundary: &str, payload: &[u8]) -> Result<Parsed, MultipartError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let starts = find_all(payload, delimiter);
    if starts.is_empty() {
        return Err(MultipartError::NoDelimiter);
    }

    let mut fields = Map::new();
    let mut files = Vec::new();

    for (index, &start) in starts.iter().enumerate() {
        let from = start + delimiter.len();
        let to = starts.get(index + 1).copied().unwrap_or(payload.len());
        let segment = &payload[from..to];

        // `--boundary--` closes the body; anything after it is epilogue.
        if segment.starts_with(b"--") {
            break;
        }
        let segment = strip_line_break_prefix(segment);
        if segment.is_empty() {
            continue;
        }
        let segment = strip_line_break_suffix(segment);

        let header_end = find(segment, b"\r\n\r\n").ok_or(MultipartError::MissingHeaderEnd(index))?;
        let headers = String::from_utf8_lossy(&segment[..header_end]);
        let content = &segment[header_end + 4..];

        let part = PartHeaders::parse(&headers);
        let name = part.name.ok_or(MultipartError::MissingName(index))?;

        match part.filename {
            // An empty filename is what browsers send for an untouched file input.
            Some(filename) if filename.is_empty() => {}
            Some(filename) => files.push(UploadedFile {
                field: name.clone(),
                filename,
                name,
                content_type: part.content_type.unwrap_or_else(|| DEFAULT_PART_TYPE.to_owned()),
                size: content.len(),
                bytes: Bytes::copy_from_slice(content),
            }),
            None => {
                fields.insert(name, Value::String(String::from_utf8_lossy(content).into_owned()));
            }
        }
    }

    Ok(Parsed { value: Value::Object(fields), uploads: Uploads::from_vec(files) })
}

#[derive(Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(block: &str) -> Self {
        let mut out = Self::default();
        for line in block.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else { continue };
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for param in split_params(value).into_iter().skip(1) {
                    let Some((k, v)) = param.split_once('=') else { continue };
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => out.name = Some(unquote(v.trim())),
                        "filename" => out.filename = Some(unquote(v.trim())),
                        _ => {}
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") && !value.is_empty() {
                out.content_type = Some(value.to_owned());
            }
        }
        out
    }
}

/// Splits a header value on `;`, ignoring separators inside quotes.
fn split_params(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\"").replace("\\\\", "\\"),
        None => value.to_owned(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(pos) = find(&haystack[from..], needle) {
        out.push(from + pos);
        from += pos + needle.len();
    }
    out
}

fn strip_line_break_prefix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_prefix(b"\r\n")
        .or_else(|| bytes.strip_prefix(b"\n"))
        .unwrap_or(bytes)
}

fn strip_line_break_suffix(bytes: &[u8]) -> &[u8] {
    bytes
        .strip_suffix(b"\r\n")
        .or_else(|| bytes.strip_suffix(b"\n"))
        .unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const BOUNDARY: &str = "----corvid7MA4YWxkTrZu0gW";

    fn multipart(parts: &[(&str, Option<(&str, &str)>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, file, content) in parts {
            out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file {
                Some((filename, ty)) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {ty}\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        out
    }

    fn multipart_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    #[test]
    fn json_object() {
        let parsed = parse(Some("application/json"), br#"{"a":1}"#).unwrap();
        assert_eq!(parsed.value, json!({"a": 1}));
        assert!(parsed.uploads.is_empty());
    }

    #[test]
    fn json_with_charset_parameter() {
        let parsed = parse(Some("application/json; charset=utf-8"), br#"[1,2]"#).unwrap();
        assert_eq!(parsed.value, json!([1, 2]));
    }

    #[test]
    fn json_media_type_is_case_sensitive() {
        let parsed = parse(Some("Application/JSON"), br#"{"a":1}"#).unwrap();
        assert_eq!(parsed, Parsed::empty());
    }

    #[test]
    fn truncated_json_is_an_error() {
        let err = parse(Some("application/json"), br#"{"a":"#).unwrap_err();
        assert!(matches!(err, BodyError::Json(_)));
    }

    #[test]
    fn urlencoded_pairs() {
        let parsed = parse(
            Some("application/x-www-form-urlencoded"),
            b"a=1&b=two%20words&flag&c=x=y",
        )
        .unwrap();
        assert_eq!(parsed.value, json!({"a": "1", "b": "two words", "flag": "", "c": "x=y"}));
    }

    #[test]
    fn urlencoded_plus_is_literal() {
        let fields = parse_urlencoded(b"q=a+b&r=%2B1").unwrap();
        assert_eq!(Value::Object(fields), json!({"q": "a+b", "r": "+1"}));
    }

    #[test]
    fn urlencoded_truncated_escape_is_an_error() {
        let err = parse(Some("application/x-www-form-urlencoded"), b"ok=1&r=%E0%A4%A").unwrap_err();
        assert!(matches!(err, BodyError::Form(FormError::BadEscape(_))));
        assert_eq!(parse_urlencoded(b"k=%zz"), Err(FormError::BadEscape("%zz".into())));
    }

    #[test]
    fn urlencoded_invalid_utf8_is_an_error() {
        assert_eq!(parse_urlencoded(b"k=%FF"), Err(FormError::NotUtf8("%FF".into())));
    }

    #[test]
    fn unknown_content_type_is_empty() {
        assert_eq!(parse(Some("text/csv"), b"a,b").unwrap(), Parsed::empty());
        assert_eq!(parse(None, b"anything").unwrap(), Parsed::empty());
    }

    #[test]
    fn boundary_forms() {
        assert_eq!(boundary("multipart/form-data; boundary=abc").as_deref(), Some("abc"));
        assert_eq!(boundary("multipart/form-data; charset=x; BOUNDARY=\"a;b\"").as_deref(), Some("a;b"));
        assert_eq!(boundary("multipart/form-data"), None);
        assert_eq!(boundary("multipart/form-data; boundary="), None);
    }

    #[test]
    fn field_and_single_file() {
        let payload = multipart(&[
            ("name", None, b"bar".as_slice()),
            ("doc", Some(("x.txt", "text/plain")), b"hello\r\nworld".as_slice()),
        ]);
        let parsed = parse(Some(&multipart_type()), &payload).unwrap();

        assert_eq!(parsed.value, json!({"name": "bar"}));
        let file = parsed.uploads.file().expect("single file slot");
        assert_eq!(file.field, "doc");
        assert_eq!(file.name, "doc");
        assert_eq!(file.filename, "x.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.size, 12);
        assert_eq!(&file.bytes[..], b"hello\r\nworld");
        assert!(parsed.uploads.files().is_empty());
    }

    #[test]
    fn two_files_become_a_collection() {
        let payload = multipart(&[
            ("a", Some(("a.bin", "application/octet-stream")), [0u8, 159, 146, 150].as_slice()),
            ("b", Some(("b.png", "image/png")), b"\x89PNG".as_slice()),
        ]);
        let parsed = parse(Some(&multipart_type()), &payload).unwrap();

        assert!(parsed.uploads.file().is_none());
        let files = parsed.uploads.files();
        assert_eq!(files.len(), 2);
        assert_eq!(&files[0].bytes[..], &[0, 159, 146, 150]);
        assert_eq!(files[1].content_type, "image/png");
    }

    #[test]
    fn file_part_without_type_defaults_to_text() {
        let payload = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"n.txt\"\r\n\r\nabc\r\n--{BOUNDARY}--\r\n"
        );
        let parsed = parse(Some(&multipart_type()), payload.as_bytes()).unwrap();
        assert_eq!(parsed.uploads.file().unwrap().content_type, "text/plain");
    }

    #[test]
    fn empty_filename_is_skipped() {
        let payload = multipart(&[("f", Some(("", "application/octet-stream")), b"".as_slice())]);
        let parsed = parse(Some(&multipart_type()), &payload).unwrap();
        assert!(parsed.uploads.is_empty());
        assert_eq!(parsed.value, json!({}));
    }

    #[test]
    fn missing_boundary_parameter() {
        let err = parse(Some("multipart/form-data"), b"whatever").unwrap_err();
        assert!(matches!(err, BodyError::Multipart(MultipartError::MissingBoundary)));
    }

    #[test]
    fn payload_without_delimiter() {
        let err = parse(Some(&multipart_type()), b"just some bytes").unwrap_err();
        assert!(matches!(err, BodyError::Multipart(MultipartError::NoDelimiter)));
    }

    #[test]
    fn part_without_header_separator() {
        let payload = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"x\"\r\nvalue\r\n--{BOUNDARY}--");
        let err = parse(Some(&multipart_type()), payload.as_bytes()).unwrap_err();
        assert!(matches!(err, BodyError::Multipart(MultipartError::MissingHeaderEnd(0))));
    }

    #[test]
    fn quoted_semicolon_in_filename() {
        let payload = multipart(&[("f", Some(("a;b.txt", "text/plain")), b"x".as_slice())]);
        let parsed = parse(Some(&multipart_type()), &payload).unwrap();
        assert_eq!(parsed.uploads.file().unwrap().filename, "a;b.txt");
    }
}
