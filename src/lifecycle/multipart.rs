//! `multipart/form-data` body parsing into [`Params`].

use super::params::{FilePart, ParamValue, Params};
use crate::error::Error;

/// Extract the `boundary` parameter from a Content-Type value.
#[must_use]
pub fn parse_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (k, v) = param.split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| v.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
    })
}

/// Parse a complete multipart body, merging fields into `params`.
///
/// Parts with a `filename` become [`ParamValue::File`]; others become text.
///
/// # Errors
///
/// [`Error::BadRequest`] when the body does not follow the boundary framing
/// or a part lacks a `Content-Disposition` name.
pub fn parse_into(body: &[u8], boundary: &str, params: &mut Params) -> Result<(), Error> {
    let delimiter = format!("--{boundary}").into_bytes();
    let bad = |msg: &str| Error::BadRequest(format!("malformed multipart body: {msg}"));

    let mut pos = find(body, &delimiter, 0).ok_or_else(|| bad("missing opening boundary"))?;
    loop {
        pos += delimiter.len();
        if body[pos..].starts_with(b"--") {
            return Ok(());
        }
        pos = skip_crlf(body, pos);
        let header_end =
            find(body, b"\r\n\r\n", pos).ok_or_else(|| bad("unterminated part headers"))?;
        let headers = String::from_utf8_lossy(&body[pos..header_end]);
        let data_start = header_end + 4;
        let next = find(body, &delimiter, data_start).ok_or_else(|| bad("missing closing boundary"))?;
        let mut data_end = next;
        if body[..data_end].ends_with(b"\r\n") {
            data_end -= 2;
        }
        let data = body[data_start..data_end.max(data_start)].to_vec();
        let part = PartHeaders::parse(&headers);
        let name = part.name.ok_or_else(|| bad("part without a name"))?;
        let value = match part.filename {
            Some(filename) => ParamValue::File(FilePart {
                filename: Some(filename),
                content_type: part.content_type,
                data,
            }),
            None => ParamValue::Text(String::from_utf8_lossy(&data).into_owned()),
        };
        params.insert(name, value);
        pos = next;
    }
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
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-type") {
                out.content_type = Some(value.trim().to_string());
            } else if key.eq_ignore_ascii_case("content-disposition") {
                for param in value.split(';').skip(1) {
                    if let Some((k, v)) = param.split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim().to_ascii_lowercase().as_str() {
                            "name" => out.name = Some(v),
                            "filename" => out.filename = Some(v),
                            _ => {}
                        }
                    }
                }
            }
        }
        out
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn skip_crlf(body: &[u8], pos: usize) -> usize {
    if body[pos..].starts_with(b"\r\n") {
        pos + 2
    } else {
        pos
    }
}
