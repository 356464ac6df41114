//! Typed WebDAV request headers, and the Range / Content-Range grammars.
use std::fmt;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use regex::Regex;

use crate::errors::DavError;
use crate::DavResult;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref X_LITMUS: HeaderName = HeaderName::from_static("x-litmus");
    pub(crate) static ref X_DAV_POWERED_BY: HeaderName = HeaderName::from_static("x-dav-powered-by");
    pub(crate) static ref X_WEBDAV_STATUS: HeaderName = HeaderName::from_static("x-webdav-status");
    static ref RE_RANGE: Regex = Regex::new(r"bytes\s*=\s*(.+)").unwrap();
    static ref RE_CONTENT_RANGE: Regex = Regex::new(r"^\s*bytes\s+(\d+)-(\d+)/(\d+|\*)\s*$").unwrap();
}

// helper.
fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    Ok(v)
}

// helper
fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

macro_rules! header {
    ($tname:ident, $hname:ident, $sname:expr) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $tname(pub String);

        impl Header for $tname {
            fn name() -> &'static HeaderName {
                &$hname
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                one(values)?
                    .to_str()
                    .map(|x| $tname(x.to_owned()))
                    .map_err(map_invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                if let Ok(value) = HeaderValue::from_str(&self.0) {
                    values.extend(std::iter::once(value));
                }
            }
        }
    };
}

header!(Destination, DESTINATION, "Destination");
header!(IfHeader, IF, "If");
header!(XLitmus, X_LITMUS, "X-Litmus");

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            b"infinity" | b"Infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        values.extend(std::iter::once(HeaderValue::from_static(self.as_str())));
    }
}

/// Overwrite: header. Only `T` means true.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let line = one(values)?;
        match line.as_bytes() {
            b"F" => Ok(Overwrite(false)),
            b"T" => Ok(Overwrite(true)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Lock-Token: header, without the `<` `>` wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct LockTokenHeader(pub String);

impl Header for LockTokenHeader {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(map_invalid)?.trim();
        let value = value.trim_start_matches('<').trim_end_matches('>');
        Ok(LockTokenHeader(value.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&format!("<{}>", self.0)) {
            values.extend(std::iter::once(value));
        }
    }
}

/// Timeout: header. Only the first value of the list is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeout(pub String);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let value = value.to_str().map_err(map_invalid)?;
        let first = value.split(',').next().unwrap_or("").trim();
        if first.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Timeout(first.to_string()))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        if let Ok(value) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(value));
        }
    }
}

/// One range of a `Range: bytes=...` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-end` or `start-`.
    FromTo(u64, Option<u64>),
    /// `-n`: the last n bytes.
    Last(u64),
}

impl ByteRange {
    /// Resolve against the total size. Returns an inclusive `(start, end)`,
    /// or `None` if the range is not satisfiable.
    pub fn resolve(&self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        match *self {
            ByteRange::FromTo(start, end) => {
                if start >= size {
                    return None;
                }
                let end = end.map(|e| e.min(size - 1)).unwrap_or(size - 1);
                if end < start {
                    return None;
                }
                Some((start, end))
            }
            ByteRange::Last(n) => {
                if n == 0 {
                    return None;
                }
                Some((size.saturating_sub(n), size - 1))
            }
        }
    }
}

/// Parse a `Range:` header value. A value that is not a `bytes` range
/// yields an empty list.
pub(crate) fn parse_ranges(value: &str) -> DavResult<Vec<ByteRange>> {
    let caps = match RE_RANGE.captures(value) {
        Some(caps) => caps,
        None => return Ok(Vec::new()),
    };
    let bad = || DavError::StatusBody(StatusCode::BAD_REQUEST, "invalid Range header".to_string());
    let mut ranges = Vec::new();
    for range in caps[1].split(',') {
        let (start, end) = range.trim().split_once('-').ok_or_else(bad)?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            let n = end.parse::<u64>().map_err(|_| bad())?;
            ranges.push(ByteRange::Last(n));
        } else {
            let start = start.parse::<u64>().map_err(|_| bad())?;
            let end = if end.is_empty() {
                None
            } else {
                Some(end.parse::<u64>().map_err(|_| bad())?)
            };
            ranges.push(ByteRange::FromTo(start, end));
        }
    }
    Ok(ranges)
}

/// A validated `Content-Range: bytes start-end/total` request header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` for `*`.
    pub total: Option<u64>,
}

pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let caps = RE_CONTENT_RANGE.captures(value)?;
    let start = caps[1].parse::<u64>().ok()?;
    let end = caps[2].parse::<u64>().ok()?;
    let total = match &caps[3] {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    if end < start {
        return None;
    }
    Some(ContentRange { start, end, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use headers::HeaderMapExt;
    use http::HeaderMap;

    #[test]
    fn test_ranges() {
        let r = parse_ranges("bytes=0-99, 200-, -50").unwrap();
        assert_eq!(
            r,
            vec![
                ByteRange::FromTo(0, Some(99)),
                ByteRange::FromTo(200, None),
                ByteRange::Last(50)
            ]
        );
        assert!(parse_ranges("bytes=a-b").is_err());
        assert!(parse_ranges("items=1-2").unwrap().is_empty());
    }

    #[test]
    fn test_range_resolve() {
        assert_eq!(ByteRange::FromTo(0, Some(99)).resolve(1000), Some((0, 99)));
        assert_eq!(ByteRange::FromTo(900, Some(2000)).resolve(1000), Some((900, 999)));
        assert_eq!(ByteRange::Last(10).resolve(1000), Some((990, 999)));
        assert_eq!(ByteRange::FromTo(1000, None).resolve(1000), None);
    }

    #[test]
    fn test_content_range() {
        assert_eq!(
            parse_content_range("bytes 10-19/100"),
            Some(ContentRange { start: 10, end: 19, total: Some(100) })
        );
        assert_eq!(parse_content_range("bytes 10-19/*").map(|c| c.total), Some(None));
        assert_eq!(parse_content_range("bytes 10-/100"), None);
        assert_eq!(parse_content_range("10-19/100"), None);
    }

    #[test]
    fn test_typed_headers() {
        let mut h = HeaderMap::new();
        h.insert("depth", HeaderValue::from_static("1"));
        h.insert("timeout", HeaderValue::from_static("Second-60, Infinite"));
        h.insert("lock-token", HeaderValue::from_static("<opaquelocktoken:abc>"));
        assert_eq!(h.typed_get::<Depth>(), Some(Depth::One));
        assert_eq!(h.typed_get::<Timeout>(), Some(Timeout("Second-60".to_string())));
        assert_eq!(
            h.typed_get::<LockTokenHeader>(),
            Some(LockTokenHeader("opaquelocktoken:abc".to_string()))
        );
        h.insert("depth", HeaderValue::from_static("2"));
        assert!(h.typed_try_get::<Depth>().is_err());
    }
}
