use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use headers::{Header, HeaderMapExt};
use http::method::InvalidMethod;
use http::{HeaderValue, Response, StatusCode};
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::body::Body;
use crate::errors::DavError;
use crate::DavResult;

bitflags! {
    /// A set of WebDAV methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethod: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
        const WEBDAV_BODY = Self::PUT.bits() | Self::PROPFIND.bits()
            | Self::PROPPATCH.bits() | Self::LOCK.bits();
    }
}

impl DavMethod {
    pub const WEBDAV_RW: Self = Self::all();
}

/// A set of allowed [`DavMethod`]s.
pub type DavMethodSet = DavMethod;

// Order in which methods are listed in the Allow: header.
pub(crate) const ALLOW_ORDER: [(DavMethod, &str); 12] = [
    (DavMethod::OPTIONS, "OPTIONS"),
    (DavMethod::GET, "GET"),
    (DavMethod::HEAD, "HEAD"),
    (DavMethod::PUT, "PUT"),
    (DavMethod::DELETE, "DELETE"),
    (DavMethod::COPY, "COPY"),
    (DavMethod::MOVE, "MOVE"),
    (DavMethod::MKCOL, "MKCOL"),
    (DavMethod::PROPFIND, "PROPFIND"),
    (DavMethod::PROPPATCH, "PROPPATCH"),
    (DavMethod::LOCK, "LOCK"),
    (DavMethod::UNLOCK, "UNLOCK"),
];

// translate method into our own enum that has webdav methods as well.
pub fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::HEAD,
        http::Method::GET => DavMethod::GET,
        http::Method::PUT => DavMethod::PUT,
        http::Method::DELETE => DavMethod::DELETE,
        http::Method::OPTIONS => DavMethod::OPTIONS,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PROPFIND,
            "PROPPATCH" => DavMethod::PROPPATCH,
            "MKCOL" => DavMethod::MKCOL,
            "COPY" => DavMethod::COPY,
            "MOVE" => DavMethod::MOVE,
            "LOCK" => DavMethod::LOCK,
            "UNLOCK" => DavMethod::UNLOCK,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            match http::method::Method::from_bytes(b"") {
                Err(e) => e,
                Ok(_) => unreachable!(),
            }
        })
    }
}

pub fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(t) => t.as_secs() as i64,
        Err(_) => 0,
    };
    time::OffsetDateTime::from_unix_timestamp(secs)
        .unwrap_or(time::OffsetDateTime::UNIX_EPOCH)
        .to_offset(offset!(UTC))
}

/// RFC1123 date, as used by `getlastmodified` and `Last-Modified:`.
pub fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .unwrap_or_default()
}

/// ISO8601 date, as used by `creationdate`.
pub fn systemtime_to_rfc3339(t: SystemTime) -> String {
    // 1996-12-19T16:39:57Z
    systemtime_to_offsetdatetime(t).format(&Rfc3339).unwrap_or_default()
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn slashify(s: &str) -> String {
    if s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

pub(crate) fn unslashify(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Join a prefix and a path without doubling the slash.
pub(crate) fn merge_paths(parent: &str, child: &str) -> String {
    if child.starts_with('/') {
        format!("{}{}", unslashify(parent), child)
    } else {
        format!("{}{}", slashify(parent), child)
    }
}

/// Encode the few characters that break `href` elements and headers.
pub(crate) fn urlencode_minimal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            c => out.push(c),
        }
    }
    out
}

pub(crate) fn hval(s: &str) -> DavResult<HeaderValue> {
    HeaderValue::from_str(s).map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Response with just a status and an empty body.
pub(crate) fn status_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp.headers_mut().typed_insert(headers::ContentLength(0));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        assert_eq!(systemtime_to_httpdate(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_merge_and_encode() {
        assert_eq!(merge_paths("/dav/", "/a"), "/dav/a");
        assert_eq!(merge_paths("/dav", "a"), "/dav/a");
        assert_eq!(merge_paths("", "/a"), "/a");
        assert_eq!(urlencode_minimal("/a b/c&d%"), "/a%20b/c%26d%25");
    }

    #[test]
    fn test_dav_method() {
        let m = http::Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::PROPFIND);
        let m = http::Method::from_bytes(b"PATCH").unwrap();
        assert!(dav_method(&m).is_err());
    }
}
