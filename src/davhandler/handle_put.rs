use std::error::Error as StdError;
use std::io::SeekFrom;

use bytes::{Buf, Bytes};
use headers::HeaderMapExt;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::backend::{DavFile, PutReply, PutRequest};
use crate::body::Body;
use crate::davheaders::parse_content_range;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::status_response;
use crate::DavResult;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn not_supported(msg: String) -> DavError {
    DavError::StatusBody(StatusCode::NOT_IMPLEMENTED, msg)
}

// Validate the Content-* headers, which we must not ignore (RFC2616 9.6).
fn put_request(req: &Request<()>, path: DavPath) -> DavResult<PutRequest> {
    let mut put = PutRequest {
        path,
        content_type: DEFAULT_CONTENT_TYPE.to_string(),
        content_language: None,
        content_length: req.headers().typed_get::<headers::ContentLength>().map(|l| l.0),
        range: None,
    };

    for (name, value) in req.headers() {
        let name = name.as_str();
        if !name.starts_with("content-") {
            continue;
        }
        let value = value.to_str().map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        match name {
            "content-encoding" => {
                // TODO: gzip and deflate could be decoded on the fly.
                return Err(not_supported(format!(
                    "The service does not support '{value}' content encoding"
                )));
            }
            "content-language" => put.content_language = Some(value.to_string()),
            "content-length" | "content-location" => {}
            "content-type" => put.content_type = value.to_string(),
            "content-range" => match parse_content_range(value) {
                Some(range) => put.range = Some(range),
                None => {
                    return Err(DavError::StatusBody(
                        StatusCode::BAD_REQUEST,
                        "The service does only support single byte ranges".to_string(),
                    ))
                }
            },
            "content-md5" => {
                return Err(not_supported(
                    "The service does not support content MD5 checksum verification".to_string(),
                ))
            }
            _ => return Err(not_supported(format!("The service does not support '{name}'"))),
        }
    }

    if let (Some(range), Some(len)) = (put.range, put.content_length) {
        if range.end - range.start + 1 != len {
            return Err(DavError::StatusBody(
                StatusCode::BAD_REQUEST,
                "Content-Range does not match Content-Length".to_string(),
            ));
        }
    }
    Ok(put)
}

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        path: DavPath,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        if !self.check_lock_status(req.headers(), &path, false).await? {
            return Err(StatusCode::LOCKED.into());
        }
        // multipart is checked before anything else.
        if let Some(ct) = req.headers().get(CONTENT_TYPE) {
            if ct.as_bytes().starts_with(b"multipart/") {
                return Err(not_supported(
                    "The service does not support multipart PUT requests".to_string(),
                ));
            }
        }
        let put = put_request(req, path)?;

        let (mut file, new) = match self.backend.put(&put).await? {
            PutReply::Forbidden => return Err(StatusCode::FORBIDDEN.into()),
            PutReply::Status(status) => return Ok(status_response(status)),
            PutReply::Writer { file, new } => (file, new),
        };

        if let Some(range) = put.range {
            if let Err(e) = file.seek(SeekFrom::Start(range.start)).await {
                debug!("PUT {}: seek to {} failed: {}", put.path, range.start, e);
                return Err(StatusCode::FORBIDDEN.into());
            }
        }

        // with a Content-Range, only that window is written.
        let window = put.range.map(|r| r.end - r.start + 1);
        let written = match self.copy_body(&mut file, body, window).await {
            Ok(n) => n,
            Err(e) => {
                debug!("PUT {}: write failed: {}", put.path, e);
                return Err(StatusCode::FORBIDDEN.into());
            }
        };
        if let Some(window) = window {
            if written < window {
                debug!("PUT {}: body has {} of {} bytes", put.path, written, window);
                return Err(DavError::StatusBody(
                    StatusCode::BAD_REQUEST,
                    "Content-Range does not match the request body".to_string(),
                ));
            }
        }

        let status = if new {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        Ok(status_response(status))
    }

    async fn copy_body<ReqBody, ReqData, ReqError>(
        &self,
        file: &mut Box<dyn DavFile>,
        body: ReqBody,
        limit: Option<u64>,
    ) -> DavResult<u64>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        pin_utils::pin_mut!(body);
        let mut written = 0u64;
        'body: while let Some(data) = body.data().await {
            let mut buf = data.map_err(|e| {
                DavError::IoError(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, e.to_string()))
            })?;
            while buf.has_remaining() {
                let mut n = buf.chunk().len();
                if let Some(limit) = limit {
                    if written >= limit {
                        break 'body;
                    }
                    n = (n as u64).min(limit - written) as usize;
                }
                file.write_bytes(Bytes::copy_from_slice(&buf.chunk()[..n])).await?;
                buf.advance(n);
                written += n as u64;
            }
        }
        file.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(headers: &[(&str, &str)]) -> Request<()> {
        let mut b = Request::builder().method("PUT").uri("/f");
        for (k, v) in headers {
            b = b.header(*k, *v);
        }
        b.body(()).unwrap()
    }

    fn path() -> DavPath {
        DavPath::new("/f").unwrap()
    }

    #[test]
    fn test_content_headers() {
        let put = put_request(
            &req(&[("Content-Type", "text/plain"), ("Content-Language", "nl")]),
            path(),
        )
        .unwrap();
        assert_eq!(put.content_type, "text/plain");
        assert_eq!(put.content_language.as_deref(), Some("nl"));

        let put = put_request(&req(&[]), path()).unwrap();
        assert_eq!(put.content_type, "application/octet-stream");
    }

    #[test]
    fn test_rejected_headers() {
        let err = put_request(&req(&[("Content-Encoding", "gzip")]), path()).unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            err.body_text(),
            Some("The service does not support 'gzip' content encoding")
        );

        let err = put_request(&req(&[("Content-MD5", "abc")]), path()).unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::NOT_IMPLEMENTED);

        let err = put_request(&req(&[("Content-Foo", "x")]), path()).unwrap_err();
        assert_eq!(err.body_text(), Some("The service does not support 'content-foo'"));
    }

    #[test]
    fn test_content_range() {
        let put = put_request(&req(&[("Content-Range", "bytes 10-19/100")]), path()).unwrap();
        let range = put.range.unwrap();
        assert_eq!((range.start, range.end, range.total), (10, 19, Some(100)));

        let err = put_request(&req(&[("Content-Range", "bytes 10-19,30-40/100")]), path()).unwrap_err();
        assert_eq!(err.statuscode(), StatusCode::BAD_REQUEST);
    }
}
