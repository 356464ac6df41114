use std::io::SeekFrom;

use bytes::Bytes;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::header::{HeaderMap, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::{Request, Response, StatusCode};

use crate::backend::{Content, DavFile, Entity, GetReply};
use crate::body::Body;
use crate::davheaders::{parse_ranges, ByteRange};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::{hval, status_response, DavMethod};
use crate::DavResult;

pub(crate) const READ_BUF_SIZE: usize = 16384;

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

// Stream `len` bytes (or everything, if `None`) from the current position.
fn window_body(mut file: Box<dyn DavFile>, len: Option<u64>, bufsize: usize, first: Option<Bytes>) -> Body {
    Body::stream(async_stream::stream! {
        let mut left = len;
        if let Some(b) = first {
            let b = match left {
                Some(l) if (b.len() as u64) > l => b.slice(..l as usize),
                _ => b,
            };
            left = left.map(|l| l - b.len() as u64);
            yield Ok(b);
        }
        loop {
            let n = match left {
                Some(0) => break,
                Some(l) => std::cmp::min(l, bufsize as u64) as usize,
                None => bufsize,
            };
            match file.read_bytes(n).await {
                Ok(b) if b.is_empty() => break,
                Ok(b) => {
                    left = left.map(|l| l.saturating_sub(b.len() as u64));
                    yield Ok(b);
                }
                Err(e) => {
                    error!("GET: read error: {}", e);
                    yield Err(std::io::Error::from(e));
                    break;
                }
            }
        }
    })
}

fn set_entity_headers(h: &mut HeaderMap, entity: &Entity) -> DavResult<()> {
    let mimetype = entity.mimetype.as_deref().unwrap_or(DEFAULT_MIMETYPE);
    h.insert(CONTENT_TYPE, hval(mimetype)?);
    if let Some(mtime) = entity.mtime {
        h.typed_insert(headers::LastModified::from(mtime));
    }
    Ok(())
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        req: &Request<()>,
        path: DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        if method == DavMethod::HEAD {
            return self.handle_head(path).await;
        }

        let ranges = match req.headers().get(RANGE) {
            Some(v) => parse_ranges(v.to_str().map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?)?,
            None => Vec::new(),
        };

        let reply = self.backend.get(&path, &ranges).await?;
        let entity = match reply {
            GetReply::Found(entity) => entity,
            GetReply::NotFound => return Err(StatusCode::NOT_FOUND.into()),
            GetReply::Status(status) => return Ok(status_response(status)),
            GetReply::Response(resp) => return Ok(resp),
        };

        let mut res = Response::new(Body::empty());
        set_entity_headers(res.headers_mut(), &entity)?;
        let mimetype = entity.mimetype.clone().unwrap_or_else(|| DEFAULT_MIMETYPE.to_string());
        let size = entity.size;

        match entity.content {
            Content::None => {
                res.headers_mut().typed_insert(headers::ContentLength(0));
            }
            Content::Data(data) => {
                res.headers_mut().typed_insert(headers::ContentLength(data.len() as u64));
                *res.body_mut() = Body::from(data);
            }
            Content::Stream(mut file) => {
                // partial request and stream is seekable.
                if !ranges.is_empty() && file.seek(SeekFrom::Start(0)).await.is_ok() {
                    if ranges.len() == 1 {
                        return self.single_range(res, file, ranges[0], size).await;
                    }
                    if let Some(size) = size {
                        return self.multi_range(res, file, &ranges, size, &mimetype).await;
                    }
                    debug!("GET {}: multiple ranges on a resource of unknown size", path);
                }
                // normal request or stream isn't seekable, return full content.
                if let Some(size) = size {
                    res.headers_mut().typed_insert(headers::ContentLength(size));
                }
                *res.body_mut() = window_body(file, None, self.read_buf_size, None);
            }
        }
        Ok(res)
    }

    async fn single_range(
        &self,
        mut res: Response<Body>,
        mut file: Box<dyn DavFile>,
        range: ByteRange,
        size: Option<u64>,
    ) -> DavResult<Response<Body>> {
        let total = size.map(|s| s.to_string()).unwrap_or_else(|| "*".to_string());

        let (start, end, first) = match (range, size) {
            (range, Some(size)) => match range.resolve(size) {
                Some((start, end)) => (start, Some(end), None),
                None => return self.not_satisfiable(size),
            },
            (ByteRange::FromTo(start, end), None) => {
                file.seek(SeekFrom::Start(start)).await?;
                let first = file.read_bytes(self.read_buf_size).await?;
                if first.is_empty() {
                    return Err(StatusCode::RANGE_NOT_SATISFIABLE.into());
                }
                (start, end, Some(first))
            }
            (ByteRange::Last(n), None) => {
                // the last n bytes of something of unknown size.
                let pos = suffix_seek(n).ok_or(StatusCode::RANGE_NOT_SATISFIABLE)?;
                file.seek(pos).await?;
                res.headers_mut().typed_insert(headers::ContentLength(n));
                *res.body_mut() = window_body(file, Some(n), self.read_buf_size, None);
                return Ok(res);
            }
        };
        if first.is_none() {
            file.seek(SeekFrom::Start(start)).await?;
        }

        *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        let len = match end {
            Some(end) => {
                let len = end - start + 1;
                res.headers_mut().typed_insert(headers::ContentLength(len));
                res.headers_mut()
                    .insert(CONTENT_RANGE, hval(&format!("bytes {start}-{end}/{total}"))?);
                Some(len)
            }
            None => None,
        };
        *res.body_mut() = window_body(file, len, self.read_buf_size, first);
        Ok(res)
    }

    async fn multi_range(
        &self,
        mut res: Response<Body>,
        mut file: Box<dyn DavFile>,
        ranges: &[ByteRange],
        size: u64,
        mimetype: &str,
    ) -> DavResult<Response<Body>> {
        let windows: Vec<(u64, u64)> = ranges.iter().filter_map(|r| r.resolve(size)).collect();
        if windows.is_empty() {
            return self.not_satisfiable(size);
        }

        // a little naive, this sequence *might* be part of the content.
        let boundary = format!("SEPARATOR_{}", uuid::Uuid::new_v4().simple());
        let part_header = |start: u64, end: u64| {
            format!(
                "\r\n--{boundary}\r\nContent-type: {mimetype}\r\nContent-range: bytes {start}-{end}/{size}\r\n\r\n"
            )
        };
        let trailer = format!("\r\n--{boundary}--\r\n");
        let length = windows
            .iter()
            .map(|&(s, e)| part_header(s, e).len() as u64 + (e - s + 1))
            .sum::<u64>()
            + trailer.len() as u64;

        *res.status_mut() = StatusCode::PARTIAL_CONTENT;
        res.headers_mut().insert(
            CONTENT_TYPE,
            hval(&format!("multipart/byteranges; boundary={boundary}"))?,
        );
        res.headers_mut().typed_insert(headers::ContentLength(length));

        let headers: Vec<String> = windows.iter().map(|&(s, e)| part_header(s, e)).collect();
        let bufsize = self.read_buf_size;
        *res.body_mut() = Body::stream(async_stream::stream! {
            for (&(start, end), header) in windows.iter().zip(headers.into_iter()) {
                yield Ok(Bytes::from(header));
                if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                    yield Err(std::io::Error::from(e));
                    return;
                }
                let mut left = end - start + 1;
                while left > 0 {
                    let n = std::cmp::min(left, bufsize as u64) as usize;
                    match file.read_bytes(n).await {
                        Ok(b) if b.is_empty() => break,
                        Ok(b) => {
                            left = left.saturating_sub(b.len() as u64);
                            yield Ok(b);
                        }
                        Err(e) => {
                            yield Err(std::io::Error::from(e));
                            return;
                        }
                    }
                }
            }
            yield Ok(Bytes::from(trailer));
        });
        Ok(res)
    }

    fn not_satisfiable(&self, size: u64) -> DavResult<Response<Body>> {
        let mut res = status_response(StatusCode::RANGE_NOT_SATISFIABLE);
        res.headers_mut()
            .insert(CONTENT_RANGE, hval(&format!("bytes */{size}"))?);
        Ok(res)
    }

    // HEAD, directly or by running GET and counting the output.
    async fn handle_head(&self, path: DavPath) -> DavResult<Response<Body>> {
        let reply = if self.backend.methods().contains(DavMethod::HEAD) {
            self.backend.head(&path).await?
        } else {
            self.backend.get(&path, &[]).await?
        };

        let entity = match reply {
            GetReply::Found(entity) => entity,
            GetReply::NotFound => return Err(StatusCode::NOT_FOUND.into()),
            GetReply::Status(status) => return Ok(status_response(status)),
            GetReply::Response(resp) => {
                let (mut parts, body) = resp.into_parts();
                if !parts.headers.contains_key(http::header::CONTENT_LENGTH) {
                    let mut body = body;
                    let mut len = 0u64;
                    while let Some(chunk) = body.next().await {
                        len += chunk.map(|b| b.len() as u64).unwrap_or(0);
                    }
                    parts.headers.typed_insert(headers::ContentLength(len));
                }
                return Ok(Response::from_parts(parts, Body::empty()));
            }
        };

        let mut res = Response::new(Body::empty());
        set_entity_headers(res.headers_mut(), &entity)?;
        let size = match (entity.size, entity.content) {
            (Some(size), _) => Some(size),
            (None, Content::None) => None,
            (None, Content::Data(data)) => Some(data.len() as u64),
            (None, Content::Stream(mut file)) => {
                let mut len = 0u64;
                loop {
                    let b = file.read_bytes(self.read_buf_size).await?;
                    if b.is_empty() {
                        break;
                    }
                    len += b.len() as u64;
                }
                Some(len)
            }
        };
        if let Some(size) = size {
            res.headers_mut().typed_insert(headers::ContentLength(size));
        }
        Ok(res)
    }
}

// Seek position of the last `n` bytes, if that is representable.
fn suffix_seek(n: u64) -> Option<SeekFrom> {
    i64::try_from(n).ok().map(|n| SeekFrom::End(-n))
}
