use headers::HeaderMapExt;
use http::header::HOST;
use http::{Request, Response, StatusCode};

use crate::backend::{CopyMoveRequest, Destination};
use crate::body::Body;
use crate::davheaders::{self, Depth, Overwrite};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::{status_response, DavMethod};
use crate::DavResult;

// host[:port], with the http default port left out.
fn normalize_host(host: &str) -> &str {
    host.strip_suffix(":80").unwrap_or(host)
}

impl crate::DavHandler {
    // Decide whether the Destination: header points at this server,
    // below our prefix.
    fn destination(&self, req: &Request<()>, dest: &str) -> DavResult<Destination> {
        let target = if dest.starts_with('/') {
            dest.to_string()
        } else {
            let url = match url::Url::parse(dest) {
                Ok(url) => url,
                Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
            };
            let dest_host = match (url.host_str(), url.port()) {
                (Some(h), Some(p)) if p != 80 => format!("{h}:{p}"),
                (Some(h), _) => h.to_string(),
                (None, _) => return Ok(Destination::Remote(dest.to_string())),
            };
            let req_host = req
                .headers()
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.to_string())
                .or_else(|| req.uri().authority().map(|a| a.to_string()));
            match req_host {
                Some(h) if normalize_host(&h).eq_ignore_ascii_case(&dest_host) => {}
                _ => return Ok(Destination::Remote(dest.to_string())),
            }
            url.path().to_string()
        };

        match DavPath::from_target_and_prefix(&target, &self.prefix) {
            Ok((path, _)) => Ok(Destination::Local(path)),
            Err(DavError::IllegalPath) => Ok(Destination::Remote(dest.to_string())),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        path: DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let dest = match req.headers().typed_get::<davheaders::Destination>() {
            Some(dest) => dest.0,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let dest = self.destination(req, &dest)?;

        if let Destination::Local(ref dest) = dest {
            if !self.check_lock_status(req.headers(), dest, false).await? {
                return Err(StatusCode::LOCKED.into());
            }
        }

        let overwrite = !matches!(
            req.headers().typed_try_get::<Overwrite>(),
            Ok(Some(Overwrite(false)))
        );
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(depth)) => depth,
            Ok(None) => Depth::Infinity,
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };

        let cm = CopyMoveRequest {
            path,
            dest,
            overwrite,
            depth,
        };
        debug!("{:?} {} -> {:?} overwrite {} depth {}", method, cm.path, cm.dest, overwrite, depth);

        let status = if method == DavMethod::MOVE {
            if !self.check_lock_status(req.headers(), &cm.path, false).await? {
                return Err(StatusCode::LOCKED.into());
            }
            self.backend.move_(&cm).await?
        } else {
            self.backend.copy(&cm).await?
        };
        Ok(status_response(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, DavHandler};

    fn handler(prefix: &str) -> DavHandler {
        DavHandler::builder(Backend::Mem).strip_prefix(prefix).build()
    }

    fn req(host: &str) -> Request<()> {
        Request::builder()
            .method("COPY")
            .uri("/dav/a")
            .header("Host", host)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_local_destination() {
        let h = handler("/dav");
        let d = h.destination(&req("example.com:80"), "http://example.com/dav/b%20c").unwrap();
        assert_eq!(d, Destination::Local(DavPath::from_target_and_prefix("/dav/b%20c", "/dav").unwrap().0));

        let d = h.destination(&req("example.com"), "/dav/b").unwrap();
        assert!(matches!(d, Destination::Local(ref p) if p.as_str() == "/b"));
    }

    #[test]
    fn test_remote_destination() {
        let h = handler("/dav");
        let d = h.destination(&req("example.com"), "http://other.org/dav/b").unwrap();
        assert_eq!(d, Destination::Remote("http://other.org/dav/b".to_string()));

        let d = h.destination(&req("example.com"), "http://example.com:8080/dav/b").unwrap();
        assert!(matches!(d, Destination::Remote(_)));

        // same host, outside of the prefix.
        let d = h.destination(&req("example.com"), "http://example.com/other/b").unwrap();
        assert!(matches!(d, Destination::Remote(_)));
    }
}
