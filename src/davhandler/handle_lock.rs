use std::time::SystemTime;

use headers::HeaderMapExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};

use crate::backend::{DavLock, LockRequest, LockScope, PropValue};
use crate::body::Body;
use crate::conditional::first_state_token;
use crate::davheaders::{Depth, IfHeader, LockTokenHeader, Timeout};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::{status_response, unix_now};
use crate::xmlparse::parse_lockinfo;
use crate::DavResult;

// numbers above this are absolute unix times.
const ABSOLUTE_TIMEOUT: u64 = 1_000_000;

/// Normalize a `Timeout:` value for the LOCK reply.
pub(crate) fn format_timeout(timeout: Option<&str>, now: u64) -> String {
    let timeout = match timeout {
        Some(t) => t.trim(),
        None => return "Infinite".to_string(),
    };
    match timeout.parse::<u64>() {
        Ok(t) if t > ABSOLUTE_TIMEOUT => format!("Second-{}", t.saturating_sub(now)),
        Ok(t) => format!("Second-{t}"),
        Err(_) => timeout.to_string(),
    }
}

// Timeout of an existing lock, for lockdiscovery.
fn lock_timeout(lock: &DavLock) -> String {
    if let Some(expires) = lock.expires {
        let left = expires
            .duration_since(SystemTime::now())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        return format!("Second-{left}");
    }
    match lock.timeout {
        Some(t) => format!("Second-{t}"),
        None => "Infinite".to_string(),
    }
}

fn activelock_xml(
    scope: LockScope,
    locktype: &str,
    depth: Depth,
    owner: &str,
    timeout: &str,
    token: &str,
) -> String {
    format!(
        concat!(
            "<D:activelock>\n",
            "   <D:lockscope><D:{}/></D:lockscope>\n",
            "   <D:locktype><D:{}/></D:locktype>\n",
            "   <D:depth>{}</D:depth>\n",
            "   <D:owner>{}</D:owner>\n",
            "   <D:timeout>{}</D:timeout>\n",
            "   <D:locktoken><D:href>{}</D:href></D:locktoken>\n",
            "  </D:activelock>"
        ),
        scope.as_str(),
        locktype,
        depth,
        owner,
        timeout,
        htmlescape::encode_minimal(token),
    )
}

impl crate::DavHandler {
    /// The `DAV:lockdiscovery` value of a resource. Empty if unlocked.
    pub(crate) async fn lockdiscovery(&self, path: &DavPath) -> DavResult<PropValue> {
        let lock = match self.backend.check_lock(path).await {
            Ok(Some(lock)) => lock,
            Ok(None) => return Ok(PropValue::Empty),
            Err(e) => {
                debug!("lockdiscovery {}: {}", path, e);
                return Ok(PropValue::Empty);
            }
        };
        let xml = activelock_xml(
            lock.scope,
            &lock.locktype,
            lock.depth,
            &lock.owner,
            &lock_timeout(&lock),
            &lock.token,
        );
        Ok(PropValue::Xml(xml))
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        path: DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(depth)) => depth,
            Ok(None) => Depth::Infinity,
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let timeout = req.headers().typed_get::<Timeout>().map(|t| t.0);
        let if_header = req.headers().typed_get::<IfHeader>().map(|h| h.0);

        let mut lr = match (body.is_empty(), if_header) {
            (true, Some(if_header)) => {
                // refresh an existing lock.
                if !self.check_lock_status(req.headers(), &path, false).await? {
                    return Err(StatusCode::LOCKED.into());
                }
                let token = match first_state_token(&if_header) {
                    Some(token) => token,
                    None => return Err(StatusCode::BAD_REQUEST.into()),
                };
                LockRequest {
                    path,
                    depth,
                    timeout,
                    scope: LockScope::Exclusive,
                    locktype: "write".to_string(),
                    owner: "unknown".to_string(),
                    token: token.clone(),
                    update: Some(token),
                }
            }
            (true, None) => {
                debug!("LOCK {}: no lockinfo and no If: header", path);
                return Err(DavError::XmlParseError);
            }
            (false, _) => {
                let info = parse_lockinfo(body)?;
                // a shared lock only conflicts with an exclusive one.
                let shared = info.scope == LockScope::Shared;
                if !self.check_lock_status(req.headers(), &path, shared).await? {
                    return Err(StatusCode::LOCKED.into());
                }
                LockRequest {
                    path,
                    depth,
                    timeout,
                    scope: info.scope,
                    locktype: info.locktype,
                    owner: info.owner,
                    token: format!("opaquelocktoken:{}", uuid::Uuid::new_v4()),
                    update: None,
                }
            }
        };

        let status = self.backend.lock(&mut lr).await?;
        if !status.is_success() {
            debug!("LOCK {}: backend says {}", lr.path, status);
            return Ok(status_response(status));
        }

        let timeout = format_timeout(lr.timeout.as_deref(), unix_now());
        let body = format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n",
                "<D:prop xmlns:D=\"DAV:\">\n",
                " <D:lockdiscovery>\n",
                "  {}\n",
                " </D:lockdiscovery>\n",
                "</D:prop>\n"
            ),
            activelock_xml(lr.scope, &lr.locktype, lr.depth, &lr.owner, &timeout, &lr.token)
        );

        let mut res = Response::new(Body::from(body));
        *res.status_mut() = status;
        let h = res.headers_mut();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=\"utf-8\""));
        h.typed_insert(LockTokenHeader(lr.token.clone()));
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>, path: DavPath) -> DavResult<Response<Body>> {
        let token = match req.headers().typed_get::<LockTokenHeader>() {
            Some(t) if !t.0.is_empty() => t.0,
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(depth)) => depth,
            Ok(None) => Depth::Infinity,
            Err(_) => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let status = self.backend.unlock(&path, &token, depth).await?;
        Ok(status_response(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_timeout() {
        let now = 1_700_000_000;
        assert_eq!(format_timeout(None, now), "Infinite");
        assert_eq!(format_timeout(Some("3600"), now), "Second-3600");
        assert_eq!(format_timeout(Some("1700000300"), now), "Second-300");
        assert_eq!(format_timeout(Some("Second-60"), now), "Second-60");
        assert_eq!(format_timeout(Some("Infinite"), now), "Infinite");
    }

    #[test]
    fn test_lock_timeout() {
        let mut lock = DavLock {
            scope: LockScope::Exclusive,
            locktype: "write".to_string(),
            owner: String::new(),
            token: "opaquelocktoken:x".to_string(),
            depth: Depth::Zero,
            timeout: None,
            expires: None,
            created: None,
            modified: None,
        };
        assert_eq!(lock_timeout(&lock), "Infinite");
        lock.timeout = Some(60);
        assert_eq!(lock_timeout(&lock), "Second-60");
        lock.expires = Some(SystemTime::now() + Duration::from_secs(120));
        let t = lock_timeout(&lock);
        assert!(t == "Second-120" || t == "Second-119", "{}", t);
    }

    #[test]
    fn test_activelock() {
        let xml = activelock_xml(
            LockScope::Shared,
            "write",
            Depth::Infinity,
            "<D:href>me</D:href>",
            "Second-300",
            "opaquelocktoken:abc",
        );
        assert!(xml.contains("<D:lockscope><D:shared/></D:lockscope>"));
        assert!(xml.contains("<D:depth>infinity</D:depth>"));
        assert!(xml.contains("<D:owner><D:href>me</D:href></D:owner>"));
        assert!(xml.contains("<D:locktoken><D:href>opaquelocktoken:abc</D:href></D:locktoken>"));
    }
}
