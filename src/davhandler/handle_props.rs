use std::time::SystemTime;

use headers::HeaderMapExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};

use crate::backend::{BackendError, DavLock, DavProp, DavResource, PropSelection, PropValue, NS_DAV_URI};
use crate::body::Body;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::multistatus::{propfind_body, proppatch_body, PropResponse};
use crate::util::{merge_paths, urlencode_minimal};
use crate::xmlparse::{parse_propfind, parse_proppatch};
use crate::DavResult;

// A resource that does not exist, but is locked (a "lock-null" resource).
fn locked_resource(path: &DavPath, lock: &DavLock) -> DavResource {
    let now = SystemTime::now();
    DavResource {
        path: path.slashified().as_str().to_string(),
        props: vec![
            DavProp::dav("displayname", path.file_name()),
            DavProp::dav("creationdate", lock.created.unwrap_or(now)),
            DavProp::dav("getlastmodified", lock.modified.unwrap_or(now)),
            DavProp::dav("resourcetype", ""),
            DavProp::dav("getcontenttype", ""),
            DavProp::dav("getcontentlength", 0u64),
        ],
    }
}

fn multistatus(body: String) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=\"utf-8\""));
    res
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
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
        let selection = parse_propfind(body)?;
        debug!("PROPFIND {} depth {} {:?}", path, depth, selection);

        let resources = match self.backend.propfind(&path, depth, &selection).await {
            Ok(Some(resources)) => resources,
            Ok(None) | Err(BackendError::NotFound) => {
                let lock = if self.backend.can_check_lock() {
                    self.backend.check_lock(&path).await.ok().flatten()
                } else {
                    None
                };
                match lock {
                    Some(lock) => vec![locked_resource(&path, &lock)],
                    None => return Err(StatusCode::NOT_FOUND.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let mut responses = Vec::with_capacity(resources.len());
        for res in resources {
            responses.push(self.filter_props(&path, res, &selection).await?);
        }
        Ok(multistatus(propfind_body(&responses)))
    }

    // Apply the selection to what the backend returned.
    async fn filter_props(
        &self,
        base: &DavPath,
        res: DavResource,
        selection: &PropSelection,
    ) -> DavResult<PropResponse> {
        let href = urlencode_minimal(&merge_paths(base.prefix(), &res.path));
        let mut resp = PropResponse {
            href,
            ..Default::default()
        };
        match selection {
            PropSelection::All => resp.found = res.props,
            PropSelection::Names => {
                resp.found = res
                    .props
                    .into_iter()
                    .map(|p| DavProp::new(p.namespace, p.name, PropValue::Empty))
                    .collect();
            }
            PropSelection::Props(wanted) => {
                for name in wanted {
                    if let Some(p) = res.props.iter().find(|p| name.matches(p)) {
                        resp.found.push(p.clone());
                    } else if name.namespace == NS_DAV_URI
                        && name.name == "lockdiscovery"
                        && self.backend.can_check_lock()
                    {
                        let path = base.with_same_prefix(&res.path);
                        let value = self.lockdiscovery(&path).await?;
                        resp.found.push(DavProp::dav("lockdiscovery", value));
                    } else {
                        resp.notfound.push(name.clone());
                    }
                }
            }
        }
        Ok(resp)
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        path: DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        if !self.check_lock_status(req.headers(), &path, false).await? {
            return Err(StatusCode::LOCKED.into());
        }
        let mut ops = parse_proppatch(body)?;
        let description = self.backend.proppatch(&path, &mut ops).await?;
        Ok(multistatus(proppatch_body(
            &path.as_url_string(),
            &ops,
            description.as_deref(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LockScope;

    #[test]
    fn test_locked_resource() {
        let lock = DavLock {
            scope: LockScope::Exclusive,
            locktype: "write".to_string(),
            owner: String::new(),
            token: "opaquelocktoken:x".to_string(),
            depth: Depth::Zero,
            timeout: Some(300),
            expires: None,
            created: None,
            modified: None,
        };
        let res = locked_resource(&DavPath::new("/new").unwrap(), &lock);
        assert_eq!(res.path, "/new/");
        assert!(res.props.iter().any(|p| p.is("DAV:", "displayname") && p.value.to_text() == "new"));
        assert!(res.props.iter().any(|p| p.is("DAV:", "getcontentlength") && p.value.to_text() == "0"));
    }
}
