use headers::HeaderMapExt;
use http::header::{HeaderValue, ALLOW};
use http::{Request, Response};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::{hval, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, _req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        trace!("OPTIONS {}", path);
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();

        // Microsoft clients default to the Frontpage protocol
        // unless we tell them to use WebDAV.
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));

        // class 2 requires that locking is supported.
        let dav = if self.implemented().contains(DavMethod::LOCK) {
            "1, 2"
        } else {
            "1"
        };
        h.insert("DAV", HeaderValue::from_static(dav));
        h.insert(ALLOW, hval(&self.allow_header())?);
        h.typed_insert(headers::ContentLength(0));

        Ok(res)
    }
}
