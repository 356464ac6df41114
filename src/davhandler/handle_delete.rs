use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::status_response;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>, path: DavPath) -> DavResult<Response<Body>> {
        // RFC2518 9.2, last paragraph: a DELETE on a collection always
        // acts as if Depth: infinity was given.
        match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => {}
            _ => {
                debug!("DELETE {}: refusing Depth other than infinity", path);
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            }
        }

        if !self.check_lock_status(req.headers(), &path, false).await? {
            return Err(StatusCode::LOCKED.into());
        }

        let status = self.backend.delete(&path).await?;
        Ok(status_response(status))
    }
}
