use http::{Request, Response};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::util::status_response;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, _req: &Request<()>, path: DavPath) -> DavResult<Response<Body>> {
        trace!("MKCOL {}", path);
        let status = self.backend.mkcol(&path).await?;
        Ok(status_response(status))
    }
}
