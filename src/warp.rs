//! Adapter for the `warp` HTTP server framework.
//!
//! The filters in this module will always succeed and never
//! return an error. For example, if a file is not found, the
//! filter will return a 404 reply, and not an internal
//! rejection.
//!
use std::convert::Infallible;
use std::path::Path;

use crate::{Backend, DavHandler};
use warp::{filters::BoxedFilter, Filter, Reply};

/// Reply-filter that runs a DavHandler.
///
/// Just pass in a pre-configured DavHandler. The prefix is
/// the request path up to this point.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    use http::header::HeaderMap;
    use http::uri::Uri;
    use http::{Response, StatusCode};
    use warp::path::{FullPath, Tail};

    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(
            move |method, path_full: FullPath, path_tail: Tail, headers: HeaderMap, body| {
                let handler = handler.clone();

                async move {
                    // rebuild an http::Request struct.
                    let path_str = path_full.as_str();
                    let mut builder = http::Request::builder().method(method);
                    if let Ok(uri) = path_str.parse::<Uri>() {
                        builder = builder.uri(uri);
                    }
                    for (k, v) in headers.iter() {
                        builder = builder.header(k, v);
                    }
                    let request = match builder.body(body) {
                        Ok(request) => request,
                        Err(_) => {
                            let mut response = Response::new(hyper::Body::empty());
                            *response.status_mut() = StatusCode::BAD_REQUEST;
                            return Ok::<_, Infallible>(response);
                        }
                    };

                    let path_len = path_str.len();
                    let tail_len = path_tail.as_str().len();
                    let prefix = path_str[..path_len - tail_len].to_string();
                    let response = handler
                        .handle_stream_with(request, Some(prefix), None)
                        .await;

                    // Need to remap the http_body::Body to a hyper::Body.
                    let (parts, body) = response.into_parts();
                    let response = Response::from_parts(parts, hyper::Body::wrap_stream(body));
                    Ok::<_, Infallible>(response)
                }
            },
        )
        .boxed()
}

/// Creates a Filter that serves files and directories at the
/// base path joined with the remainder of the request path,
/// like `warp::filters::fs::dir`, with full WebDAV support.
pub fn dav_dir(base: impl AsRef<Path>) -> BoxedFilter<(impl Reply,)> {
    dav_handler(DavHandler::builder(Backend::local(base.as_ref(), false)).build())
}
