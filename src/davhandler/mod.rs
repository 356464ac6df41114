//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
#[cfg(any(docsrs, feature = "localfs"))]
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::authorization::Basic;
use headers::{Authorization, HeaderMapExt};
use http::header::{HeaderValue, ALLOW, CONNECTION, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::backend::DavBackend;
use crate::body::{Body, StreamBody};
use crate::davheaders::{self, X_DAV_POWERED_BY, X_WEBDAV_STATUS};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multistatus::status_line;
use crate::util::{dav_method, hval, status_response, DavMethod, DavMethodSet, ALLOW_ORDER};
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
use handle_gethead::READ_BUF_SIZE;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// Request bodies of the XML methods are read into memory, up to this size.
const MAX_XML_BODY: usize = 65536;

/// The raw request-target, as it appeared on the request line.
///
/// `http::Uri` drops a `#fragment`, so a server that wants fragments
/// rejected can put the raw target into the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget(pub String);

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Storage, locking and authentication backend.
    backend: Backend,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Realm sent with a 401 reply.
    realm: String,
    /// Value of the X-Dav-Powered-By header.
    powered_by: Option<String>,
    /// read buffer size in bytes
    read_buf_size: usize,
}

/// Backend.
#[derive(Clone)]
pub enum Backend {
    /// Ephemeral in-memory tree.
    #[cfg(any(docsrs, feature = "memfs"))]
    Mem,
    /// Serve a local directory.
    #[cfg(any(docsrs, feature = "localfs"))]
    Local {
        /// Path to the root directory.
        base: PathBuf,
        public: bool,
    },
    /// Any other implementation of [`DavBackend`].
    Custom(Arc<dyn DavBackend>),
}

impl Backend {
    /// Serve a local directory
    #[cfg(any(docsrs, feature = "localfs"))]
    pub fn local(path: impl Into<PathBuf>, public: bool) -> Self {
        Backend::Local {
            base: path.into(),
            public,
        }
    }

    /// Use your own backend.
    pub fn custom(backend: impl DavBackend + 'static) -> Self {
        Backend::Custom(Arc::new(backend))
    }

    fn build(self) -> Arc<dyn DavBackend> {
        match self {
            #[cfg(any(docsrs, feature = "memfs"))]
            Backend::Mem => Arc::new(crate::backend::memfs::MemFs::new()),
            #[cfg(any(docsrs, feature = "localfs"))]
            Backend::Local { base, public } => Arc::new(crate::backend::localfs::LocalFs::new(base, public)),
            Backend::Custom(backend) => backend,
        }
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(backend: Backend) -> DavBuilder {
        Self {
            prefix: String::new(),
            backend,
            allow: DavMethodSet::all(),
            realm: "WebDAV".to_string(),
            powered_by: None,
            read_buf_size: READ_BUF_SIZE,
        }
    }

    /// Use the configuration that was built to generate a DavConfig.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a resource path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Set the backend to use.
    pub fn backend(self, backend: Backend) -> Self {
        let mut this = self;
        this.backend = backend;
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Authentication realm (default is `WebDAV`).
    pub fn realm(self, realm: impl Into<String>) -> Self {
        let mut this = self;
        this.realm = realm.into();
        this
    }

    /// Override the value of the `X-Dav-Powered-By` header.
    pub fn powered_by(self, powered_by: impl Into<String>) -> Self {
        let mut this = self;
        this.powered_by = Some(powered_by.into());
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size;
        this
    }
}

/// The webdav handler struct.
///
/// The `new` and `build` etc methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) backend: Arc<dyn DavBackend>,
    pub(crate) allow: DavMethodSet,
    pub(crate) realm: Arc<String>,
    pub(crate) powered_by: Arc<String>,
    pub(crate) read_buf_size: usize,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let powered_by = cfg
            .powered_by
            .unwrap_or_else(|| format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));
        Self {
            prefix: Arc::new(cfg.prefix),
            backend: cfg.backend.build(),
            allow: cfg.allow,
            realm: Arc::new(cfg.realm),
            powered_by: Arc::new(powered_by),
            read_buf_size: cfg.read_buf_size,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(backend: Backend) -> DavBuilder {
        DavBuilder::new(backend)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// `prefix` is appended to the configured prefix, `powered_by`
    /// replaces the identification header for this request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        powered_by: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(powered_by) = powered_by {
            this.powered_by = Arc::new(powered_by);
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        powered_by: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(prefix);
        }
        if let Some(powered_by) = powered_by {
            this.powered_by = Arc::new(powered_by);
        }
        this.handle_inner(req).await
    }
}

// request-target without scheme and authority.
fn target_path(target: &str) -> String {
    if target.starts_with('/') || target == "*" {
        return target.to_string();
    }
    match url::Url::parse(target) {
        Ok(url) => match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        },
        Err(_) => target.to_string(),
    }
}

impl DavHandler {
    /// Methods that this handler will dispatch: allowed by the
    /// configuration and implemented by the backend.
    pub(crate) fn implemented(&self) -> DavMethodSet {
        let mut m = self.backend.methods() | DavMethod::OPTIONS;
        // HEAD is emulated by GET.
        if m.contains(DavMethod::GET) {
            m |= DavMethod::HEAD;
        }
        if !self.backend.can_check_lock() {
            m.remove(DavMethod::LOCK | DavMethod::UNLOCK);
        }
        m & self.allow
    }

    pub(crate) fn allow_header(&self) -> String {
        let m = self.implemented();
        ALLOW_ORDER
            .iter()
            .filter(|(method, _)| m.contains(*method))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn method_not_allowed(&self) -> DavResult<Response<Body>> {
        let mut resp = status_response(StatusCode::METHOD_NOT_ALLOWED);
        resp.headers_mut().insert(ALLOW, hval(&self.allow_header())?);
        Ok(resp)
    }

    // drain request body and return length.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        // Turn any DavError results into a HTTP error response.
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = match err.body_text() {
                    Some(text) => {
                        let mut resp = Response::new(Body::from(format!("{text}\n")));
                        resp.headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                        resp
                    }
                    None => status_response(err.statuscode()),
                };
                *resp.status_mut() = err.statuscode();
                let h = resp.headers_mut();
                if is_ms && err.statuscode() == StatusCode::NOT_FOUND {
                    // This is an attempt to convince Windows to not
                    // cache a 404 NOT_FOUND for 30-60 seconds.
                    //
                    // That is a problem since windows caches the NOT_FOUND in a
                    // case-insensitive way. So if "www" does not exist, but "WWW" does,
                    // and you do a "dir www" and then a "dir WWW" the second one
                    // will fail.
                    h.insert("Cache-Control", HeaderValue::from_static("no-store, no-cache, must-revalidate"));
                    h.insert("Pragma", HeaderValue::from_static("no-cache"));
                    h.insert("Expires", HeaderValue::from_static("0"));
                    h.insert("Vary", HeaderValue::from_static("*"));
                }
                if err.must_close() {
                    h.insert(CONNECTION, HeaderValue::from_static("close"));
                }
                resp
            }
        };

        // identify ourselves, and mirror the status.
        let status = status_line(resp.status());
        let status = status.trim_start_matches("HTTP/1.1 ");
        let h = resp.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&self.powered_by) {
            h.insert(X_DAV_POWERED_BY.clone(), v);
        }
        if let Ok(v) = HeaderValue::from_str(status) {
            h.insert(X_WEBDAV_STATUS.clone(), v);
        }
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if log_enabled!(log::Level::Debug) {
            if let Some(t) = req.headers().typed_get::<davheaders::XLitmus>() {
                debug!("X-Litmus: {:?}", t);
            }
        }

        // a fragment is never valid in a request-URI.
        let raw = match req.extensions().get::<RequestTarget>() {
            Some(t) => t.0.clone(),
            None => req
                .uri()
                .path_and_query()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| req.uri().path().to_string()),
        };
        if raw.contains('#') {
            debug!("refusing request-target with fragment: {}", raw);
            return Err(StatusCode::BAD_REQUEST.into());
        }

        // make sure the request path is valid.
        let (path, was_empty) = DavPath::from_target_and_prefix(&target_path(&raw), &self.prefix)?;
        let method = dav_method(req.method()).ok();

        // collections must be addressed with a trailing slash.
        if was_empty && method == Some(DavMethod::GET) {
            let mut resp = status_response(StatusCode::FOUND);
            resp.headers_mut()
                .insert(LOCATION, hval(&format!("{}/", self.prefix.trim_end_matches('/')))?);
            return Ok(resp);
        }

        // OPTIONS on / is allowed without credentials, so that clients
        // can probe for capabilities.
        if self.backend.can_check_auth() && !(method == Some(DavMethod::OPTIONS) && path.is_root()) {
            let (auth_type, user, pass) = match req.headers().typed_get::<Authorization<Basic>>() {
                Some(Authorization(basic)) => (
                    Some("Basic"),
                    Some(basic.username().to_string()),
                    Some(basic.password().to_string()),
                ),
                None => (None, None, None),
            };
            let ok = self
                .backend
                .check_auth(auth_type, user.as_deref(), pass.as_deref())
                .await
                .unwrap_or(false);
            if !ok {
                debug!("authentication failed for {}", path);
                let mut resp = status_response(StatusCode::UNAUTHORIZED);
                let realm = format!("Basic realm=\"{}\"", self.realm.replace('"', ""));
                resp.headers_mut().insert(WWW_AUTHENTICATE, hval(&realm)?);
                return Ok(resp);
            }
        }

        self.check_if_header(req.headers(), &path).await?;

        // translate HTTP method to Webdav method.
        let method = match method {
            Some(m) => m,
            None => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return self.method_not_allowed();
            }
        };

        // see if method is implemented and allowed.
        if !self.implemented().contains(method) {
            debug!(
                "method {} not implemented on request {}",
                req.method(),
                req.uri()
            );
            if method == DavMethod::LOCK {
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
            return self.method_not_allowed();
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        if method == DavMethod::PUT {
            return self.handle_put(&req, path, body).await;
        }
        let body_data = self.read_request(body, MAX_XML_BODY).await?;

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        match method {
            DavMethod::OPTIONS => self.handle_options(&req, &path).await,
            DavMethod::PROPFIND => self.handle_propfind(&req, path, &body_data).await,
            DavMethod::PROPPATCH => self.handle_proppatch(&req, path, &body_data).await,
            DavMethod::MKCOL => self.handle_mkcol(&req, path).await,
            DavMethod::DELETE => self.handle_delete(&req, path).await,
            DavMethod::LOCK => self.handle_lock(&req, path, &body_data).await,
            DavMethod::UNLOCK => self.handle_unlock(&req, path).await,
            DavMethod::HEAD | DavMethod::GET => self.handle_get(&req, path, method).await,
            DavMethod::COPY | DavMethod::MOVE => self.handle_copymove(&req, path, method).await,
            _ => self.method_not_allowed(),
        }
    }
}
