//! Contains the structs and traits that define a `backend`.
//!
//! The request engine itself keeps no state. Resource content, properties,
//! locks and credentials all live behind the [`DavBackend`] trait. A backend
//! implements any subset of the WebDAV methods and advertises which ones
//! through [`DavBackend::methods`]; the dispatcher never calls a method that
//! is not advertised.
//!
//! Two backends are included: [`MemFs`](memfs::MemFs), an ephemeral
//! in-memory tree, and [`LocalFs`](localfs::LocalFs), which serves a
//! directory on the local filesystem.
use std::fmt::Debug;
use std::future::Future;
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future;
use http::{Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{ByteRange, ContentRange, Depth};
use crate::davpath::DavPath;
use crate::util::DavMethodSet;

#[cfg(any(docsrs, feature = "localfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "localfs")))]
pub mod localfs;
#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;
#[cfg(any(docsrs, feature = "memfs", feature = "localfs"))]
pub(crate) mod memls;

macro_rules! notimplemented_fut {
    ($method:expr) => {{
        trace!("BACKEND: {} is not implemented", $method);
        Box::pin(future::ready(Err(BackendError::NotImplemented)))
    }};
}

/// Namespace of the properties defined by RFC4918.
pub const NS_DAV_URI: &str = "DAV:";

/// Errors generated by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    NotImplemented,
    GeneralFailure,
    Exists,
    NotFound,
    Forbidden,
    Conflict,
    InsufficientStorage,
    IsRemote,
    TooLarge,
}

/// The Result type.
pub type BackendResult<T> = Result<T, BackendError>;

/// Future returned by almost all of the DavBackend methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;

impl BackendError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            BackendError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            BackendError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
            BackendError::Exists => StatusCode::METHOD_NOT_ALLOWED,
            BackendError::NotFound => StatusCode::NOT_FOUND,
            BackendError::Forbidden => StatusCode::FORBIDDEN,
            BackendError::Conflict => StatusCode::CONFLICT,
            BackendError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
            BackendError::IsRemote => StatusCode::BAD_GATEWAY,
            BackendError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl std::error::Error for BackendError {}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => BackendError::NotFound,
            ErrorKind::PermissionDenied => BackendError::Forbidden,
            ErrorKind::AlreadyExists => BackendError::Exists,
            _ => BackendError::GeneralFailure,
        }
    }
}

impl From<BackendError> for std::io::Error {
    fn from(e: BackendError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, e)
    }
}

/// Value of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    /// No value. Rendered as an empty element.
    Empty,
    /// Plain text, entity-escaped on output.
    Text(String),
    /// A timestamp. `DAV:creationdate` is rendered as RFC3339,
    /// `DAV:getlastmodified` and `DAV:lastaccessed` as RFC1123.
    Time(SystemTime),
    /// A boolean, rendered as `true` / `false`.
    Bool(bool),
    /// A pre-formatted XML fragment. Emitted verbatim inside
    /// `DAV:resourcetype`, `DAV:supportedlock` and `DAV:lockdiscovery`,
    /// escaped like text everywhere else.
    Xml(String),
}

impl PropValue {
    pub(crate) fn is_empty(&self) -> bool {
        match self {
            PropValue::Empty => true,
            PropValue::Text(s) | PropValue::Xml(s) => s.is_empty(),
            _ => false,
        }
    }

    pub(crate) fn to_text(&self) -> String {
        match self {
            PropValue::Empty => String::new(),
            PropValue::Text(s) | PropValue::Xml(s) => s.clone(),
            PropValue::Time(t) => crate::util::systemtime_to_httpdate(*t),
            PropValue::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> PropValue {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> PropValue {
        PropValue::Text(s)
    }
}

impl From<SystemTime> for PropValue {
    fn from(t: SystemTime) -> PropValue {
        PropValue::Time(t)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> PropValue {
        PropValue::Bool(b)
    }
}

impl From<u64> for PropValue {
    fn from(n: u64) -> PropValue {
        PropValue::Text(n.to_string())
    }
}

/// A property: namespace, name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavProp {
    pub namespace: String,
    pub name: String,
    pub value: PropValue,
}

impl DavProp {
    /// A property in an arbitrary namespace.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, value: impl Into<PropValue>) -> DavProp {
        DavProp {
            namespace: namespace.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// A property in the `DAV:` namespace.
    pub fn dav(name: impl Into<String>, value: impl Into<PropValue>) -> DavProp {
        DavProp::new(NS_DAV_URI, name, value)
    }

    pub(crate) fn is(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

/// The name of a property, as requested by PROPFIND.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropName {
    pub namespace: String,
    pub name: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> PropName {
        PropName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub(crate) fn matches(&self, prop: &DavProp) -> bool {
        prop.is(&self.namespace, &self.name)
    }
}

/// What a PROPFIND request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropSelection {
    /// `<allprop/>` or an empty body.
    All,
    /// `<propname/>`: names only, no values.
    Names,
    /// `<prop>`: an explicit, ordered list.
    Props(Vec<PropName>),
}

/// A resource and its properties, as returned by PROPFIND.
///
/// Collections should have a path that ends in a slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResource {
    pub path: String,
    pub props: Vec<DavProp>,
}

/// One `set` or `remove` instruction of a PROPPATCH request.
///
/// The backend sets `status` for every operation it processes;
/// it defaults to `200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropPatchOp {
    pub namespace: String,
    pub name: String,
    /// `Some(value)` for `set`, `None` for `remove`.
    pub value: Option<String>,
    pub status: StatusCode,
}

impl PropPatchOp {
    pub fn set(namespace: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> PropPatchOp {
        PropPatchOp {
            namespace: namespace.into(),
            name: name.into(),
            value: Some(value.into()),
            status: StatusCode::OK,
        }
    }

    pub fn remove(namespace: impl Into<String>, name: impl Into<String>) -> PropPatchOp {
        PropPatchOp {
            namespace: namespace.into(),
            name: name.into(),
            value: None,
            status: StatusCode::OK,
        }
    }
}

/// Content returned by GET / HEAD.
pub enum Content {
    /// No body (HEAD, or an empty resource).
    None,
    /// Inline data. Never split into ranges.
    Data(Bytes),
    /// A stream. If it is seekable, Range requests are honored.
    Stream(Box<dyn DavFile>),
}

/// A resource representation returned by GET / HEAD.
pub struct Entity {
    /// Defaults to `application/octet-stream`.
    pub mimetype: Option<String>,
    pub mtime: Option<SystemTime>,
    pub size: Option<u64>,
    pub content: Content,
}

/// Result of GET / HEAD.
pub enum GetReply {
    /// Found, the engine builds the response.
    Found(Entity),
    /// `404 Not Found`.
    NotFound,
    /// Reply with just this status.
    Status(StatusCode),
    /// The backend built the complete response itself.
    Response(Response<Body>),
}

/// Parameters of a PUT request.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub path: DavPath,
    pub content_type: String,
    pub content_language: Option<String>,
    pub content_length: Option<u64>,
    /// Validated `Content-Range` of a partial PUT.
    pub range: Option<ContentRange>,
}

/// Result of PUT.
pub enum PutReply {
    /// `403 Forbidden`.
    Forbidden,
    /// Reply with just this status.
    Status(StatusCode),
    /// The engine copies the request body into `file`. `new` selects
    /// between `201 Created` and `204 No Content`.
    Writer { file: Box<dyn DavFile>, new: bool },
}

/// Destination of a COPY or MOVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A path on this server, below the mount prefix.
    Local(DavPath),
    /// Anything else: the raw `Destination` header.
    Remote(String),
}

/// Parameters of a COPY or MOVE request.
#[derive(Debug, Clone)]
pub struct CopyMoveRequest {
    pub path: DavPath,
    pub dest: Destination,
    pub overwrite: bool,
    pub depth: Depth,
}

/// Lock scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }
}

/// A lock as reported by [`DavBackend::check_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavLock {
    pub scope: LockScope,
    pub locktype: String,
    /// XML fragment, emitted verbatim inside `<D:owner>`.
    pub owner: String,
    pub token: String,
    pub depth: Depth,
    /// Relative timeout in seconds.
    pub timeout: Option<u64>,
    /// Absolute expiry, takes precedence over `timeout`.
    pub expires: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

/// Parameters of a LOCK request.
///
/// The backend may overwrite `owner`, `scope`, `locktype` and `timeout`;
/// the values it leaves behind are reported to the client.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub path: DavPath,
    pub depth: Depth,
    /// First value of the `Timeout` header. A number above 1000000 is
    /// taken as an absolute unix time.
    pub timeout: Option<String>,
    pub scope: LockScope,
    pub locktype: String,
    pub owner: String,
    pub token: String,
    /// Set when refreshing: the token of the lock being refreshed.
    pub update: Option<String>,
}

/// A readable and/or writable handle to the content of a resource.
pub trait DavFile: Debug + Send + Sync {
    /// Read at most `count` bytes. An empty result means end-of-file.
    fn read_bytes(&mut self, count: usize) -> BackendFuture<'_, Bytes>;
    fn write_bytes(&mut self, buf: Bytes) -> BackendFuture<'_, ()>;
    /// Fails if the stream is not seekable.
    fn seek(&mut self, pos: SeekFrom) -> BackendFuture<'_, u64>;
    fn flush(&mut self) -> BackendFuture<'_, ()>;
}

/// The storage, locking and authentication collaborator.
///
/// All methods have a default implementation that returns
/// `BackendError::NotImplemented`; [`methods`](DavBackend::methods)
/// decides which ones the engine calls.
pub trait DavBackend: Send + Sync {
    /// The WebDAV methods this backend implements.
    fn methods(&self) -> DavMethodSet;

    /// Does this backend implement `check_lock`.
    fn can_check_lock(&self) -> bool {
        false
    }

    /// Does this backend implement `check_auth`. If not, no
    /// authentication is required.
    fn can_check_auth(&self) -> bool {
        false
    }

    #[allow(unused_variables)]
    fn get<'a>(&'a self, path: &'a DavPath, ranges: &'a [ByteRange]) -> BackendFuture<'a, GetReply> {
        notimplemented_fut!("get")
    }

    #[allow(unused_variables)]
    fn head<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, GetReply> {
        notimplemented_fut!("head")
    }

    #[allow(unused_variables)]
    fn put<'a>(&'a self, req: &'a PutRequest) -> BackendFuture<'a, PutReply> {
        notimplemented_fut!("put")
    }

    #[allow(unused_variables)]
    fn delete<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("delete")
    }

    #[allow(unused_variables)]
    fn copy<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("copy")
    }

    #[allow(unused_variables)]
    fn move_<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("move")
    }

    #[allow(unused_variables)]
    fn mkcol<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("mkcol")
    }

    /// `Ok(None)` declines: the engine then answers `404 Not Found`,
    /// unless the path is locked.
    #[allow(unused_variables)]
    fn propfind<'a>(
        &'a self,
        path: &'a DavPath,
        depth: Depth,
        selection: &'a PropSelection,
    ) -> BackendFuture<'a, Option<Vec<DavResource>>> {
        notimplemented_fut!("propfind")
    }

    /// Sets `status` on each operation, and optionally returns a
    /// free-text response description.
    #[allow(unused_variables)]
    fn proppatch<'a>(
        &'a self,
        path: &'a DavPath,
        ops: &'a mut Vec<PropPatchOp>,
    ) -> BackendFuture<'a, Option<String>> {
        notimplemented_fut!("proppatch")
    }

    #[allow(unused_variables)]
    fn lock<'a>(&'a self, req: &'a mut LockRequest) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("lock")
    }

    #[allow(unused_variables)]
    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str, depth: Depth) -> BackendFuture<'a, StatusCode> {
        notimplemented_fut!("unlock")
    }

    #[allow(unused_variables)]
    fn check_auth<'a>(
        &'a self,
        auth_type: Option<&'a str>,
        username: Option<&'a str>,
        password: Option<&'a str>,
    ) -> BackendFuture<'a, bool> {
        notimplemented_fut!("check_auth")
    }

    #[allow(unused_variables)]
    fn check_lock<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        notimplemented_fut!("check_lock")
    }

    /// Entity tag of a resource, used to evaluate ETag conditions in
    /// `If:` headers. `None` means unknown; such conditions then pass.
    #[allow(unused_variables)]
    fn etag<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<String>> {
        Box::pin(future::ready(Ok(None)))
    }
}

/// The `DAV:supportedlock` property for a backend that supports
/// exclusive and shared write locks.
pub fn supportedlock_prop() -> DavProp {
    let mut xml = String::new();
    for scope in ["exclusive", "shared"] {
        xml.push_str("<D:lockentry><D:lockscope><D:");
        xml.push_str(scope);
        xml.push_str("/></D:lockscope><D:locktype><D:write/></D:locktype></D:lockentry>");
    }
    DavProp::dav("supportedlock", PropValue::Xml(xml))
}
