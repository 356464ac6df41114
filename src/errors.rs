use std::error::Error;
use std::io::{self, ErrorKind};

use http::StatusCode;
use xml::reader::Error as XmlReaderError;

use crate::backend::BackendError;

#[derive(Debug)]
pub(crate) enum DavError {
    XmlParseError, // error interpreting xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path outside the mount prefix
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Utf8Error,
    Status(StatusCode),
    StatusBody(StatusCode, String),
    BackendError(BackendError),
    IoError(io::Error),
    XmlReaderError(XmlReaderError),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::BackendError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::BackendError(e) => write!(f, "Backend Error: {e}"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::StatusBody(s, msg) => write!(f, "{s}: {msg}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<BackendError> for DavError {
    fn from(e: BackendError) -> Self {
        DavError::BackendError(e)
    }
}

impl From<DavError> for io::Error {
    fn from(e: DavError) -> Self {
        match e {
            DavError::IoError(e) => e,
            DavError::BackendError(e) => e.into(),
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<XmlReaderError> for DavError {
    fn from(e: XmlReaderError) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<std::str::Utf8Error> for DavError {
    fn from(_: std::str::Utf8Error) -> Self {
        DavError::Utf8Error
    }
}

impl From<std::string::FromUtf8Error> for DavError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        DavError::Utf8Error
    }
}

fn ioerror_to_status(ioerror: &io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::NOT_FOUND,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Utf8Error => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::BackendError(e) => e.statuscode(),
            DavError::Status(e) => *e,
            DavError::StatusBody(e, _) => *e,
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::StatusBody(..)
                | &DavError::BackendError(BackendError::NotFound)
                | &DavError::BackendError(BackendError::Forbidden)
                | &DavError::BackendError(BackendError::Exists)
        )
    }

    // explanatory text to send along with the status, if any.
    pub(crate) fn body_text(&self) -> Option<&str> {
        match self {
            DavError::StatusBody(_, msg) => Some(msg.as_str()),
            _ => None,
        }
    }
}

pub(crate) type DavResult<T> = Result<T, DavError>;
