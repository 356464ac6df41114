//! Response body, and an adapter for stream-shaped request bodies.
//!
//! Replies built from a `String` or `Bytes` are sent in one piece, and
//! report their exact size through `http_body::Body::size_hint`. File
//! content and `multipart/byteranges` replies are streamed.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use pin_project::pin_project;

/// Body of a reply produced by the handler. Implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Full(Option<Bytes>),
    Streaming(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            kind: Kind::Full(None),
        }
    }

    /// Create a body from a stream.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            kind: Kind::Streaming(Box::pin(stream)),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Full(Some(ref b)) => write!(f, "Body({} bytes)", b.len()),
            Kind::Full(None) => f.write_str("Body(empty)"),
            Kind::Streaming(_) => f.write_str("Body(stream)"),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.kind {
            // an empty chunk is not worth sending.
            Kind::Full(ref mut bytes) => Poll::Ready(bytes.take().filter(|b| !b.is_empty()).map(Ok)),
            Kind::Streaming(ref mut stream) => stream.as_mut().poll_next(cx),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<io::Result<Bytes>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<Option<HeaderMap>>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.kind, Kind::Full(None))
    }

    fn size_hint(&self) -> SizeHint {
        match self.kind {
            Kind::Full(Some(ref b)) => SizeHint::with_exact(b.len() as u64),
            Kind::Full(None) => SizeHint::with_exact(0),
            Kind::Streaming(_) => SizeHint::default(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body {
            kind: Kind::Full(Some(b)),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::from(Bytes::from(s))
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Body {
        Body::from(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Body {
        Body::from(Bytes::from(v))
    }
}

/// Request body for `DavHandler::handle_stream`: a `Stream` of chunks
/// presented as an `http_body::Body`.
#[pin_project]
pub(crate) struct StreamBody<S> {
    #[pin]
    stream: S,
}

impl<S> StreamBody<S> {
    pub(crate) fn new(stream: S) -> StreamBody<S> {
        StreamBody { stream }
    }
}

impl<S, D, E> HttpBody for StreamBody<S>
where
    S: Stream<Item = Result<D, E>>,
    D: Buf + Send,
    E: StdError + Send + Sync + 'static,
{
    type Data = D;
    type Error = E;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<D, E>>> {
        self.project().stream.poll_next(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Result<Option<HeaderMap>, E>> {
        Poll::Ready(Ok(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_full_body() {
        let body = Body::from("hello");
        assert_eq!(HttpBody::size_hint(&body).exact(), Some(5));
        let chunks: Vec<_> = StreamExt::collect(body).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].as_ref().unwrap()[..], b"hello");

        let body = Body::empty();
        assert!(HttpBody::is_end_stream(&body));
        let chunks: Vec<_> = StreamExt::collect(body).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_stream_body() {
        let parts = vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))];
        let body = Body::stream(futures_util::stream::iter(parts));
        assert_eq!(HttpBody::size_hint(&body).exact(), None);
        let data: Vec<u8> = StreamExt::map(body, |c| c.unwrap().to_vec()).concat().await;
        assert_eq!(data, b"ab");
    }
}
