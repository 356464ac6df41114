//! ## WebDAV request engine
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//!
//! This library is a `handler`: it takes a `http::Request`, works out what
//! the client wants, and produces a `http::Response`. It does the protocol
//! work: method dispatch, authentication, `If:` header evaluation and lock
//! enforcement, PROPFIND/PROPPATCH multistatus documents, ranged GET with
//! `multipart/byteranges`, validation of PUT bodies and the LOCK/UNLOCK
//! exchange. Storage is delegated to a [backend][DavBackend].
//!
//! ## Backend interface.
//!
//! A backend implements [`DavBackend`]. Every storage operation is a
//! single call (`get`, `put`, `delete`, `copy`, `propfind`, `lock`, ...)
//! that returns plain data; the handler turns that into HTTP. A backend
//! that does not implement an operation returns
//! [`BackendError::NotImplemented`], and [`DavBackend::methods`] tells the
//! handler which methods to advertise and dispatch.
//!
//! Included are two backends:
//!
//! - [`MemFs`][backend::memfs::MemFs]: ephemeral in-memory tree with dead
//!   properties, locks and optional Basic authentication.
//! - [`LocalFs`][backend::localfs::LocalFs]: serves a directory on the
//!   local filesystem.
//!
//! ## Example.
//!
//! Example server using [hyper] that serves an in-memory tree.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use webdav_engine::{Backend, DavHandler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!
//!     let dav_server = DavHandler::builder(Backend::Mem).build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multistatus;
mod util;
mod xmlparse;

pub mod backend;
pub mod body;
pub mod davpath;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub(crate) use crate::errors::DavResult;

pub use crate::backend::{BackendError, DavBackend, DavFile};
pub use crate::davhandler::{Backend, DavBuilder, DavHandler, RequestTarget};
pub use crate::davheaders::{ByteRange, ContentRange, Depth};
pub use crate::util::{DavMethod, DavMethodSet};
