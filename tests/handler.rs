use http::{HeaderMap, Request, StatusCode};

use webdav_engine::backend::memfs::MemFs;
use webdav_engine::{Backend, DavHandler, DavMethod, RequestTarget};

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .map(|v| v.to_str().unwrap())
            .unwrap_or("")
    }
}

async fn call(dav: &DavHandler, req: Request<hyper::Body>) -> Reply {
    let resp = dav.handle(req).await;
    let (parts, body) = resp.into_parts();
    let body = hyper::body::to_bytes(body).await.unwrap();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }
}

fn req(method: &str, uri: &str) -> http::request::Builder {
    Request::builder().method(method).uri(uri)
}

fn empty(builder: http::request::Builder) -> Request<hyper::Body> {
    builder.body(hyper::Body::empty()).unwrap()
}

fn with_body(builder: http::request::Builder, body: &str) -> Request<hyper::Body> {
    builder.body(hyper::Body::from(body.to_string())).unwrap()
}

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>http://example.org/~me</D:href></D:owner>
</D:lockinfo>"#;

async fn put_file(dav: &DavHandler, path: &str, data: &str) -> StatusCode {
    let r = req("PUT", path).header("Content-Type", "text/plain");
    call(dav, with_body(r, data)).await.status
}

#[tokio::test]
async fn test_options() {
    let dav = DavHandler::builder(Backend::Mem).build();
    let r = call(&dav, empty(req("OPTIONS", "/"))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("DAV"), "1, 2");
    assert_eq!(r.header("MS-Author-Via"), "DAV");
    assert!(r.header("Allow").contains("PROPFIND"));
    assert!(r.header("Allow").contains("LOCK"));
    assert_eq!(r.header("X-WebDAV-Status"), "200 OK");
    assert!(!r.header("X-Dav-Powered-By").is_empty());
}

#[tokio::test]
async fn test_fragment_rejected() {
    let dav = DavHandler::builder(Backend::Mem).build();
    let mut request = empty(req("GET", "/a"));
    request.extensions_mut().insert(RequestTarget("/a#frag".to_string()));
    let r = call(&dav, request).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_redirect_to_collection() {
    let dav = DavHandler::builder(Backend::Mem).strip_prefix("/dav").build();
    let r = call(&dav, empty(req("GET", "/dav"))).await;
    assert_eq!(r.status, StatusCode::FOUND);
    assert_eq!(r.header("Location"), "/dav/");

    let r = call(&dav, empty(req("GET", "/other/x"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_get_head() {
    let dav = DavHandler::builder(Backend::Mem).build();
    assert_eq!(put_file(&dav, "/f.txt", "hello world").await, StatusCode::CREATED);
    assert_eq!(put_file(&dav, "/f.txt", "hello world").await, StatusCode::NO_CONTENT);

    let r = call(&dav, empty(req("GET", "/f.txt"))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "hello world");
    assert_eq!(r.header("Content-Type"), "text/plain");
    assert_eq!(r.header("Content-Length"), "11");
    assert!(!r.header("Last-Modified").is_empty());

    let r = call(&dav, empty(req("HEAD", "/f.txt"))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("Content-Length"), "11");
    assert!(r.body.is_empty());

    let r = call(&dav, empty(req("GET", "/nope.txt"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(r.header("X-WebDAV-Status"), "404 Not Found");

    // no parent collection.
    assert_eq!(put_file(&dav, "/x/y.txt", "data").await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_partial_put() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello world").await;
    let r = req("PUT", "/f.txt").header("Content-Range", "bytes 0-4/11");
    assert_eq!(call(&dav, with_body(r, "HELLO")).await.status, StatusCode::NO_CONTENT);
    let r = call(&dav, empty(req("GET", "/f.txt"))).await;
    assert_eq!(r.body, "HELLO world");
    assert_eq!(r.header("Content-Type"), "text/plain");
}

#[tokio::test]
async fn test_partial_put_body_outside_window() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello world").await;

    // chunked body, longer than the range it claims to cover.
    let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("HEL"), Ok("LOXX"), Ok("XXXXXXX")];
    let body = hyper::Body::wrap_stream(futures_util::stream::iter(chunks));
    let r = req("PUT", "/f.txt").header("Content-Range", "bytes 0-4/11");
    assert_eq!(call(&dav, r.body(body).unwrap()).await.status, StatusCode::NO_CONTENT);
    let r = call(&dav, empty(req("GET", "/f.txt"))).await;
    assert_eq!(r.body, "HELLO world");

    // a body that stops short of the range is refused.
    let r = req("PUT", "/f.txt").header("Content-Range", "bytes 6-10/11");
    assert_eq!(call(&dav, with_body(r, "WO")).await.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ranges() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello world").await;

    let r = call(&dav, empty(req("GET", "/f.txt").header("Range", "bytes=0-4"))).await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "hello");
    assert_eq!(r.header("Content-Range"), "bytes 0-4/11");
    assert_eq!(r.header("Content-Length"), "5");

    let r = call(&dav, empty(req("GET", "/f.txt").header("Range", "bytes=-5"))).await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(r.body, "world");
    assert_eq!(r.header("Content-Range"), "bytes 6-10/11");

    let r = call(&dav, empty(req("GET", "/f.txt").header("Range", "bytes=20-30"))).await;
    assert_eq!(r.status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(r.header("Content-Range"), "bytes */11");

    let r = call(&dav, empty(req("GET", "/f.txt").header("Range", "bytes=0-1,6-7"))).await;
    assert_eq!(r.status, StatusCode::PARTIAL_CONTENT);
    let ct = r.header("Content-Type");
    assert!(ct.starts_with("multipart/byteranges; boundary=SEPARATOR_"));
    let boundary = ct.split("boundary=").nth(1).unwrap();
    assert_eq!(r.header("Content-Length"), r.body.len().to_string());
    assert!(r.body.contains("Content-range: bytes 0-1/11\r\n\r\nhe\r\n"));
    assert!(r.body.contains("Content-range: bytes 6-7/11\r\n\r\nwo\r\n"));
    assert!(r.body.ends_with(&format!("\r\n--{boundary}--\r\n")));
}

#[tokio::test]
async fn test_put_rejects_unknown_content_headers() {
    let dav = DavHandler::builder(Backend::Mem).build();
    let r = req("PUT", "/f.txt").header("Content-Encoding", "gzip");
    let r = call(&dav, with_body(r, "x")).await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);
    assert!(r.body.contains("'gzip' content encoding"));

    let r = req("PUT", "/f.txt").header("Content-Type", "multipart/mixed; boundary=x");
    let r = call(&dav, with_body(r, "x")).await;
    assert_eq!(r.status, StatusCode::NOT_IMPLEMENTED);

    let r = req("PUT", "/f.txt").header("Content-Range", "bytes 0-4,6-7/11");
    let r = call(&dav, with_body(r, "x")).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_propfind_propname() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello world").await;

    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
    let r = call(&dav, with_body(req("PROPFIND", "/f.txt").header("Depth", "0"), find)).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:href>/f.txt</D:href>"));
    assert!(r.body.contains("<D:getcontentlength/>"));
    assert!(r.body.contains("<D:getetag/>"));
    assert!(r.body.contains("<D:displayname/>"));
    assert!(!r.body.contains("</D:getcontentlength>"));
    assert!(!r.body.contains("</D:displayname>"));
    assert!(!r.body.contains("text/plain"));
}

#[tokio::test]
async fn test_propfind_proppatch() {
    let dav = DavHandler::builder(Backend::Mem).build();
    assert_eq!(call(&dav, empty(req("MKCOL", "/dir"))).await.status, StatusCode::CREATED);
    put_file(&dav, "/dir/a%20b.txt", "abc").await;

    let r = call(&dav, empty(req("PROPFIND", "/dir/").header("Depth", "1"))).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.header("Content-Type").starts_with("text/xml"));
    assert!(r.body.contains("<D:href>/dir/</D:href>"));
    assert!(r.body.contains("<D:href>/dir/a%20b.txt</D:href>"));
    assert!(r.body.contains("<D:collection/>"));
    assert!(r.body.contains("<D:getcontentlength>3</D:getcontentlength>"));

    let patch = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:example">
  <D:set><D:prop><Z:color>red</Z:color></D:prop></D:set>
  <D:set><D:prop><D:getetag>nope</D:getetag></D:prop></D:set>
</D:propertyupdate>"#;
    let r = call(&dav, with_body(req("PROPPATCH", "/dir/a%20b.txt"), patch)).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<color xmlns=\"urn:example\"/>"));
    assert!(r.body.contains("HTTP/1.1 200 OK"));
    assert!(r.body.contains("HTTP/1.1 403 Forbidden"));

    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:Z="urn:example">
  <D:prop><Z:color/><Z:size/></D:prop>
</D:propfind>"#;
    let r = call(&dav, with_body(req("PROPFIND", "/dir/a%20b.txt").header("Depth", "0"), find)).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<ns1:color>red</ns1:color>"));
    assert!(r.body.contains("<ns1:size/>"));
    assert!(r.body.contains("HTTP/1.1 404 Not Found"));

    let r = call(&dav, empty(req("PROPFIND", "/missing"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);

    let r = call(&dav, with_body(req("PROPFIND", "/dir/"), "<not-xml")).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lock_flow() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello").await;

    let r = call(&dav, with_body(req("LOCK", "/f.txt").header("Timeout", "Second-600"), LOCKINFO)).await;
    assert_eq!(r.status, StatusCode::OK);
    let token = r.header("Lock-Token").to_string();
    assert!(token.starts_with("<opaquelocktoken:"));
    assert!(r.body.contains("<D:lockdiscovery>"));
    assert!(r.body.contains("<D:exclusive/>"));
    assert!(r.body.contains("http://example.org/~me"));

    // a second exclusive lock conflicts.
    let r = call(&dav, with_body(req("LOCK", "/f.txt"), LOCKINFO)).await;
    assert_eq!(r.status, StatusCode::LOCKED);

    // writes need the token.
    assert_eq!(put_file(&dav, "/f.txt", "x").await, StatusCode::LOCKED);
    let r = req("PUT", "/f.txt").header("If", format!("({token})"));
    assert_eq!(call(&dav, with_body(r, "bye")).await.status, StatusCode::NO_CONTENT);

    // lockdiscovery shows up on request.
    let find = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:"><D:prop><D:lockdiscovery/></D:prop></D:propfind>"#;
    let r = call(&dav, with_body(req("PROPFIND", "/f.txt").header("Depth", "0"), find)).await;
    assert!(r.body.contains("<D:activelock>"));
    assert!(r.body.contains(token.trim_start_matches('<').trim_end_matches('>')));

    // refresh.
    let r = call(&dav, empty(req("LOCK", "/f.txt").header("If", format!("({token})")))).await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.header("Lock-Token"), token);

    let r = call(&dav, empty(req("UNLOCK", "/f.txt").header("Lock-Token", token.as_str()))).await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    assert_eq!(put_file(&dav, "/f.txt", "x").await, StatusCode::NO_CONTENT);

    let r = call(&dav, empty(req("UNLOCK", "/f.txt"))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lock_null_resource() {
    let dav = DavHandler::builder(Backend::Mem).build();
    let r = call(&dav, with_body(req("LOCK", "/new.txt"), LOCKINFO)).await;
    assert_eq!(r.status, StatusCode::OK);
    let r = call(&dav, empty(req("PROPFIND", "/new.txt").header("Depth", "0"))).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);
    assert!(r.body.contains("<D:displayname>new.txt</D:displayname>"));
}

#[tokio::test]
async fn test_if_header() {
    let dav = DavHandler::builder(Backend::Mem).build();
    put_file(&dav, "/f.txt", "hello").await;

    let r = req("PUT", "/f.txt").header("If", "(<opaquelocktoken:not-a-uuid>)");
    assert_eq!(call(&dav, with_body(r, "x")).await.status, StatusCode::LOCKED);

    let r = req("PUT", "/f.txt").header("If", "(<urn:nothing>)");
    assert_eq!(call(&dav, with_body(r, "x")).await.status, StatusCode::PRECONDITION_FAILED);

    let r = req("PUT", "/f.txt").header("If", "(Not <urn:nothing>)");
    assert_eq!(call(&dav, with_body(r, "x")).await.status, StatusCode::NO_CONTENT);

    let r = req("PUT", "/f.txt").header("If", "(<urn:nothing>");
    assert_eq!(call(&dav, with_body(r, "x")).await.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_authentication() {
    let dav = DavHandler::builder(Backend::custom(MemFs::new().with_credentials("u", "p")))
        .realm("test")
        .build();

    let r = call(&dav, empty(req("PROPFIND", "/"))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);
    assert_eq!(r.header("WWW-Authenticate"), "Basic realm=\"test\"");

    let r = call(&dav, empty(req("PROPFIND", "/").header("Authorization", "Basic dTp4"))).await;
    assert_eq!(r.status, StatusCode::UNAUTHORIZED);

    let r = call(&dav, empty(req("PROPFIND", "/").header("Authorization", "Basic dTpw"))).await;
    assert_eq!(r.status, StatusCode::MULTI_STATUS);

    // capabilities can be probed without credentials.
    let r = call(&dav, empty(req("OPTIONS", "/"))).await;
    assert_eq!(r.status, StatusCode::OK);
}

#[tokio::test]
async fn test_restricted_methods() {
    let allow = DavMethod::OPTIONS | DavMethod::GET | DavMethod::HEAD | DavMethod::PUT;
    let dav = DavHandler::builder(Backend::Mem).methods(allow).build();

    let r = call(&dav, empty(req("OPTIONS", "/"))).await;
    assert_eq!(r.header("DAV"), "1");
    assert_eq!(r.header("Allow"), "OPTIONS, GET, HEAD, PUT");

    let r = call(&dav, with_body(req("LOCK", "/f.txt"), LOCKINFO)).await;
    assert_eq!(r.status, StatusCode::PRECONDITION_FAILED);

    let r = call(&dav, empty(req("DELETE", "/f.txt"))).await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(r.header("Allow"), "OPTIONS, GET, HEAD, PUT");

    let r = call(&dav, empty(req("BREW", "/pot"))).await;
    assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_delete_mkcol() {
    let dav = DavHandler::builder(Backend::Mem).build();
    assert_eq!(call(&dav, empty(req("MKCOL", "/d/"))).await.status, StatusCode::CREATED);
    assert_eq!(call(&dav, empty(req("MKCOL", "/d/"))).await.status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        call(&dav, with_body(req("MKCOL", "/e/"), "<x/>")).await.status,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    put_file(&dav, "/d/f.txt", "x").await;

    let r = call(&dav, empty(req("DELETE", "/d/").header("Depth", "0"))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);
    let r = call(&dav, empty(req("DELETE", "/d/"))).await;
    assert_eq!(r.status, StatusCode::NO_CONTENT);
    let r = call(&dav, empty(req("GET", "/d/f.txt"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    let r = call(&dav, empty(req("DELETE", "/d/"))).await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_copy_move() {
    let dav = DavHandler::builder(Backend::Mem).strip_prefix("/dav").build();
    put_file(&dav, "/dav/a.txt", "aaa").await;
    put_file(&dav, "/dav/b.txt", "bbb").await;

    let r = call(&dav, empty(req("COPY", "/dav/a.txt").header("Destination", "/dav/c.txt"))).await;
    assert_eq!(r.status, StatusCode::CREATED);
    let r = call(&dav, empty(req("GET", "/dav/c.txt"))).await;
    assert_eq!(r.body, "aaa");

    let r = req("MOVE", "/dav/a.txt")
        .header("Destination", "http://localhost/dav/b.txt")
        .header("Host", "localhost")
        .header("Overwrite", "F");
    assert_eq!(call(&dav, empty(r)).await.status, StatusCode::PRECONDITION_FAILED);

    let r = req("MOVE", "/dav/a.txt")
        .header("Destination", "http://localhost/dav/b.txt")
        .header("Host", "localhost");
    assert_eq!(call(&dav, empty(r)).await.status, StatusCode::NO_CONTENT);
    assert_eq!(call(&dav, empty(req("GET", "/dav/a.txt"))).await.status, StatusCode::NOT_FOUND);
    assert_eq!(call(&dav, empty(req("GET", "/dav/b.txt"))).await.body, "aaa");

    let r = call(&dav, empty(req("COPY", "/dav/b.txt"))).await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let r = req("COPY", "/dav/b.txt")
        .header("Destination", "http://elsewhere.example/dav/x.txt")
        .header("Host", "localhost");
    assert_eq!(call(&dav, empty(r)).await.status, StatusCode::BAD_GATEWAY);
}
