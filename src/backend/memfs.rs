//! Simple in-memory backend.
//!
//! This backend keeps a tree of collections and files in memory, with
//! dead properties and a lock table. Everything is lost when the
//! process exits.
//!
//! Optionally, Basic authentication with a single user/password pair
//! can be required with [`MemFs::with_credentials`].
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::{future, FutureExt};
use http::StatusCode;
use parking_lot::Mutex;

use crate::backend::memls::MemLs;
use crate::backend::*;
use crate::davheaders::{ByteRange, Depth};
use crate::davpath::DavPath;
use crate::util::{merge_paths, DavMethod, DavMethodSet};

type Tree = BTreeMap<String, Node>;

#[derive(Debug, Clone)]
enum NodeKind {
    Dir,
    File { data: Vec<u8>, content_type: String },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    created: SystemTime,
    modified: SystemTime,
    props: Vec<DavProp>,
}

impl Node {
    fn new_dir() -> Node {
        let now = SystemTime::now();
        Node {
            kind: NodeKind::Dir,
            created: now,
            modified: now,
            props: Vec::new(),
        }
    }

    fn new_file(content_type: &str) -> Node {
        let now = SystemTime::now();
        Node {
            kind: NodeKind::File {
                data: Vec::new(),
                content_type: content_type.to_string(),
            },
            created: now,
            modified: now,
            props: Vec::new(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    fn len(&self) -> u64 {
        match self.kind {
            NodeKind::File { ref data, .. } => data.len() as u64,
            NodeKind::Dir => 0,
        }
    }

    fn etag(&self) -> String {
        let t = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|t| t.as_micros())
            .unwrap_or(0);
        format!("\"{:x}-{:x}\"", self.len(), t)
    }
}

/// Ephemeral in-memory backend.
#[derive(Debug)]
pub struct MemFs {
    tree: Arc<Mutex<Tree>>,
    locks: MemLs,
    credentials: Option<(String, String)>,
}

// An open file. Reads and writes go straight to the tree.
#[derive(Debug)]
struct MemFsFile {
    tree: Arc<Mutex<Tree>>,
    key: String,
    pos: usize,
}

fn key(path: &DavPath) -> String {
    path.unslashified().as_str().to_string()
}

fn parent_key(key: &str) -> String {
    match key.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(n) => key[..n].to_string(),
    }
}

fn is_below(key: &str, base: &str) -> bool {
    base == "/" || key == base || key.starts_with(&format!("{base}/"))
}

// All keys at or below `base`, in tree order.
fn subtree(tree: &Tree, base: &str) -> Vec<String> {
    tree.range(base.to_string()..)
        .map(|(k, _)| k)
        .take_while(|k| base == "/" || k.starts_with(base))
        .filter(|k| is_below(k, base))
        .cloned()
        .collect()
}

impl Default for MemFs {
    fn default() -> Self {
        MemFs::new()
    }
}

impl MemFs {
    /// Create a new, empty, in-memory tree.
    pub fn new() -> MemFs {
        let mut tree = Tree::new();
        tree.insert("/".to_string(), Node::new_dir());
        MemFs {
            tree: Arc::new(Mutex::new(tree)),
            locks: MemLs::new(),
            credentials: None,
        }
    }

    /// Require Basic authentication with this user and password.
    pub fn with_credentials(self, user: impl Into<String>, password: impl Into<String>) -> MemFs {
        MemFs {
            credentials: Some((user.into(), password.into())),
            ..self
        }
    }

    fn props(&self, path: &str, node: &Node) -> DavResource {
        let mut props = vec![
            DavProp::dav("displayname", path.rsplit('/').next().unwrap_or("")),
            DavProp::dav("creationdate", node.created),
            DavProp::dav("getlastmodified", node.modified),
        ];
        let name = path.rsplit('/').next().unwrap_or("");
        props.push(DavProp::dav("ishidden", name.starts_with('.')));
        match node.kind {
            NodeKind::Dir => {
                props.push(DavProp::dav("resourcetype", "collection"));
                props.push(DavProp::dav("getcontenttype", "httpd/unix-directory"));
            }
            NodeKind::File { ref data, ref content_type } => {
                props.push(DavProp::dav("resourcetype", ""));
                props.push(DavProp::dav("getcontenttype", content_type.as_str()));
                props.push(DavProp::dav("getcontentlength", data.len() as u64));
            }
        }
        props.push(DavProp::dav("getetag", node.etag()));
        props.push(supportedlock_prop());
        props.extend(node.props.iter().cloned());

        let path = if node.is_dir() && path != "/" {
            format!("{path}/")
        } else {
            path.to_string()
        };
        DavResource { path, props }
    }

    fn dir_index(&self, tree: &Tree, path: &DavPath) -> Bytes {
        let base = key(path);
        let mut out = String::new();
        let title = htmlescape::encode_minimal(&path.slashified().as_url_string());
        out.push_str(&format!(
            "<html><head><title>Index of {title}</title></head>\n<body><h1>Index of {title}</h1>\n<pre>\n"
        ));
        for (k, node) in tree.iter().filter(|(k, _)| *k != &base && parent_key(k) == base) {
            let name = k.rsplit('/').next().unwrap_or("");
            let name = if node.is_dir() { format!("{name}/") } else { name.to_string() };
            let href = merge_paths(&path.slashified().as_url_string(), &name);
            out.push_str(&format!(
                "<a href=\"{}\">{}</a> {:>10} {}\n",
                htmlescape::encode_minimal(&href),
                htmlescape::encode_minimal(&name),
                node.len(),
                crate::util::systemtime_to_httpdate(node.modified),
            ));
        }
        out.push_str("</pre>\n</body></html>\n");
        Bytes::from(out)
    }

    fn copy_tree(&self, tree: &mut Tree, from: &str, to: &str, depth: Depth) {
        let keys = match depth {
            Depth::Infinity => subtree(tree, from),
            _ => vec![from.to_string()],
        };
        let now = SystemTime::now();
        for k in keys {
            if let Some(node) = tree.get(&k).cloned() {
                let dest = format!("{}{}", to, &k[from.len()..]);
                let mut node = node;
                node.created = now;
                node.modified = now;
                tree.insert(dest, node);
            }
        }
    }

    fn remove_tree(&self, tree: &mut Tree, base: &str) {
        for k in subtree(tree, base) {
            tree.remove(&k);
        }
    }

    fn copymove(&self, req: &CopyMoveRequest, is_move: bool) -> BackendResult<StatusCode> {
        let dest = match req.dest {
            Destination::Local(ref dest) => dest,
            Destination::Remote(_) => return Ok(StatusCode::BAD_GATEWAY),
        };
        let from = key(&req.path);
        let to = key(dest);

        let mut tree = self.tree.lock();
        let src_is_dir = match tree.get(&from) {
            Some(node) => node.is_dir(),
            None => return Err(BackendError::NotFound),
        };
        if src_is_dir {
            match (req.depth, is_move) {
                (Depth::Infinity, _) | (Depth::Zero, false) => {}
                _ => return Ok(StatusCode::BAD_REQUEST),
            }
        }
        if from == "/" || is_below(&to, &from) {
            return Ok(StatusCode::FORBIDDEN);
        }
        match tree.get(&parent_key(&to)) {
            Some(node) if node.is_dir() => {}
            _ => return Ok(StatusCode::CONFLICT),
        }

        let existed = tree.contains_key(&to);
        if existed {
            if !req.overwrite {
                return Ok(StatusCode::PRECONDITION_FAILED);
            }
            self.remove_tree(&mut tree, &to);
            self.locks.remove_tree(dest);
        }

        self.copy_tree(&mut tree, &from, &to, req.depth);
        if is_move {
            self.remove_tree(&mut tree, &from);
            self.locks.remove_tree(&req.path);
        }
        Ok(if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        })
    }
}

impl DavBackend for MemFs {
    fn methods(&self) -> DavMethodSet {
        DavMethod::WEBDAV_RW
    }

    fn can_check_lock(&self) -> bool {
        true
    }

    fn can_check_auth(&self) -> bool {
        self.credentials.is_some()
    }

    fn get<'a>(&'a self, path: &'a DavPath, _ranges: &'a [ByteRange]) -> BackendFuture<'a, GetReply> {
        async move {
            trace!("MEMFS: get {}", path);
            let tree = self.tree.lock();
            let node = match tree.get(&key(path)) {
                Some(node) => node,
                None => return Ok(GetReply::NotFound),
            };
            let entity = match node.kind {
                NodeKind::Dir => {
                    let index = self.dir_index(&tree, path);
                    Entity {
                        mimetype: Some("text/html; charset=utf-8".to_string()),
                        mtime: Some(node.modified),
                        size: Some(index.len() as u64),
                        content: Content::Data(index),
                    }
                }
                NodeKind::File { ref data, ref content_type } => Entity {
                    mimetype: Some(content_type.clone()),
                    mtime: Some(node.modified),
                    size: Some(data.len() as u64),
                    content: Content::Stream(Box::new(MemFsFile {
                        tree: self.tree.clone(),
                        key: key(path),
                        pos: 0,
                    })),
                },
            };
            Ok(GetReply::Found(entity))
        }
        .boxed()
    }

    fn head<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, GetReply> {
        async move {
            let tree = self.tree.lock();
            let node = match tree.get(&key(path)) {
                Some(node) => node,
                None => return Ok(GetReply::NotFound),
            };
            let (mimetype, size) = match node.kind {
                NodeKind::Dir => ("text/html; charset=utf-8".to_string(), None),
                NodeKind::File { ref data, ref content_type } => (content_type.clone(), Some(data.len() as u64)),
            };
            Ok(GetReply::Found(Entity {
                mimetype: Some(mimetype),
                mtime: Some(node.modified),
                size,
                content: Content::None,
            }))
        }
        .boxed()
    }

    fn put<'a>(&'a self, req: &'a PutRequest) -> BackendFuture<'a, PutReply> {
        async move {
            trace!("MEMFS: put {}", req.path);
            let k = key(&req.path);
            let mut tree = self.tree.lock();
            match tree.get(&parent_key(&k)) {
                Some(node) if node.is_dir() => {}
                _ => return Ok(PutReply::Status(StatusCode::CONFLICT)),
            }
            let new = match tree.get_mut(&k) {
                Some(node) if node.is_dir() => return Ok(PutReply::Forbidden),
                Some(node) => {
                    if let NodeKind::File {
                        ref mut data,
                        ref mut content_type,
                    } = node.kind
                    {
                        // a partial update keeps the stored type.
                        if req.range.is_none() {
                            data.clear();
                            *content_type = req.content_type.clone();
                        }
                    }
                    node.modified = SystemTime::now();
                    false
                }
                None => {
                    tree.insert(k.clone(), Node::new_file(&req.content_type));
                    true
                }
            };
            let file = MemFsFile {
                tree: self.tree.clone(),
                key: k,
                pos: 0,
            };
            Ok(PutReply::Writer {
                file: Box::new(file),
                new,
            })
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        async move {
            trace!("MEMFS: delete {}", path);
            let k = key(path);
            if k == "/" {
                return Ok(StatusCode::FORBIDDEN);
            }
            let mut tree = self.tree.lock();
            if !tree.contains_key(&k) {
                return Ok(StatusCode::NOT_FOUND);
            }
            self.remove_tree(&mut tree, &k);
            self.locks.remove_tree(path);
            Ok(StatusCode::NO_CONTENT)
        }
        .boxed()
    }

    fn copy<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        Box::pin(future::ready(self.copymove(req, false)))
    }

    fn move_<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        Box::pin(future::ready(self.copymove(req, true)))
    }

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        async move {
            trace!("MEMFS: mkcol {}", path);
            let k = key(path);
            let mut tree = self.tree.lock();
            if tree.contains_key(&k) {
                return Ok(StatusCode::METHOD_NOT_ALLOWED);
            }
            match tree.get(&parent_key(&k)) {
                Some(node) if node.is_dir() => {}
                Some(_) => return Ok(StatusCode::FORBIDDEN),
                None => return Ok(StatusCode::CONFLICT),
            }
            tree.insert(k, Node::new_dir());
            Ok(StatusCode::CREATED)
        }
        .boxed()
    }

    fn propfind<'a>(
        &'a self,
        path: &'a DavPath,
        depth: Depth,
        _selection: &'a PropSelection,
    ) -> BackendFuture<'a, Option<Vec<DavResource>>> {
        async move {
            let base = key(path);
            let tree = self.tree.lock();
            let node = match tree.get(&base) {
                Some(node) => node,
                None => return Ok(None),
            };
            let mut res = vec![self.props(&base, node)];
            if node.is_dir() && depth != Depth::Zero {
                for k in subtree(&tree, &base) {
                    if k == base || (depth == Depth::One && parent_key(&k) != base) {
                        continue;
                    }
                    if let Some(node) = tree.get(&k) {
                        res.push(self.props(&k, node));
                    }
                }
            }
            Ok(Some(res))
        }
        .boxed()
    }

    fn proppatch<'a>(
        &'a self,
        path: &'a DavPath,
        ops: &'a mut Vec<PropPatchOp>,
    ) -> BackendFuture<'a, Option<String>> {
        async move {
            let mut tree = self.tree.lock();
            let node = match tree.get_mut(&key(path)) {
                Some(node) => node,
                None => return Err(BackendError::NotFound),
            };
            for op in ops.iter_mut() {
                // live properties are read-only.
                if op.namespace == NS_DAV_URI {
                    op.status = StatusCode::FORBIDDEN;
                    continue;
                }
                node.props.retain(|p| !p.is(&op.namespace, &op.name));
                if let Some(ref value) = op.value {
                    node.props
                        .push(DavProp::new(op.namespace.clone(), op.name.clone(), value.as_str()));
                }
                op.status = StatusCode::OK;
            }
            Ok(None)
        }
        .boxed()
    }

    fn lock<'a>(&'a self, req: &'a mut LockRequest) -> BackendFuture<'a, StatusCode> {
        Box::pin(future::ready(Ok(self.locks.lock(req))))
    }

    fn unlock<'a>(&'a self, path: &'a DavPath, token: &'a str, _depth: Depth) -> BackendFuture<'a, StatusCode> {
        Box::pin(future::ready(Ok(self.locks.unlock(path, token))))
    }

    fn check_auth<'a>(
        &'a self,
        auth_type: Option<&'a str>,
        username: Option<&'a str>,
        password: Option<&'a str>,
    ) -> BackendFuture<'a, bool> {
        let ok = match self.credentials {
            None => true,
            Some((ref user, ref pass)) => {
                auth_type == Some("Basic") && username == Some(user.as_str()) && password == Some(pass.as_str())
            }
        };
        Box::pin(future::ready(Ok(ok)))
    }

    fn check_lock<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        Box::pin(future::ready(Ok(self.locks.check(path))))
    }

    fn etag<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<String>> {
        let etag = self.tree.lock().get(&key(path)).map(|n| n.etag());
        Box::pin(future::ready(Ok(etag)))
    }
}

impl MemFsFile {
    fn with_data<T>(&self, f: impl FnOnce(&mut Vec<u8>, &mut SystemTime) -> T) -> BackendResult<T> {
        let mut tree = self.tree.lock();
        match tree.get_mut(&self.key) {
            Some(Node {
                kind: NodeKind::File { data, .. },
                modified,
                ..
            }) => Ok(f(data, modified)),
            Some(_) => Err(BackendError::Forbidden),
            None => Err(BackendError::NotFound),
        }
    }
}

impl DavFile for MemFsFile {
    fn read_bytes(&mut self, count: usize) -> BackendFuture<'_, Bytes> {
        let pos = self.pos;
        let res = self.with_data(|data, _| {
            let start = pos.min(data.len());
            let end = (pos + count).min(data.len());
            Bytes::copy_from_slice(&data[start..end])
        });
        if let Ok(ref b) = res {
            self.pos += b.len();
        }
        Box::pin(future::ready(res))
    }

    fn write_bytes(&mut self, buf: Bytes) -> BackendFuture<'_, ()> {
        let pos = self.pos;
        let res = self.with_data(|data, modified| {
            let end = pos + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[pos..end].copy_from_slice(&buf);
            *modified = SystemTime::now();
        });
        if res.is_ok() {
            self.pos += buf.len();
        }
        Box::pin(future::ready(res))
    }

    fn seek(&mut self, pos: SeekFrom) -> BackendFuture<'_, u64> {
        let cur = self.pos as i64;
        let res = self.with_data(|data, _| data.len() as i64).and_then(|len| {
            let new = match pos {
                SeekFrom::Start(n) => n as i64,
                SeekFrom::Current(n) => cur + n,
                SeekFrom::End(n) => len + n,
            };
            if new < 0 {
                return Err(BackendError::GeneralFailure);
            }
            Ok(new as u64)
        });
        if let Ok(new) = res {
            self.pos = new as usize;
        }
        Box::pin(future::ready(res))
    }

    fn flush(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(future::ready(Ok(())))
    }
}
