//! Local filesystem backend.
//!
//! Serves a directory on the local filesystem. Content types are guessed
//! from the file extension. Dead properties and locks are kept in memory,
//! so they do not survive a restart.
use std::collections::HashMap;
use std::io::{self, SeekFrom};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use bytes::{Bytes, BytesMut};
use futures_util::{future, FutureExt, TryFutureExt};
use http::StatusCode;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::backend::memls::MemLs;
use crate::backend::*;
use crate::davheaders::{ByteRange, Depth};
use crate::davpath::DavPath;
use crate::util::{merge_paths, systemtime_to_httpdate, DavMethod, DavMethodSet};

/// Local filesystem backend.
#[derive(Debug)]
pub struct LocalFs {
    basedir: PathBuf,
    public: bool,
    props: Mutex<HashMap<String, Vec<DavProp>>>,
    locks: MemLs,
}

#[derive(Debug)]
struct LocalFsFile(tokio::fs::File);

fn key(path: &DavPath) -> String {
    path.unslashified().as_str().to_string()
}

// same as the default apache etag.
fn etag(meta: &std::fs::Metadata) -> Option<String> {
    let modified = meta.modified().ok()?;
    let t = modified.duration_since(UNIX_EPOCH).ok()?;
    let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
    #[cfg(unix)]
    let tag = if meta.is_file() {
        format!("{:x}-{:x}-{:x}", meta.ino(), meta.len(), t)
    } else {
        format!("{:x}-{:x}", meta.ino(), t)
    };
    #[cfg(not(unix))]
    let tag = if meta.is_file() {
        format!("{:x}-{:x}", meta.len(), t)
    } else {
        format!("{:x}", t)
    };
    Some(format!("\"{tag}\""))
}

// metadata, with "does not exist" as None.
async fn metadata(path: &PathBuf) -> BackendResult<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl LocalFs {
    /// Create a new LocalFs backend, serving "base".
    ///
    /// If "public" is set to true, all files and directories created will be
    /// publically readable (mode 644/755), otherwise they will be private
    /// (mode 600/700). Umask still overrides this.
    pub fn new(base: impl Into<PathBuf>, public: bool) -> LocalFs {
        LocalFs {
            basedir: base.into(),
            public,
            props: Mutex::new(HashMap::new()),
            locks: MemLs::new(),
        }
    }

    fn abs_path(&self, path: &DavPath) -> PathBuf {
        let mut pathbuf = self.basedir.clone();
        pathbuf.push(path.as_rel_ospath());
        pathbuf
    }

    fn resource(&self, path: &str, meta: &std::fs::Metadata) -> DavResource {
        let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let mut props = vec![DavProp::dav("displayname", name)];
        if let Ok(created) = meta.created() {
            props.push(DavProp::dav("creationdate", created));
        }
        if let Ok(modified) = meta.modified() {
            props.push(DavProp::dav("getlastmodified", modified));
        }
        props.push(DavProp::dav("ishidden", name.starts_with('.')));
        let path = if meta.is_dir() {
            props.push(DavProp::dav("resourcetype", "collection"));
            props.push(DavProp::dav("getcontenttype", "httpd/unix-directory"));
            crate::util::slashify(path)
        } else {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            props.push(DavProp::dav("resourcetype", ""));
            props.push(DavProp::dav("getcontenttype", mime.as_ref()));
            props.push(DavProp::dav("getcontentlength", meta.len()));
            path.to_string()
        };
        if let Some(etag) = etag(meta) {
            props.push(DavProp::dav("getetag", etag));
        }
        props.push(supportedlock_prop());
        let k = match path.trim_end_matches('/') {
            "" => "/",
            k => k,
        };
        if let Some(dead) = self.props.lock().get(k) {
            props.extend(dead.iter().cloned());
        }
        DavResource { path, props }
    }

    async fn dir_index(&self, path: &DavPath) -> BackendResult<Bytes> {
        let base = path.slashified().as_url_string();
        let title = htmlescape::encode_minimal(&base);
        let mut out = format!(
            "<html><head><title>Index of {title}</title></head>\n<body><h1>Index of {title}</h1>\n<pre>\n"
        );
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(self.abs_path(path)).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_dir() {
                name.push('/');
            }
            entries.push((name, meta));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, meta) in entries {
            let href = merge_paths(&base, &name);
            let mtime = meta.modified().map(systemtime_to_httpdate).unwrap_or_default();
            out.push_str(&format!(
                "<a href=\"{}\">{}</a> {:>10} {}\n",
                htmlescape::encode_minimal(&href),
                htmlescape::encode_minimal(&name),
                meta.len(),
                mtime,
            ));
        }
        out.push_str("</pre>\n</body></html>\n");
        Ok(Bytes::from(out))
    }

    async fn create_dir(&self, path: &PathBuf) -> io::Result<()> {
        #[allow(unused_mut)]
        let mut dir = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        dir.mode(if self.public { 0o755 } else { 0o700 });
        dir.create(path).await
    }

    async fn remove(&self, path: &PathBuf, meta: &std::fs::Metadata) -> io::Result<()> {
        if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }

    // Drop dead properties at or below `base`.
    fn forget_props(&self, base: &DavPath) {
        let base = key(base);
        self.props
            .lock()
            .retain(|k, _| !(base == "/" || *k == base || k.starts_with(&format!("{base}/"))));
    }

    fn copy_props(&self, from: &DavPath, to: &DavPath) {
        let (from, to) = (key(from), key(to));
        let mut props = self.props.lock();
        let copied: Vec<(String, Vec<DavProp>)> = props
            .iter()
            .filter(|(k, _)| **k == from || k.starts_with(&format!("{from}/")))
            .map(|(k, v)| (format!("{}{}", to, &k[from.len()..]), v.clone()))
            .collect();
        props.extend(copied);
    }

    // Copy a file or a tree, depth first.
    async fn copy_tree(&self, from: PathBuf, to: PathBuf, depth: Depth) -> io::Result<()> {
        let mut todo = vec![(from, to)];
        while let Some((from, to)) = todo.pop() {
            let meta = tokio::fs::metadata(&from).await?;
            if !meta.is_dir() {
                tokio::fs::copy(&from, &to).await?;
                continue;
            }
            self.create_dir(&to).await?;
            if depth != Depth::Infinity {
                continue;
            }
            let mut dir = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = dir.next_entry().await? {
                todo.push((entry.path(), to.join(entry.file_name())));
            }
        }
        Ok(())
    }

    async fn copymove(&self, req: &CopyMoveRequest, is_move: bool) -> BackendResult<StatusCode> {
        let dest = match req.dest {
            Destination::Local(ref dest) => dest,
            Destination::Remote(_) => return Ok(StatusCode::BAD_GATEWAY),
        };
        let from = self.abs_path(&req.path);
        let to = self.abs_path(dest);

        let meta = match metadata(&from).await? {
            Some(meta) => meta,
            None => return Err(BackendError::NotFound),
        };
        if meta.is_dir() {
            match (req.depth, is_move) {
                (Depth::Infinity, _) | (Depth::Zero, false) => {}
                _ => return Ok(StatusCode::BAD_REQUEST),
            }
        }
        if req.path.is_root() || dest.starts_with(&req.path) {
            return Ok(StatusCode::FORBIDDEN);
        }
        match metadata(&self.abs_path(&dest.parent())).await? {
            Some(m) if m.is_dir() => {}
            _ => return Ok(StatusCode::CONFLICT),
        }

        let existed = match metadata(&to).await? {
            Some(dmeta) => {
                if !req.overwrite {
                    return Ok(StatusCode::PRECONDITION_FAILED);
                }
                self.remove(&to, &dmeta).await?;
                self.forget_props(dest);
                self.locks.remove_tree(dest);
                true
            }
            None => false,
        };

        if is_move {
            tokio::fs::rename(&from, &to).await?;
            self.copy_props(&req.path, dest);
            self.forget_props(&req.path);
            self.locks.remove_tree(&req.path);
        } else {
            self.copy_tree(from, to, req.depth).await?;
            self.copy_props(&req.path, dest);
        }
        Ok(if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        })
    }
}

impl DavBackend for LocalFs {
    // HEAD is left to the engine, which emulates it with GET.
    fn methods(&self) -> DavMethodSet {
        DavMethod::WEBDAV_RW - DavMethod::HEAD
    }

    fn can_check_lock(&self) -> bool {
        true
    }

    fn get<'a>(&'a self, path: &'a DavPath, _ranges: &'a [ByteRange]) -> BackendFuture<'a, GetReply> {
        async move {
            trace!("FS: get {:?}", path);
            let abs = self.abs_path(path);
            let meta = match metadata(&abs).await? {
                Some(meta) => meta,
                None => return Ok(GetReply::NotFound),
            };
            if meta.is_dir() {
                let index = self.dir_index(path).await?;
                return Ok(GetReply::Found(Entity {
                    mimetype: Some("text/html; charset=utf-8".to_string()),
                    mtime: meta.modified().ok(),
                    size: Some(index.len() as u64),
                    content: Content::Data(index),
                }));
            }
            let file = tokio::fs::File::open(&abs).await?;
            let mime = mime_guess::from_path(&abs).first_or_octet_stream();
            Ok(GetReply::Found(Entity {
                mimetype: Some(mime.as_ref().to_string()),
                mtime: meta.modified().ok(),
                size: Some(meta.len()),
                content: Content::Stream(Box::new(LocalFsFile(file))),
            }))
        }
        .boxed()
    }

    fn put<'a>(&'a self, req: &'a PutRequest) -> BackendFuture<'a, PutReply> {
        async move {
            trace!("FS: put {:?}", req.path);
            let abs = self.abs_path(&req.path);
            match metadata(&self.abs_path(&req.path.parent())).await? {
                Some(m) if m.is_dir() => {}
                _ => return Ok(PutReply::Status(StatusCode::CONFLICT)),
            }
            let new = match metadata(&abs).await? {
                Some(m) if m.is_dir() => return Ok(PutReply::Forbidden),
                Some(_) => false,
                None => true,
            };
            let mut opt = tokio::fs::OpenOptions::new();
            opt.write(true).create(true).truncate(req.range.is_none());
            #[cfg(unix)]
            opt.mode(if self.public { 0o644 } else { 0o600 });
            let file = opt.open(&abs).await?;
            Ok(PutReply::Writer {
                file: Box::new(LocalFsFile(file)),
                new,
            })
        }
        .boxed()
    }

    fn delete<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        async move {
            trace!("FS: delete {:?}", path);
            if path.is_root() {
                return Ok(StatusCode::FORBIDDEN);
            }
            let abs = self.abs_path(path);
            let meta = match metadata(&abs).await? {
                Some(meta) => meta,
                None => return Ok(StatusCode::NOT_FOUND),
            };
            self.remove(&abs, &meta).await?;
            self.forget_props(path);
            self.locks.remove_tree(path);
            Ok(StatusCode::NO_CONTENT)
        }
        .boxed()
    }

    fn copy<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        self.copymove(req, false).boxed()
    }

    fn move_<'a>(&'a self, req: &'a CopyMoveRequest) -> BackendFuture<'a, StatusCode> {
        self.copymove(req, true).boxed()
    }

    fn mkcol<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, StatusCode> {
        async move {
            trace!("FS: mkcol {:?}", path);
            let abs = self.abs_path(path);
            if metadata(&abs).await?.is_some() {
                return Ok(StatusCode::METHOD_NOT_ALLOWED);
            }
            match metadata(&self.abs_path(&path.parent())).await? {
                Some(m) if m.is_dir() => {}
                Some(_) => return Ok(StatusCode::FORBIDDEN),
                None => return Ok(StatusCode::CONFLICT),
            }
            self.create_dir(&abs).await?;
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
            let abs = self.abs_path(path);
            let meta = match metadata(&abs).await? {
                Some(meta) => meta,
                None => return Ok(None),
            };
            let mut res = vec![self.resource(path.as_str(), &meta)];
            if !meta.is_dir() || depth == Depth::Zero {
                return Ok(Some(res));
            }

            let mut todo = vec![(path.slashified().as_str().to_string(), abs)];
            while let Some((dir_path, dir_abs)) = todo.pop() {
                let mut dir = tokio::fs::read_dir(&dir_abs).await?;
                let mut entries = Vec::new();
                while let Some(entry) = dir.next_entry().await? {
                    let meta = match entry.metadata().await {
                        Ok(meta) => meta,
                        Err(_) => continue,
                    };
                    let name = entry.file_name().to_string_lossy().into_owned();
                    entries.push((format!("{dir_path}{name}"), entry.path(), meta));
                }
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                for (child, child_abs, meta) in entries {
                    if meta.is_dir() && depth == Depth::Infinity {
                        todo.push((format!("{child}/"), child_abs));
                    }
                    res.push(self.resource(&child, &meta));
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
            if metadata(&self.abs_path(path)).await?.is_none() {
                return Err(BackendError::NotFound);
            }
            let mut props = self.props.lock();
            let dead = props.entry(key(path)).or_default();
            for op in ops.iter_mut() {
                if op.namespace == NS_DAV_URI {
                    op.status = StatusCode::FORBIDDEN;
                    continue;
                }
                dead.retain(|p| !p.is(&op.namespace, &op.name));
                if let Some(ref value) = op.value {
                    dead.push(DavProp::new(op.namespace.clone(), op.name.clone(), value.as_str()));
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

    fn check_lock<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<DavLock>> {
        Box::pin(future::ready(Ok(self.locks.check(path))))
    }

    fn etag<'a>(&'a self, path: &'a DavPath) -> BackendFuture<'a, Option<String>> {
        async move {
            let meta = metadata(&self.abs_path(path)).await?;
            Ok(meta.as_ref().and_then(etag))
        }
        .boxed()
    }
}

impl DavFile for LocalFsFile {
    fn read_bytes(&mut self, count: usize) -> BackendFuture<'_, Bytes> {
        async move {
            let mut buf = BytesMut::with_capacity(count);
            while buf.len() < count {
                if self.0.read_buf(&mut buf).await? == 0 {
                    break;
                }
            }
            Ok(buf.freeze())
        }
        .boxed()
    }

    fn write_bytes(&mut self, buf: Bytes) -> BackendFuture<'_, ()> {
        async move { Ok(self.0.write_all(&buf).await?) }.boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> BackendFuture<'_, u64> {
        self.0.seek(pos).map_err(Into::into).boxed()
    }

    fn flush(&mut self) -> BackendFuture<'_, ()> {
        self.0.flush().map_err(Into::into).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("webdav-engine-{}-{}", name, uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_propfind() {
        let dir = tempdir("put");
        let fs = LocalFs::new(&dir, false);
        assert_eq!(fs.mkcol(&p("/sub/")).await.unwrap(), StatusCode::CREATED);

        let put = PutRequest {
            path: p("/sub/hello.txt"),
            content_type: "text/plain".to_string(),
            content_language: None,
            content_length: Some(5),
            range: None,
        };
        match fs.put(&put).await.unwrap() {
            PutReply::Writer { mut file, new } => {
                assert!(new);
                file.write_bytes(Bytes::from_static(b"hello")).await.unwrap();
                file.flush().await.unwrap();
            }
            _ => panic!("expected a writer"),
        }

        match fs.get(&p("/sub/hello.txt"), &[]).await.unwrap() {
            GetReply::Found(Entity {
                mimetype,
                size,
                content: Content::Stream(mut file),
                ..
            }) => {
                assert_eq!(mimetype.as_deref(), Some("text/plain"));
                assert_eq!(size, Some(5));
                assert_eq!(&file.read_bytes(3).await.unwrap()[..], b"hel");
                assert_eq!(&file.read_bytes(10).await.unwrap()[..], b"lo");
            }
            _ => panic!("expected a stream"),
        }

        let res = fs
            .propfind(&p("/"), Depth::Infinity, &PropSelection::All)
            .await
            .unwrap()
            .unwrap();
        let paths: Vec<_> = res.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/sub/", "/sub/hello.txt"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_copy_move() {
        let dir = tempdir("copy");
        let fs = LocalFs::new(&dir, true);
        std::fs::create_dir(dir.join("a")).unwrap();
        std::fs::write(dir.join("a/f"), b"data").unwrap();

        let req = CopyMoveRequest {
            path: p("/a/"),
            dest: Destination::Local(p("/b/")),
            overwrite: false,
            depth: Depth::Infinity,
        };
        assert_eq!(fs.copy(&req).await.unwrap(), StatusCode::CREATED);
        assert_eq!(std::fs::read(dir.join("b/f")).unwrap(), b"data");
        assert_eq!(fs.copy(&req).await.unwrap(), StatusCode::PRECONDITION_FAILED);

        let req = CopyMoveRequest {
            path: p("/b/f"),
            dest: Destination::Local(p("/a/f")),
            overwrite: true,
            depth: Depth::Infinity,
        };
        assert_eq!(fs.move_(&req).await.unwrap(), StatusCode::NO_CONTENT);
        assert!(!dir.join("b/f").exists());

        assert_eq!(fs.delete(&p("/a/")).await.unwrap(), StatusCode::NO_CONTENT);
        assert!(!dir.join("a").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
