//! Utility module to handle the path part of an URL as a resource path.
//!
use std::path::PathBuf;

use percent_encoding::percent_decode_str;

use crate::errors::DavError;
use crate::util::{merge_paths, urlencode_minimal};
use crate::DavResult;

/// Resource path, relative to the mount prefix.
///
/// The path is stored percent-decoded and always starts with a `/`.
/// Collections end in a `/`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    path: String,
    prefix: String,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

impl std::fmt::Debug for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_url_string())
    }
}

// check for "." and ".." segments.
fn check_segments(path: &str) -> DavResult<()> {
    for seg in path.split('/') {
        if seg == ".." {
            return Err(DavError::ForbiddenPath);
        }
    }
    Ok(())
}

impl DavPath {
    /// Path with no mount prefix. Fails on `..` segments.
    pub fn new(path: &str) -> Result<DavPath, crate::backend::BackendError> {
        let mut path = path.to_string();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        check_segments(&path).map_err(|_| crate::backend::BackendError::Forbidden)?;
        Ok(DavPath {
            path,
            prefix: String::new(),
        })
    }

    /// Split a raw request target (path and optional query) into a
    /// resource path below `prefix`.
    ///
    /// The second value of the result is `true` if nothing was left after
    /// stripping the prefix; the path is then `/`.
    pub(crate) fn from_target_and_prefix(target: &str, prefix: &str) -> DavResult<(DavPath, bool)> {
        let raw = match target.find('?') {
            Some(n) => &target[..n],
            None => target,
        };
        let prefix = prefix.trim_end_matches('/');
        let rest = match raw.strip_prefix(prefix) {
            Some(rest) => rest,
            None => return Err(DavError::IllegalPath),
        };
        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(DavError::IllegalPath);
        }
        let decoded = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|_| DavError::InvalidPath)?;
        check_segments(&decoded)?;
        let was_empty = decoded.is_empty();
        let path = if was_empty { "/".to_string() } else { decoded.into_owned() };
        Ok((
            DavPath {
                path,
                prefix: prefix.to_string(),
            },
            was_empty,
        ))
    }

    /// Same prefix, new path.
    pub(crate) fn with_same_prefix(&self, path: &str) -> DavPath {
        let mut path = path.to_string();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        DavPath {
            path,
            prefix: self.prefix.clone(),
        }
    }

    /// The decoded path, without prefix.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// The mount prefix (without trailing slash).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Does the path end in a slash.
    pub fn is_collection(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Is this the root of the mount.
    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// The path with a trailing slash added, if it had none.
    pub fn slashified(&self) -> DavPath {
        let mut p = self.clone();
        if !p.path.ends_with('/') {
            p.path.push('/');
        }
        p
    }

    /// The path with any trailing slash removed (root stays `/`).
    pub fn unslashified(&self) -> DavPath {
        let mut p = self.clone();
        while p.path.len() > 1 && p.path.ends_with('/') {
            p.path.pop();
        }
        p
    }

    /// Parent collection, always ends in a slash.
    pub fn parent(&self) -> DavPath {
        let p = self.unslashified();
        let idx = p.path.rfind('/').unwrap_or(0);
        DavPath {
            path: p.path[..idx + 1].to_string(),
            prefix: self.prefix.clone(),
        }
    }

    /// Last segment of the path, without trailing slash.
    pub fn file_name(&self) -> &str {
        let p = self.path.trim_end_matches('/');
        match p.rfind('/') {
            Some(idx) => &p[idx + 1..],
            None => p,
        }
    }

    /// Append a segment.
    pub fn join(&self, name: &str) -> DavPath {
        let mut p = self.slashified();
        p.path.push_str(name.trim_start_matches('/'));
        p
    }

    /// Is `self` equal to, or located below, collection `other`.
    pub fn starts_with(&self, other: &DavPath) -> bool {
        let a = self.unslashified();
        let b = other.unslashified();
        if b.path == "/" {
            return true;
        }
        a.path == b.path || a.path.starts_with(&format!("{}/", b.path))
    }

    /// Relative path for use on a local filesystem.
    pub fn as_rel_ospath(&self) -> PathBuf {
        PathBuf::from(self.path.trim_start_matches('/'))
    }

    /// The full URL path, prefix included, minimally url-encoded.
    pub fn as_url_string(&self) -> String {
        urlencode_minimal(&merge_paths(&self.prefix, &self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_and_prefix() {
        let (p, empty) = DavPath::from_target_and_prefix("/dav/a%20b/c.txt?x=1", "/dav").unwrap();
        assert!(!empty);
        assert_eq!(p.as_str(), "/a b/c.txt");
        assert_eq!(p.as_url_string(), "/dav/a%20b/c.txt");

        let (p, empty) = DavPath::from_target_and_prefix("/dav", "/dav/").unwrap();
        assert!(empty);
        assert_eq!(p.as_str(), "/");

        assert!(DavPath::from_target_and_prefix("/davx/y", "/dav").is_err());
        assert!(DavPath::from_target_and_prefix("/dav/../etc", "/dav").is_err());
    }

    #[test]
    fn test_parent_and_name() {
        let p = DavPath::new("/a/b/c/").unwrap();
        assert_eq!(p.parent().as_str(), "/a/b/");
        assert_eq!(p.file_name(), "c");
        assert_eq!(DavPath::new("/x").unwrap().parent().as_str(), "/");
        assert!(p.starts_with(&DavPath::new("/a").unwrap()));
        assert!(!DavPath::new("/ab").unwrap().starts_with(&DavPath::new("/a/").unwrap()));
    }
}
