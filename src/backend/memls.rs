//! Ephemeral in-memory lock table, shared by the bundled backends.
//!
//! Locks are stored per path. A `Depth: infinity` lock also covers
//! everything below its path. Expired locks are dropped on every access.
use std::time::{Duration, SystemTime};

use http::StatusCode;
use parking_lot::Mutex;

use crate::backend::{DavLock, LockRequest, LockScope};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::util::unix_now;

/// Lock timeout when the client does not ask for one.
pub(crate) const DEFAULT_TIMEOUT: u64 = 300;

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    lock: DavLock,
}

#[derive(Debug, Default)]
pub(crate) struct MemLs {
    locks: Mutex<Vec<Entry>>,
}

fn key(path: &DavPath) -> String {
    path.unslashified().as_str().to_string()
}

// is `path` equal to or below `base`.
fn is_below(path: &str, base: &str) -> bool {
    base == "/" || path == base || path.starts_with(&format!("{base}/"))
}

// Number of seconds requested by a `Timeout:` value. We honor
// `Second-n` and plain numbers; anything else gets the default.
fn requested_seconds(timeout: Option<&str>) -> u64 {
    let t = match timeout {
        Some(t) => t.trim(),
        None => return DEFAULT_TIMEOUT,
    };
    let n = t.strip_prefix("Second-").unwrap_or(t).parse::<u64>();
    match n {
        // an absolute unix time.
        Ok(n) if n > 1_000_000 => n.saturating_sub(unix_now()),
        Ok(n) if n > 0 => n,
        _ => DEFAULT_TIMEOUT,
    }
}

impl MemLs {
    pub(crate) fn new() -> MemLs {
        MemLs::default()
    }

    fn expire(locks: &mut Vec<Entry>) {
        let now = SystemTime::now();
        locks.retain(|e| e.lock.expires.map(|x| x > now).unwrap_or(true));
    }

    // Locks that apply to `path`: on the path itself, or inherited
    // from an ancestor with Depth: infinity.
    fn covering<'a>(locks: &'a [Entry], path: &'a str) -> impl Iterator<Item = &'a Entry> + 'a {
        locks.iter().filter(move |e| {
            e.path == path || (e.lock.depth == Depth::Infinity && is_below(path, &e.path))
        })
    }

    /// Create or refresh a lock. The request is updated with the values
    /// that were stored; its `timeout` becomes an absolute unix time.
    pub(crate) fn lock(&self, req: &mut LockRequest) -> StatusCode {
        let mut locks = self.locks.lock();
        Self::expire(&mut locks);
        let path = key(&req.path);
        let now = SystemTime::now();
        let secs = requested_seconds(req.timeout.as_deref());
        let expires = now + Duration::from_secs(secs);

        if let Some(ref token) = req.update {
            let entry = match locks.iter_mut().find(|e| &e.lock.token == token && is_below(&path, &e.path)) {
                Some(entry) => entry,
                None => {
                    debug!("LOCK refresh: no lock {} on {}", token, path);
                    return StatusCode::LOCKED;
                }
            };
            entry.lock.expires = Some(expires);
            entry.lock.modified = Some(now);
            req.owner = entry.lock.owner.clone();
            req.scope = entry.lock.scope;
            req.locktype = entry.lock.locktype.clone();
            req.depth = entry.lock.depth;
            req.timeout = Some((unix_now() + secs).to_string());
            return StatusCode::OK;
        }

        let shared = req.scope == LockScope::Shared;
        let conflict = locks.iter().any(|e| {
            let overlaps = Self::covering(std::slice::from_ref(e), &path).next().is_some()
                || (req.depth == Depth::Infinity && is_below(&e.path, &path));
            overlaps && !(shared && e.lock.scope == LockScope::Shared)
        });
        if conflict {
            debug!("LOCK {}: conflicting lock", path);
            return StatusCode::LOCKED;
        }

        trace!("LOCK {} {} {}", path, req.scope.as_str(), req.token);
        locks.push(Entry {
            path,
            lock: DavLock {
                scope: req.scope,
                locktype: req.locktype.clone(),
                owner: req.owner.clone(),
                token: req.token.clone(),
                depth: req.depth,
                timeout: Some(secs),
                expires: Some(expires),
                created: Some(now),
                modified: Some(now),
            },
        });
        req.timeout = Some((unix_now() + secs).to_string());
        StatusCode::OK
    }

    pub(crate) fn unlock(&self, path: &DavPath, token: &str) -> StatusCode {
        let mut locks = self.locks.lock();
        Self::expire(&mut locks);
        let path = key(path);
        let before = locks.len();
        locks.retain(|e| !(e.lock.token == token && is_below(&path, &e.path)));
        if locks.len() == before {
            StatusCode::CONFLICT
        } else {
            StatusCode::NO_CONTENT
        }
    }

    /// The lock that applies to `path`, exclusive locks first.
    pub(crate) fn check(&self, path: &DavPath) -> Option<DavLock> {
        let mut locks = self.locks.lock();
        Self::expire(&mut locks);
        let path = key(path);
        let mut found: Vec<&Entry> = Self::covering(&locks, &path).collect();
        found.sort_by_key(|e| e.lock.scope == LockScope::Shared);
        let lock = found.first().map(|e| e.lock.clone());
        lock
    }

    /// Forget all locks at or below `path` (after DELETE or MOVE).
    pub(crate) fn remove_tree(&self, path: &DavPath) {
        let path = key(path);
        self.locks.lock().retain(|e| !is_below(&e.path, &path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(path: &str, scope: LockScope, depth: Depth, token: &str) -> LockRequest {
        LockRequest {
            path: DavPath::new(path).unwrap(),
            depth,
            timeout: None,
            scope,
            locktype: "write".to_string(),
            owner: "me".to_string(),
            token: token.to_string(),
            update: None,
        }
    }

    #[test]
    fn test_lock_unlock() {
        let ls = MemLs::new();
        let mut r = req("/a", LockScope::Exclusive, Depth::Zero, "t1");
        assert_eq!(ls.lock(&mut r), StatusCode::OK);
        let t: u64 = r.timeout.unwrap().parse().unwrap();
        assert!(t >= unix_now() + DEFAULT_TIMEOUT - 1);

        let lock = ls.check(&DavPath::new("/a").unwrap()).unwrap();
        assert_eq!(lock.token, "t1");
        assert!(ls.check(&DavPath::new("/a/b").unwrap()).is_none());

        let mut r2 = req("/a", LockScope::Exclusive, Depth::Zero, "t2");
        assert_eq!(ls.lock(&mut r2), StatusCode::LOCKED);

        assert_eq!(ls.unlock(&DavPath::new("/a").unwrap(), "t2"), StatusCode::CONFLICT);
        assert_eq!(ls.unlock(&DavPath::new("/a").unwrap(), "t1"), StatusCode::NO_CONTENT);
        assert!(ls.check(&DavPath::new("/a").unwrap()).is_none());
    }

    #[test]
    fn test_shared_and_depth() {
        let ls = MemLs::new();
        let mut r = req("/d/", LockScope::Shared, Depth::Infinity, "s1");
        assert_eq!(ls.lock(&mut r), StatusCode::OK);
        let mut r = req("/d", LockScope::Shared, Depth::Zero, "s2");
        assert_eq!(ls.lock(&mut r), StatusCode::OK);
        let mut r = req("/d/x", LockScope::Exclusive, Depth::Zero, "x1");
        assert_eq!(ls.lock(&mut r), StatusCode::LOCKED);

        assert!(ls.check(&DavPath::new("/d/x/y").unwrap()).is_some());
        ls.remove_tree(&DavPath::new("/d").unwrap());
        assert!(ls.check(&DavPath::new("/d").unwrap()).is_none());
    }

    #[test]
    fn test_refresh() {
        let ls = MemLs::new();
        let mut r = req("/a", LockScope::Exclusive, Depth::Zero, "t1");
        r.timeout = Some("Second-60".to_string());
        ls.lock(&mut r);

        let mut refresh = req("/a", LockScope::Exclusive, Depth::Infinity, "t1");
        refresh.owner = "unknown".to_string();
        refresh.update = Some("t1".to_string());
        assert_eq!(ls.lock(&mut refresh), StatusCode::OK);
        assert_eq!(refresh.owner, "me");
        assert_eq!(refresh.depth, Depth::Zero);

        refresh.update = Some("nope".to_string());
        assert_eq!(ls.lock(&mut refresh), StatusCode::LOCKED);
    }
}
