//! The `If:` header (RFC4918 10.4): tokenizer, parser and evaluation,
//! and the lock gate used by the write methods.
use headers::HeaderMapExt;
use http::{HeaderMap, StatusCode};
use regex::Regex;

use crate::backend::{BackendError, LockScope};
use crate::davhandler::DavHandler;
use crate::davheaders::IfHeader;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::DavResult;

lazy_static! {
    static ref RE_LOCKTOKEN: Regex = Regex::new(
        r"^opaquelocktoken:[[:xdigit:]]{8}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{12}$"
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IfToken {
    Uri(String),
    ETag(String, bool),
    Not,
    Char(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IfTerm {
    StateToken(String),
    ETag { tag: String, weak: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfCondition {
    pub not: bool,
    pub term: IfTerm,
}

/// All conditions for one resource. `uri` is `None` for untagged lists,
/// which apply to the request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfList {
    pub uri: Option<String>,
    pub conditions: Vec<IfCondition>,
}

// Split the next token off the input.
fn next_token(s: &str, pos: &mut usize) -> Option<IfToken> {
    let rest = &s[*pos..];
    let trimmed = rest.trim_start();
    *pos += rest.len() - trimmed.len();
    let c = trimmed.chars().next()?;
    *pos += c.len_utf8();
    let rest = &s[*pos..];
    let tok = match c {
        '<' => {
            let end = rest.find('>')?;
            *pos += end + 1;
            IfToken::Uri(rest[..end].to_string())
        }
        '[' => {
            let (weak, body) = match rest.strip_prefix("W/") {
                Some(b) => (true, b),
                None => (false, rest),
            };
            let end = body.find(']')?;
            *pos += rest.len() - body.len() + end + 1;
            IfToken::ETag(body[..end].trim_matches('"').to_string(), weak)
        }
        'N' => {
            if !rest.starts_with("ot") {
                return Some(IfToken::Char('N'));
            }
            *pos += 2;
            IfToken::Not
        }
        c => IfToken::Char(c),
    };
    Some(tok)
}

enum State {
    // before a list, an optional tagged URI may follow.
    Start,
    // after a tagged URI, a list must follow.
    Tagged(String),
    // inside a list.
    List { uri: Option<String>, depth: usize, not: bool, conditions: Vec<IfCondition> },
}

/// Parse an `If:` header into per-resource lists. Lists for the same
/// resource are merged, in order. Returns `None` on malformed input.
pub(crate) fn parse_if(s: &str) -> Option<Vec<IfList>> {
    let mut lists: Vec<IfList> = Vec::new();
    let mut state = State::Start;
    let mut pos = 0;

    loop {
        let token = next_token(s, &mut pos);
        state = match (state, token) {
            (State::Start, None) => break,
            (State::Start, Some(IfToken::Uri(u))) => State::Tagged(u),
            (State::Start, Some(IfToken::Char('('))) => State::List {
                uri: None,
                depth: 1,
                not: false,
                conditions: Vec::new(),
            },
            (State::Tagged(uri), Some(IfToken::Char('('))) => State::List {
                uri: Some(uri),
                depth: 1,
                not: false,
                conditions: Vec::new(),
            },
            (State::List { uri, depth, conditions, .. }, Some(IfToken::Not)) => State::List {
                uri,
                depth,
                not: true,
                conditions,
            },
            (State::List { uri, depth, mut conditions, not }, Some(IfToken::Uri(u))) => {
                conditions.push(IfCondition { not, term: IfTerm::StateToken(u) });
                State::List { uri, depth, not: false, conditions }
            }
            (State::List { uri, depth, mut conditions, not }, Some(IfToken::ETag(tag, weak))) => {
                conditions.push(IfCondition { not, term: IfTerm::ETag { tag, weak } });
                State::List { uri, depth, not: false, conditions }
            }
            (State::List { uri, depth, conditions, .. }, Some(IfToken::Char('('))) => State::List {
                uri,
                depth: depth + 1,
                not: false,
                conditions,
            },
            (State::List { uri, depth, conditions, .. }, Some(IfToken::Char(')'))) => {
                if depth > 1 {
                    State::List { uri, depth: depth - 1, not: false, conditions }
                } else {
                    match lists.iter_mut().find(|l| l.uri == uri) {
                        Some(l) => l.conditions.extend(conditions),
                        None => lists.push(IfList { uri, conditions }),
                    }
                    State::Start
                }
            }
            _ => return None,
        };
    }
    Some(lists)
}

/// The first state token of an `If:` header, for LOCK refresh.
pub(crate) fn first_state_token(s: &str) -> Option<String> {
    parse_if(s)?
        .into_iter()
        .flat_map(|l| l.conditions)
        .find_map(|c| match c.term {
            IfTerm::StateToken(t) if !c.not => Some(t),
            _ => None,
        })
}

fn strip_etag(s: &str) -> &str {
    s.trim().trim_start_matches("W/").trim_matches('"')
}

impl DavHandler {
    // map a tagged If: URI to a resource path.
    fn if_uri_to_path(&self, base: &DavPath, uri: &str) -> Option<DavPath> {
        let target = match url::Url::parse(uri) {
            Ok(url) => url.path().to_string(),
            Err(_) if uri.starts_with('/') => uri.to_string(),
            Err(_) => return None,
        };
        DavPath::from_target_and_prefix(&target, base.prefix())
            .ok()
            .map(|(p, _)| p)
    }

    async fn check_condition(&self, path: Option<&DavPath>, cond: &IfCondition) -> bool {
        let res = match (&cond.term, path) {
            // a lock token can never be from the DAV: scheme.
            (IfTerm::StateToken(t), _) if t.starts_with("DAV:") => false,
            (IfTerm::StateToken(t), Some(path)) => {
                if !self.backend.can_check_lock() {
                    false
                } else {
                    match self.backend.check_lock(path).await {
                        Ok(Some(lock)) => &lock.token == t,
                        _ => false,
                    }
                }
            }
            (IfTerm::ETag { tag, .. }, Some(path)) => match self.backend.etag(path).await {
                Ok(Some(etag)) => strip_etag(&etag) == tag.as_str(),
                _ => true,
            },
            (_, None) => false,
        };
        res != cond.not
    }

    /// Evaluate the `If:` header, if any. Fails with `412 Precondition
    /// Failed`, or `423 Locked` for a malformed opaquelocktoken.
    pub(crate) async fn check_if_header(&self, headers: &HeaderMap, path: &DavPath) -> DavResult<()> {
        let value = match headers.typed_try_get::<IfHeader>() {
            Ok(Some(v)) => v.0,
            Ok(None) => return Ok(()),
            Err(_) => return Err(StatusCode::PRECONDITION_FAILED.into()),
        };
        let lists = match parse_if(&value) {
            Some(lists) => lists,
            None => {
                debug!("If: header parse error: {}", value);
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
        };

        for list in &lists {
            let target = match list.uri {
                Some(ref uri) => self.if_uri_to_path(path, uri),
                None => Some(path.clone()),
            };
            // all must match.
            let mut matched = true;
            for cond in &list.conditions {
                if let IfTerm::StateToken(ref t) = cond.term {
                    if t.starts_with("opaquelocktoken") && !RE_LOCKTOKEN.is_match(t) {
                        debug!("If: malformed lock token {}", t);
                        return Err(StatusCode::LOCKED.into());
                    }
                }
                if !self.check_condition(target.as_ref(), cond).await {
                    matched = false;
                    break;
                }
            }
            // any match is ok.
            if matched {
                return Ok(());
            }
        }
        Err(StatusCode::PRECONDITION_FAILED.into())
    }

    /// The lock gate. Fails if `path` is locked and the `If:` header does
    /// not carry the lock's token. With `exclusive_only`, shared locks
    /// do not count.
    pub(crate) async fn check_lock_status(
        &self,
        headers: &HeaderMap,
        path: &DavPath,
        exclusive_only: bool,
    ) -> DavResult<bool> {
        if !self.backend.can_check_lock() {
            return Ok(true);
        }
        let lock = match self.backend.check_lock(path).await {
            Ok(Some(lock)) => lock,
            Ok(None) | Err(BackendError::NotImplemented) | Err(BackendError::NotFound) => return Ok(true),
            Err(e) => return Err(DavError::BackendError(e)),
        };
        let if_header = headers.typed_get::<IfHeader>().map(|h| h.0);
        let owned = if_header.map(|h| h.contains(&lock.token)).unwrap_or(false);
        if !owned && (!exclusive_only || lock.scope != LockScope::Shared) {
            debug!("lock gate: {} is locked by {}", path, lock.token);
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged() {
        let l = parse_if("(<opaquelocktoken:a-b> [\"etag1\"]) (Not <DAV:no-lock>)").unwrap();
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].uri, None);
        assert_eq!(
            l[0].conditions,
            vec![
                IfCondition { not: false, term: IfTerm::StateToken("opaquelocktoken:a-b".into()) },
                IfCondition { not: false, term: IfTerm::ETag { tag: "etag1".into(), weak: false } },
                IfCondition { not: true, term: IfTerm::StateToken("DAV:no-lock".into()) },
            ]
        );
    }

    #[test]
    fn test_tagged() {
        let l = parse_if("</a> (<t1>) </b> ([W/\"x\"]) </a> (Not <t2>)").unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(l[0].uri.as_deref(), Some("/a"));
        assert_eq!(l[0].conditions.len(), 2);
        assert!(l[0].conditions[1].not);
        assert_eq!(
            l[1].conditions[0].term,
            IfTerm::ETag { tag: "x".into(), weak: true }
        );
    }

    #[test]
    fn test_malformed() {
        assert!(parse_if("<t1>").is_none());
        assert!(parse_if("(<t1>").is_none());
        assert!(parse_if("(foo)").is_none());
        assert!(parse_if("</a> </b> (<t>)").is_none());
    }

    #[test]
    fn test_first_state_token() {
        assert_eq!(
            first_state_token("(<opaquelocktoken:1234>)").as_deref(),
            Some("opaquelocktoken:1234")
        );
        assert_eq!(first_state_token("([\"e\"])"), None);
    }

    #[test]
    fn test_locktoken_regex() {
        assert!(RE_LOCKTOKEN.is_match("opaquelocktoken:3f2504e0-4f89-11d3-9a0c-0305e82c3301"));
        assert!(!RE_LOCKTOKEN.is_match("opaquelocktoken:nope"));
    }
}
