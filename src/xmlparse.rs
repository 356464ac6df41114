//! Request body parsers for PROPFIND, PROPPATCH and LOCK.
//!
//! Each parser is an explicit state machine over the `xml-rs` event
//! stream. Structural elements are accepted in the `DAV:` namespace and,
//! for sloppy clients, without any namespace.
use xml::attribute::OwnedAttribute;
use xml::name::OwnedName;
use xml::reader::{EventReader, ParserConfig, XmlEvent};

use crate::backend::{LockScope, PropName, PropPatchOp, PropSelection, NS_DAV_URI};
use crate::errors::DavError;
use crate::DavResult;

/// Parsed `<lockinfo>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockInfo {
    pub scope: LockScope,
    pub locktype: String,
    /// XML fragment.
    pub owner: String,
}

fn reader(data: &[u8]) -> EventReader<&[u8]> {
    ParserConfig::new()
        .trim_whitespace(true)
        .ignore_comments(true)
        .coalesce_characters(true)
        .cdata_to_characters(true)
        .create_reader(data)
}

fn ns(name: &OwnedName) -> &str {
    name.namespace.as_deref().unwrap_or("")
}

// structural element check.
fn is_dav(name: &OwnedName, local: &str) -> bool {
    name.local_name == local && (ns(name) == NS_DAV_URI || ns(name).is_empty())
}

fn escape(s: &str) -> String {
    htmlescape::encode_minimal(s)
}

// Re-serializes the content of an element. DAV: elements get the `D:`
// prefix, everything else carries its own default namespace declaration.
#[derive(Default)]
struct Fragment {
    xml: String,
    text: String,
    has_elements: bool,
}

impl Fragment {
    fn start(&mut self, name: &OwnedName, attributes: &[OwnedAttribute]) {
        self.has_elements = true;
        let namespace = ns(name);
        if namespace == NS_DAV_URI {
            self.xml.push_str("<D:");
            self.xml.push_str(&name.local_name);
        } else {
            self.xml.push('<');
            self.xml.push_str(&name.local_name);
            self.xml.push_str(&format!(" xmlns=\"{}\"", escape(namespace)));
        }
        for a in attributes {
            if a.name.namespace.is_none() {
                self.xml
                    .push_str(&format!(" {}=\"{}\"", a.name.local_name, escape(&a.value)));
            }
        }
        self.xml.push('>');
    }

    fn end(&mut self, name: &OwnedName) {
        if ns(name) == NS_DAV_URI {
            self.xml.push_str(&format!("</D:{}>", name.local_name));
        } else {
            self.xml.push_str(&format!("</{}>", name.local_name));
        }
    }

    fn text(&mut self, s: &str) {
        self.xml.push_str(&escape(s));
        self.text.push_str(s);
    }

    // XML if there were elements, plain text otherwise.
    fn value(self) -> String {
        if self.has_elements {
            self.xml
        } else {
            self.text
        }
    }

    fn xml(self) -> String {
        self.xml
    }
}

/// Parse a PROPFIND body. An empty body means `allprop`.
pub(crate) fn parse_propfind(data: &[u8]) -> DavResult<PropSelection> {
    enum State {
        Start,
        PropFind,
        Prop,
        InProp(usize),
        Skip(usize),
        Done,
    }

    if data.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(PropSelection::All);
    }

    let mut xml = reader(data);
    let mut state = State::Start;
    let mut selection = None;
    let mut props = Vec::new();

    loop {
        let event = xml.next()?;
        state = match (state, event) {
            (s, XmlEvent::EndDocument) => {
                state = s;
                break;
            }
            (s, XmlEvent::StartDocument { .. }) => s,
            (s, XmlEvent::ProcessingInstruction { .. }) => s,
            (State::Start, XmlEvent::StartElement { ref name, .. }) if is_dav(name, "propfind") => {
                State::PropFind
            }
            (State::Start, _) => return Err(DavError::XmlParseError),
            (State::PropFind, XmlEvent::StartElement { ref name, .. }) => {
                if is_dav(name, "allprop") {
                    selection.get_or_insert(PropSelection::All);
                    State::Skip(1)
                } else if is_dav(name, "propname") {
                    selection.get_or_insert(PropSelection::Names);
                    State::Skip(1)
                } else if is_dav(name, "prop") {
                    State::Prop
                } else {
                    // "include" and unknown extensions.
                    State::Skip(1)
                }
            }
            (State::PropFind, XmlEvent::EndElement { .. }) => State::Done,
            (State::Skip(n), XmlEvent::StartElement { .. }) => State::Skip(n + 1),
            (State::Skip(1), XmlEvent::EndElement { .. }) => State::PropFind,
            (State::Skip(n), XmlEvent::EndElement { .. }) => State::Skip(n - 1),
            (State::Prop, XmlEvent::StartElement { name, .. }) => {
                let namespace = ns(&name).to_string();
                props.push(PropName::new(namespace, name.local_name));
                State::InProp(1)
            }
            (State::Prop, XmlEvent::EndElement { .. }) => State::PropFind,
            (State::InProp(n), XmlEvent::StartElement { .. }) => State::InProp(n + 1),
            (State::InProp(1), XmlEvent::EndElement { .. }) => State::Prop,
            (State::InProp(n), XmlEvent::EndElement { .. }) => State::InProp(n - 1),
            (State::Done, XmlEvent::StartElement { .. }) => return Err(DavError::XmlParseError),
            (s, _) => s,
        };
    }

    if !matches!(state, State::Done) {
        return Err(DavError::XmlParseError);
    }
    match selection {
        Some(sel) => Ok(sel),
        None if !props.is_empty() => Ok(PropSelection::Props(props)),
        None => Err(DavError::XmlParseError),
    }
}

/// Parse a PROPPATCH body into an ordered list of operations.
pub(crate) fn parse_proppatch(data: &[u8]) -> DavResult<Vec<PropPatchOp>> {
    enum State {
        Start,
        Update,
        SetRemove(bool),
        Prop(bool),
        Value(bool, usize, Fragment),
        Done,
    }

    let mut xml = reader(data);
    let mut state = State::Start;
    let mut ops = Vec::new();

    loop {
        let event = xml.next()?;
        state = match (state, event) {
            (s, XmlEvent::EndDocument) => {
                state = s;
                break;
            }
            (s, XmlEvent::StartDocument { .. }) => s,
            (State::Start, XmlEvent::StartElement { ref name, .. }) if is_dav(name, "propertyupdate") => {
                State::Update
            }
            (State::Start, XmlEvent::ProcessingInstruction { .. }) => State::Start,
            (State::Start, _) => return Err(DavError::XmlParseError),
            (State::Update, XmlEvent::StartElement { ref name, .. }) if is_dav(name, "set") => {
                State::SetRemove(true)
            }
            (State::Update, XmlEvent::StartElement { ref name, .. }) if is_dav(name, "remove") => {
                State::SetRemove(false)
            }
            (State::Update, XmlEvent::StartElement { .. }) => return Err(DavError::XmlParseError),
            (State::Update, XmlEvent::EndElement { .. }) => State::Done,
            (State::SetRemove(set), XmlEvent::StartElement { ref name, .. }) if is_dav(name, "prop") => {
                State::Prop(set)
            }
            (State::SetRemove(_), XmlEvent::StartElement { .. }) => return Err(DavError::XmlParseError),
            (State::SetRemove(_), XmlEvent::EndElement { .. }) => State::Update,
            (State::Prop(set), XmlEvent::StartElement { name, .. }) => {
                let namespace = ns(&name).to_string();
                ops.push(if set {
                    PropPatchOp::set(namespace, name.local_name, "")
                } else {
                    PropPatchOp::remove(namespace, name.local_name)
                });
                State::Value(set, 1, Fragment::default())
            }
            (State::Prop(set), XmlEvent::EndElement { .. }) => State::SetRemove(set),
            (State::Value(set, n, mut frag), XmlEvent::StartElement { name, attributes, .. }) => {
                frag.start(&name, &attributes);
                State::Value(set, n + 1, frag)
            }
            (State::Value(set, n, mut frag), XmlEvent::Characters(s)) => {
                frag.text(&s);
                State::Value(set, n, frag)
            }
            (State::Value(set, 1, frag), XmlEvent::EndElement { .. }) => {
                if set {
                    if let Some(op) = ops.last_mut() {
                        op.value = Some(frag.value());
                    }
                }
                State::Prop(set)
            }
            (State::Value(set, n, mut frag), XmlEvent::EndElement { name }) => {
                frag.end(&name);
                State::Value(set, n - 1, frag)
            }
            (State::Done, XmlEvent::StartElement { .. }) => return Err(DavError::XmlParseError),
            (s, _) => s,
        };
    }

    if !matches!(state, State::Done) {
        return Err(DavError::XmlParseError);
    }
    Ok(ops)
}

/// Parse a LOCK body. Scope and type are mandatory.
pub(crate) fn parse_lockinfo(data: &[u8]) -> DavResult<LockInfo> {
    enum State {
        Start,
        LockInfo,
        Scope,
        Type,
        Owner(usize, Fragment),
        // inside an element we do not look into, and where to go after.
        Inner(usize, Box<State>),
        Done,
    }

    let mut xml = reader(data);
    let mut state = State::Start;
    let mut scope = None;
    let mut locktype = None;
    let mut owner = String::new();

    loop {
        let event = xml.next()?;
        state = match (state, event) {
            (s, XmlEvent::EndDocument) => {
                state = s;
                break;
            }
            (s, XmlEvent::StartDocument { .. }) => s,
            (State::Start, XmlEvent::StartElement { ref name, .. }) if is_dav(name, "lockinfo") => {
                State::LockInfo
            }
            (State::Start, XmlEvent::ProcessingInstruction { .. }) => State::Start,
            (State::Start, _) => return Err(DavError::XmlParseError),
            (State::LockInfo, XmlEvent::StartElement { ref name, .. }) => {
                if is_dav(name, "lockscope") {
                    State::Scope
                } else if is_dav(name, "locktype") {
                    State::Type
                } else if is_dav(name, "owner") {
                    State::Owner(1, Fragment::default())
                } else {
                    State::Inner(1, Box::new(State::LockInfo))
                }
            }
            (State::LockInfo, XmlEvent::EndElement { .. }) => State::Done,
            (State::Scope, XmlEvent::StartElement { ref name, .. }) => {
                if is_dav(name, "exclusive") {
                    scope = Some(LockScope::Exclusive);
                } else if is_dav(name, "shared") {
                    scope = Some(LockScope::Shared);
                } else {
                    return Err(DavError::XmlParseError);
                }
                State::Inner(1, Box::new(State::Scope))
            }
            (State::Scope, XmlEvent::EndElement { .. }) => State::LockInfo,
            (State::Type, XmlEvent::StartElement { name, .. }) => {
                locktype = Some(name.local_name);
                State::Inner(1, Box::new(State::Type))
            }
            (State::Type, XmlEvent::EndElement { .. }) => State::LockInfo,
            (State::Owner(n, mut frag), XmlEvent::StartElement { name, attributes, .. }) => {
                frag.start(&name, &attributes);
                State::Owner(n + 1, frag)
            }
            (State::Owner(n, mut frag), XmlEvent::Characters(s)) => {
                frag.text(&s);
                State::Owner(n, frag)
            }
            (State::Owner(1, frag), XmlEvent::EndElement { .. }) => {
                owner = frag.xml();
                State::LockInfo
            }
            (State::Owner(n, mut frag), XmlEvent::EndElement { name }) => {
                frag.end(&name);
                State::Owner(n - 1, frag)
            }
            (State::Inner(n, back), XmlEvent::StartElement { .. }) => State::Inner(n + 1, back),
            (State::Inner(1, back), XmlEvent::EndElement { .. }) => *back,
            (State::Inner(n, back), XmlEvent::EndElement { .. }) => State::Inner(n - 1, back),
            (State::Done, XmlEvent::StartElement { .. }) => return Err(DavError::XmlParseError),
            (s, _) => s,
        };
    }

    if !matches!(state, State::Done) {
        return Err(DavError::XmlParseError);
    }
    match (scope, locktype) {
        (Some(scope), Some(locktype)) => Ok(LockInfo { scope, locktype, owner }),
        _ => Err(DavError::XmlParseError),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propfind() {
        assert_eq!(parse_propfind(b"").unwrap(), PropSelection::All);
        let body = br#"<?xml version="1.0" encoding="utf-8" ?>
            <D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse_propfind(body).unwrap(), PropSelection::Names);

        let body = br#"<propfind xmlns="DAV:" xmlns:Z="urn:z">
              <prop><getetag/><Z:color/></prop>
            </propfind>"#;
        assert_eq!(
            parse_propfind(body).unwrap(),
            PropSelection::Props(vec![PropName::new("DAV:", "getetag"), PropName::new("urn:z", "color")])
        );

        assert!(parse_propfind(b"<D:foo xmlns:D=\"DAV:\"/>").is_err());
        assert!(parse_propfind(b"<propfind><prop>").is_err());
    }

    #[test]
    fn test_proppatch() {
        let body = br#"<D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:set><D:prop><Z:author>Jim &amp; Bob</Z:author></D:prop></D:set>
              <D:remove><D:prop><Z:color/></D:prop></D:remove>
              <D:set><D:prop><Z:tree><Z:leaf n="1">x</Z:leaf></Z:tree></D:prop></D:set>
            </D:propertyupdate>"#;
        let ops = parse_proppatch(body).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], PropPatchOp::set("urn:z", "author", "Jim & Bob"));
        assert_eq!(ops[1], PropPatchOp::remove("urn:z", "color"));
        assert_eq!(ops[2].value.as_deref(), Some(r#"<leaf xmlns="urn:z" n="1">x</leaf>"#));
    }

    #[test]
    fn test_lockinfo() {
        let body = b"<lockinfo><lockscope><exclusive/></lockscope>\
            <locktype><write/></locktype><owner>Alice</owner></lockinfo>";
        let li = parse_lockinfo(body).unwrap();
        assert_eq!(li.scope, LockScope::Exclusive);
        assert_eq!(li.locktype, "write");
        assert_eq!(li.owner, "Alice");

        let body = br#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:shared/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
            <D:owner><D:href>http://example.org/~bob</D:href></D:owner></D:lockinfo>"#;
        let li = parse_lockinfo(body).unwrap();
        assert_eq!(li.scope, LockScope::Shared);
        assert_eq!(li.owner, "<D:href>http://example.org/~bob</D:href>");

        let body = b"<lockinfo><locktype><write/></locktype></lockinfo>";
        assert!(parse_lockinfo(body).is_err());
    }
}
