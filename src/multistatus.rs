//! `207 Multi-Status` response bodies.
use std::collections::HashMap;

use http::StatusCode;

use crate::backend::{DavProp, PropName, PropPatchOp, PropValue, NS_DAV_URI};
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339};

// Microsoft clients want typed date values.
const NS_MS_DATATYPES: &str = "urn:uuid:c2f41010-65b3-11d1-a29f-00aa00c14882/";

/// One `<D:response>` of a PROPFIND reply.
#[derive(Debug, Clone, Default)]
pub(crate) struct PropResponse {
    /// href, prefix included and url-encoded.
    pub href: String,
    pub found: Vec<DavProp>,
    pub notfound: Vec<PropName>,
}

pub(crate) fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_str(),
        status.canonical_reason().unwrap_or("")
    )
}

fn escape(s: &str) -> String {
    htmlescape::encode_minimal(s)
}

// Response scoped namespace aliases: ns1, ns2, ... in order of first use.
#[derive(Default)]
struct Namespaces {
    map: HashMap<String, String>,
    decls: String,
}

impl Namespaces {
    fn register(&mut self, ns: &str) {
        if ns.is_empty() || ns == NS_DAV_URI || self.map.contains_key(ns) {
            return;
        }
        let alias = format!("ns{}", self.map.len() + 1);
        self.decls.push_str(&format!(" xmlns:{}=\"{}\"", alias, escape(ns)));
        self.map.insert(ns.to_string(), alias);
    }

    // start tag (without the closing bracket), and end tag.
    fn tags(&self, ns: &str, name: &str) -> (String, String) {
        if ns == NS_DAV_URI {
            (format!("<D:{name}"), format!("</D:{name}>"))
        } else if let Some(alias) = self.map.get(ns) {
            (format!("<{alias}:{name}"), format!("</{alias}:{name}>"))
        } else {
            (format!("<{name} xmlns=\"\""), format!("</{name}>"))
        }
    }
}

fn render_prop(out: &mut String, nss: &Namespaces, prop: &DavProp) {
    let (start, end) = nss.tags(&prop.namespace, &prop.name);
    out.push_str("     ");
    if prop.value.is_empty() {
        out.push_str(&start);
        out.push_str("/>\n");
        return;
    }
    if prop.namespace != NS_DAV_URI {
        out.push_str(&format!("{start}>{}{end}\n", escape(&prop.value.to_text())));
        return;
    }
    let content = match (prop.name.as_str(), &prop.value) {
        ("creationdate", PropValue::Time(t)) => {
            out.push_str(&format!(
                "{start} ns0:dt=\"dateTime.tz\">{}{end}\n",
                systemtime_to_rfc3339(*t)
            ));
            return;
        }
        ("getlastmodified", PropValue::Time(t)) | ("lastaccessed", PropValue::Time(t)) => {
            out.push_str(&format!(
                "{start} ns0:dt=\"dateTime.rfc1123\">{}{end}\n",
                systemtime_to_httpdate(*t)
            ));
            return;
        }
        ("resourcetype", PropValue::Xml(x)) => x.clone(),
        ("resourcetype", v) => format!("<D:{}/>", escape(&v.to_text())),
        ("supportedlock", v) | ("lockdiscovery", v) => v.to_text(),
        (_, v) => escape(&v.to_text()),
    };
    out.push_str(&format!("{start}>{content}{end}\n"));
}

fn render_propname(out: &mut String, nss: &Namespaces, prop: &PropName) {
    let (start, _) = nss.tags(&prop.namespace, &prop.name);
    out.push_str(&format!("     {start}/>\n"));
}

/// PROPFIND body.
///
/// Namespaces of found and not-found properties are declared once, on
/// the root element. A `200` propstat is left out when nothing was found
/// but some requested properties were missing.
pub(crate) fn propfind_body(responses: &[PropResponse]) -> String {
    let mut nss = Namespaces::default();
    for r in responses {
        r.found.iter().for_each(|p| nss.register(&p.namespace));
        r.notfound.iter().for_each(|p| nss.register(&p.namespace));
    }

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<D:multistatus xmlns:D=\"DAV:\" xmlns:ns0=\"{}\"{}>\n",
        NS_MS_DATATYPES, nss.decls
    ));
    for r in responses {
        out.push_str(" <D:response>\n");
        out.push_str(&format!("  <D:href>{}</D:href>\n", r.href));
        if !r.found.is_empty() || r.notfound.is_empty() {
            out.push_str("  <D:propstat>\n   <D:prop>\n");
            for p in &r.found {
                render_prop(&mut out, &nss, p);
            }
            out.push_str("   </D:prop>\n");
            out.push_str(&format!("   <D:status>{}</D:status>\n", status_line(StatusCode::OK)));
            out.push_str("  </D:propstat>\n");
        }
        if !r.notfound.is_empty() {
            out.push_str("  <D:propstat>\n   <D:prop>\n");
            for p in &r.notfound {
                render_propname(&mut out, &nss, p);
            }
            out.push_str("   </D:prop>\n");
            out.push_str(&format!(
                "   <D:status>{}</D:status>\n",
                status_line(StatusCode::NOT_FOUND)
            ));
            out.push_str("  </D:propstat>\n");
        }
        out.push_str(" </D:response>\n");
    }
    out.push_str("</D:multistatus>\n");
    out
}

/// PROPPATCH body: one propstat per distinct status, in order of first
/// appearance.
pub(crate) fn proppatch_body(href: &str, ops: &[PropPatchOp], description: Option<&str>) -> String {
    let mut statuses: Vec<StatusCode> = Vec::new();
    for op in ops {
        if !statuses.contains(&op.status) {
            statuses.push(op.status);
        }
    }

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<D:multistatus xmlns:D=\"DAV:\">\n");
    out.push_str(" <D:response>\n");
    out.push_str(&format!("  <D:href>{href}</D:href>\n"));
    for status in statuses {
        out.push_str("   <D:propstat>\n    <D:prop>");
        for op in ops.iter().filter(|op| op.status == status) {
            out.push_str(&format!("<{} xmlns=\"{}\"/>", op.name, escape(&op.namespace)));
        }
        out.push_str("</D:prop>\n");
        out.push_str(&format!("    <D:status>{}</D:status>\n", status_line(status)));
        out.push_str("   </D:propstat>\n");
    }
    if let Some(descr) = description.filter(|d| !d.is_empty()) {
        out.push_str(&format!(
            "  <D:responsedescription>{}</D:responsedescription>\n",
            escape(descr)
        ));
    }
    out.push_str(" </D:response>\n");
    out.push_str("</D:multistatus>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_namespaces_and_dates() {
        let r = PropResponse {
            href: "/dav/a".to_string(),
            found: vec![
                DavProp::dav("creationdate", UNIX_EPOCH),
                DavProp::dav("getlastmodified", UNIX_EPOCH + Duration::from_secs(784111777)),
                DavProp::dav("resourcetype", "collection"),
                DavProp::new("urn:x", "color", "red & blue"),
                DavProp::new("", "plain", ""),
            ],
            notfound: vec![PropName::new("urn:y", "size")],
        };
        let xml = propfind_body(&[r]);
        assert!(xml.contains("xmlns:ns1=\"urn:x\" xmlns:ns2=\"urn:y\""));
        assert!(xml.contains(
            "<D:creationdate ns0:dt=\"dateTime.tz\">1970-01-01T00:00:00Z</D:creationdate>"
        ));
        assert!(xml.contains("ns0:dt=\"dateTime.rfc1123\">Sun, 06 Nov 1994 08:49:37 GMT<"));
        assert!(xml.contains("<D:resourcetype><D:collection/></D:resourcetype>"));
        assert!(xml.contains("<ns1:color>red &amp; blue</ns1:color>"));
        assert!(xml.contains("<plain xmlns=\"\"/>"));
        assert!(xml.contains("<ns2:size/>"));
        assert!(xml.contains("HTTP/1.1 404 Not Found"));
    }

    #[test]
    fn test_only_notfound() {
        let r = PropResponse {
            href: "/a".to_string(),
            found: vec![],
            notfound: vec![PropName::new("DAV:", "getetag")],
        };
        let xml = propfind_body(&[r]);
        assert!(!xml.contains("200 OK"));
        assert!(xml.contains("<D:getetag/>"));
    }

    #[test]
    fn test_proppatch_grouping() {
        let mut ops = vec![
            PropPatchOp::set("urn:x", "a", "1"),
            PropPatchOp::set("DAV:", "getetag", "x"),
            PropPatchOp::remove("urn:x", "b"),
        ];
        ops[1].status = StatusCode::FORBIDDEN;
        let xml = proppatch_body("/a", &ops, Some("no <way>"));
        assert_eq!(xml.matches("<D:propstat>").count(), 2);
        assert!(xml.contains("<a xmlns=\"urn:x\"/><b xmlns=\"urn:x\"/>"));
        assert!(xml.contains("HTTP/1.1 403 Forbidden"));
        assert!(xml.contains("no &lt;way&gt;"));
    }
}
