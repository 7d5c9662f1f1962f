// File: ./src/client/dav.rs
//! WebDAV/CalDAV request bodies and multistatus parsing.
use crate::error::ProviderError;
use chrono::{DateTime, Utc};

const DAV_NS: &str = "DAV:";
const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
const TIME_RANGE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// PROPFIND (Depth: 1) body listing the collections below the root.
pub fn propfind_calendars() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#
        .to_string()
}

/// calendar-query REPORT returning every VTODO with its data and etag.
pub fn report_all_todos() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VTODO"/>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
        .to_string()
}

/// calendar-query REPORT returning the VEVENTs the server places inside
/// `[from, to)`. Recurring events come back as their master resource.
pub fn report_events(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{}" end="{}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
        from.format(TIME_RANGE_FORMAT),
        to.format(TIME_RANGE_FORMAT)
    )
}

pub fn report_todo_by_uid(uid: &str) -> String {
    report_by_uid("VTODO", uid)
}

pub fn report_event_by_uid(uid: &str) -> String {
    report_by_uid("VEVENT", uid)
}

/// calendar-query REPORT narrowed to one UID.
fn report_by_uid(component: &str, uid: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="{}">
        <c:prop-filter name="UID">
          <c:text-match collation="i;octet">{}</c:text-match>
        </c:prop-filter>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
        component,
        xml_escape(uid)
    )
}

pub fn mkcalendar(display_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:set>
    <d:prop>
      <d:displayname>{}</d:displayname>
      <c:supported-calendar-component-set>
        <c:comp name="VTODO"/>
        <c:comp name="VEVENT"/>
      </c:supported-calendar-component-set>
    </d:prop>
  </d:set>
</c:mkcalendar>"#,
        xml_escape(display_name)
    )
}

/// One `<d:response>` of a multistatus, holding only the properties this
/// crate asks for. Properties come from `200` propstats only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavEntry {
    pub href: String,
    pub display_name: Option<String>,
    pub is_calendar: bool,
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
}

fn is_dav(node: &roxmltree::Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(DAV_NS)
}

fn is_caldav(node: &roxmltree::Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(CALDAV_NS)
}

fn child_text(node: &roxmltree::Node, name: &str) -> Option<String> {
    node.children()
        .find(|c| is_dav(c, name))
        .map(|c| c.text().unwrap_or_default().trim().to_string())
}

fn status_ok(status: Option<String>) -> bool {
    // "HTTP/1.1 200 OK"
    status
        .as_deref()
        .and_then(|s| s.split_whitespace().nth(1))
        .is_none_or(|code| code.starts_with('2'))
}

pub fn parse_multistatus(body: &str) -> Result<Vec<DavEntry>, ProviderError> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| ProviderError::Unavailable(format!("malformed multistatus: {}", e)))?;
    let root = doc.root_element();
    if !is_dav(&root, "multistatus") {
        return Err(ProviderError::Unavailable(format!(
            "expected multistatus, got <{}>",
            root.tag_name().name()
        )));
    }

    let mut entries = Vec::new();
    for response in root.children().filter(|n| is_dav(n, "response")) {
        let Some(href) = child_text(&response, "href").filter(|h| !h.is_empty()) else {
            continue;
        };
        let mut entry = DavEntry {
            href: crate::client::core::strip_host(&href),
            ..Default::default()
        };

        for propstat in response.children().filter(|n| is_dav(n, "propstat")) {
            if !status_ok(child_text(&propstat, "status")) {
                continue;
            }
            let Some(prop) = propstat.children().find(|n| is_dav(n, "prop")) else {
                continue;
            };
            for p in prop.children().filter(|n| n.is_element()) {
                if is_dav(&p, "displayname") {
                    entry.display_name = p
                        .text()
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty());
                } else if is_dav(&p, "resourcetype") {
                    entry.is_calendar = p.children().any(|c| is_caldav(&c, "calendar"));
                } else if is_dav(&p, "getetag") {
                    entry.etag = p.text().map(|t| t.trim().to_string());
                } else if is_caldav(&p, "calendar-data") {
                    entry.calendar_data = p.text().map(str::to_string);
                }
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}
