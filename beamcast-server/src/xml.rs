//! The XML wire format GameStream clients expect.
//!
//! Every body is a `<root>` document with a numeric `status_code`
//! attribute, an optional `status_message`, and flat child elements; the
//! only nesting is one level for `<App>` entries. The documents are small
//! and fixed-shape, so they are built by hand.

use axum::http::{header, StatusCode};
use axum::response::Response;

enum XmlNode {
    Text(String, String),
    Parent(String, Vec<(String, String)>),
}

/// Builder for a `<root>` response document.
pub struct XmlDoc {
    status_code: u16,
    status_message: Option<String>,
    query: Option<String>,
    nodes: Vec<XmlNode>,
}

impl XmlDoc {
    pub fn status(code: u16) -> Self {
        Self {
            status_code: code,
            status_message: None,
            query: None,
            nodes: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::status(200)
    }

    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.status_message = Some(msg.into());
        self
    }

    /// The request path, echoed on authorization failures.
    pub fn query(mut self, path: impl Into<String>) -> Self {
        self.query = Some(path.into());
        self
    }

    pub fn text(mut self, name: &str, value: impl ToString) -> Self {
        self.nodes
            .push(XmlNode::Text(name.to_string(), value.to_string()));
        self
    }

    /// Append a one-level nested element, e.g. an `<App>` entry.
    pub fn parent(mut self, name: &str, children: Vec<(String, String)>) -> Self {
        self.nodes.push(XmlNode::Parent(name.to_string(), children));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        out.push_str(&format!("<root status_code=\"{}\"", self.status_code));
        if let Some(ref msg) = self.status_message {
            out.push_str(&format!(" status_message=\"{}\"", escape(msg)));
        }
        if let Some(ref query) = self.query {
            out.push_str(&format!(" query=\"{}\"", escape(query)));
        }
        out.push('>');

        for node in &self.nodes {
            match node {
                XmlNode::Text(name, value) => {
                    out.push_str(&format!("<{name}>{}</{name}>", escape(value)));
                }
                XmlNode::Parent(name, children) => {
                    out.push_str(&format!("<{name}>"));
                    for (child, value) in children {
                        out.push_str(&format!("<{child}>{}</{child}>", escape(value)));
                    }
                    out.push_str(&format!("</{name}>"));
                }
            }
        }

        out.push_str("</root>");
        out
    }

    /// Render into an HTTP response. The HTTP status mirrors the
    /// `status_code` attribute, and the connection closes after the body.
    pub fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/xml")
            .header(header::CONNECTION, "close")
            .body(self.render().into())
            .expect("static response parts are valid")
    }
}

fn escape(value: &str) -> String {
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
