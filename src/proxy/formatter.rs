//! Header value templates.
//!
//! A template is literal text with embedded commands:
//!
//! - `%REQ(name)%` - first value of request header `name`, empty if absent
//! - `%BYTES_RECEIVED%` - request body bytes received so far
//! - `%DOWNSTREAM_REMOTE_ADDRESS_WITHOUT_PORT%` - client IP
//! - `%REQUEST_PATH%` - request path without query
//! - `%%` - a literal `%`

use crate::config::{AppendAction, HeaderValueOption};
use crate::error::ConfigError;
use crate::proxy::context::RequestContext;
use http::{HeaderMap, HeaderName, HeaderValue};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    RequestHeader(HeaderName),
    BytesReceived,
    DownstreamAddress,
    RequestPath,
}

/// A parsed template, rendered once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatString {
    segments: Vec<Segment>,
}

impl FormatString {
    pub fn parse(format: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidFormat {
            format: format.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = format;

        while let Some(start) = rest.find('%') {
            literal.push_str(&rest[..start]);
            rest = &rest[start + 1..];

            if let Some(after) = rest.strip_prefix('%') {
                literal.push('%');
                rest = after;
                continue;
            }

            let end = rest.find('%').ok_or_else(|| invalid("unterminated command"))?;
            let command = &rest[..end];
            rest = &rest[end + 1..];

            let segment = match command {
                "BYTES_RECEIVED" => Segment::BytesReceived,
                "DOWNSTREAM_REMOTE_ADDRESS_WITHOUT_PORT" => Segment::DownstreamAddress,
                "REQUEST_PATH" => Segment::RequestPath,
                _ => {
                    let name = command
                        .strip_prefix("REQ(")
                        .and_then(|c| c.strip_suffix(')'))
                        .ok_or_else(|| invalid("unknown command"))?;
                    let name = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|_| invalid("invalid header name in %REQ()%"))?;
                    Segment::RequestHeader(name)
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Returns the template text unchanged when it has no commands.
    pub fn as_literal(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [] => Some(""),
            [Segment::Literal(s)] => Some(s),
            _ => None,
        }
    }

    pub fn format(&self, req: &RequestContext) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::RequestHeader(name) => {
                    if let Some(v) = req.headers.get(name).and_then(|v| v.to_str().ok()) {
                        out.push_str(v);
                    }
                }
                Segment::BytesReceived => {
                    let mut buf = itoa::Buffer::new();
                    out.push_str(buf.format(req.bytes_received));
                }
                Segment::DownstreamAddress => out.push_str(&req.client_ip.to_string()),
                Segment::RequestPath => out.push_str(&req.uri_path),
            }
        }
        out
    }
}

/// One header to add, compiled from a `HeaderValueOption`.
#[derive(Debug, Clone)]
pub struct HeaderMutation {
    pub name: HeaderName,
    pub value: FormatString,
    pub action: AppendAction,
}

/// A rendered mutation, ready to apply.
#[derive(Debug, Clone)]
pub struct RenderedHeader {
    name: HeaderName,
    value: HeaderValue,
    action: AppendAction,
}

/// An ordered list of header additions.
#[derive(Debug, Clone, Default)]
pub struct HeaderMutations {
    ops: Vec<HeaderMutation>,
}

impl HeaderMutations {
    pub fn compile(options: &[HeaderValueOption]) -> Result<Self, ConfigError> {
        let ops = options
            .iter()
            .map(|o| {
                let name = HeaderName::from_bytes(o.key.as_bytes()).map_err(|e| {
                    ConfigError::InvalidHeaderName {
                        name: o.key.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let value = FormatString::parse(&o.value)?;
                // Catch bad literal values at load time rather than per request.
                if let Some(literal) = value.as_literal() {
                    HeaderValue::from_str(literal).map_err(|e| ConfigError::InvalidHeaderValue {
                        name: o.key.clone(),
                        reason: e.to_string(),
                    })?;
                }
                Ok(HeaderMutation {
                    name,
                    value,
                    action: o.append_action,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { ops })
    }

    /// Render every template against `req`. Values that render empty or are
    /// not valid header values are dropped.
    pub fn render(&self, req: &RequestContext) -> Vec<RenderedHeader> {
        self.ops
            .iter()
            .filter_map(|op| {
                let raw = op.value.format(req);
                if raw.is_empty() {
                    return None;
                }
                match HeaderValue::from_str(&raw) {
                    Ok(value) => Some(RenderedHeader {
                        name: op.name.clone(),
                        value,
                        action: op.action,
                    }),
                    Err(e) => {
                        tracing::warn!(header = %op.name, "formatted header value is invalid, skipping: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Render against `req` and apply to `headers`.
    pub fn apply(&self, req: &RequestContext, headers: &mut HeaderMap) {
        apply_rendered(self.render(req), headers);
    }
}

pub fn apply_rendered(rendered: Vec<RenderedHeader>, headers: &mut HeaderMap) {
    for h in rendered {
        match h.action {
            AppendAction::AppendIfExistsOrAdd => {
                headers.append(h.name, h.value);
            }
            AppendAction::AddIfAbsent => {
                if !headers.contains_key(&h.name) {
                    headers.insert(h.name, h.value);
                }
            }
            AppendAction::OverwriteIfExistsOrAdd => {
                headers.insert(h.name, h.value);
            }
            AppendAction::OverwriteIfExists => {
                if headers.contains_key(&h.name) {
                    headers.insert(h.name, h.value);
                }
            }
        }
    }
}
