use encoding_rs::Encoding;
use http::{
    HeaderMap, HeaderValue, Response, StatusCode,
    header::{self, CONTENT_LENGTH, TRANSFER_ENCODING},
    response::Parts,
};
use hyper::Body;

use crate::{
    config::RuleSet,
    decode::{ContentCoding, decode_body},
    error::PipelineError,
    modify::rewrite_document,
};

pub fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Only HTML bodies are rewritten.
pub fn is_html(headers: &HeaderMap) -> bool {
    content_type(headers).contains("text/html")
}

pub fn rewrite_ssl_links(mut text: String, hosts: &[String]) -> String {
    for host in hosts {
        text = text.replace(&format!("https://{host}"), &format!("http://{host}"));
    }
    text
}

/// A rewritten body ready to replace the upstream one.
#[derive(Debug)]
pub struct Transformed {
    pub body: Vec<u8>,
    /// Set when the body is no longer in the charset `Content-Type` declares.
    pub content_type: Option<HeaderValue>,
}

/// Runs the whole transformation on a buffered upstream body. Errors here are
/// request-fatal.
pub fn transform_body(
    headers: &HeaderMap,
    raw: &[u8],
    url: &str,
    rules: &RuleSet,
) -> Result<Transformed, PipelineError> {
    let content_encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok());
    let decoded = decode_body(raw, content_encoding, content_type(headers))?;
    let html = rewrite_document(&decoded.text, url, rules.rules())?;
    let html = rewrite_ssl_links(html, rules.ssl_rewrite());
    let body = encode_body(&html, decoded.charset, decoded.coding)?;

    // encoding_rs writes UTF-16 and "replacement" as UTF-8.
    let relabeled = decoded
        .charset
        .filter(|encoding| encoding.output_encoding() != *encoding)
        .and_then(|encoding| relabel_charset(content_type(headers), encoding.output_encoding()));
    Ok(Transformed {
        body,
        content_type: relabeled,
    })
}

/// `Content-Type` with its `charset=` parameter pointing at `encoding`.
fn relabel_charset(content_type: &str, encoding: &'static Encoding) -> Option<HeaderValue> {
    let idx = content_type.find("charset=")?;
    let relabeled = format!("{}charset={}", &content_type[..idx], encoding.name());
    HeaderValue::from_str(&relabeled).ok()
}

/// Converts back to the declared charset (when the body was transcoded from
/// one) and re-applies the upstream content coding.
pub fn encode_body(
    text: &str,
    charset: Option<&'static Encoding>,
    coding: ContentCoding,
) -> Result<Vec<u8>, PipelineError> {
    let encoded = match charset {
        Some(encoding) => {
            let (bytes, _, _) = encoding.encode(text);
            coding.encode(&bytes)
        }
        None => coding.encode(text.as_bytes()),
    };
    encoded.map_err(PipelineError::Encode)
}

/// Upstream head with a new body; `Content-Length` follows the new body.
pub fn transformed_response(mut parts: Parts, transformed: Transformed) -> Response<Body> {
    let Transformed { body, content_type } = transformed;
    if let Some(content_type) = content_type {
        parts.headers.insert(header::CONTENT_TYPE, content_type);
    }
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(TRANSFER_ENCODING);
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Response::from_parts(parts, Body::from(body))
}

/// Relays the upstream response untouched. There is nothing to relay when the
/// upstream request itself failed.
pub fn passthrough(response: Option<Response<Body>>) -> Result<Response<Body>, PipelineError> {
    response.ok_or(PipelineError::ResponseUnset)
}

pub fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
