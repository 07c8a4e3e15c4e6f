//! HTTP response handlers.
//!
//! Documents always leave as complete HTML with the status the pipeline
//! chose; the pipeline itself never answers a request, so this is the
//! only place response objects are built for non-asset URLs.

use anyhow::Result;
use tiny_http::{Header, Method, Request, Response, StatusCode};

use crate::render::RenderedDocument;
use crate::utils::mime::types::{HTML, PLAIN};

/// Respond with a rendered document.
pub fn respond_document(request: Request, document: RenderedDocument) -> Result<()> {
    if is_head_request(&request) {
        return send_head(request, document.status, HTML);
    }
    send_body(request, document.status, HTML, document.html.into_bytes())
}

/// Respond with 503 Service Unavailable (server shutting down).
pub fn respond_unavailable(request: Request) -> Result<()> {
    send_body(request, 503, PLAIN, b"503 Service Unavailable".to_vec())
}

fn is_head_request(request: &Request) -> bool {
    request.method() == &Method::Head
}

fn send_head(request: Request, status: u16, content_type: &'static str) -> Result<()> {
    let response = Response::empty(StatusCode(status))
        .with_header(make_header("Content-Type", content_type))
        .with_header(make_header("Cache-Control", "no-cache"));
    request.respond(response)?;
    Ok(())
}

fn send_body(
    request: Request,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> Result<()> {
    let response = Response::from_data(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", content_type))
        .with_header(make_header("Cache-Control", "no-cache"));
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &'static str, value: &'static str) -> Header {
    // Static ASCII key/value pairs; construction cannot fail.
    Header::from_bytes(key, value).unwrap()
}
