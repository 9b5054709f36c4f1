//! HTTP host adapter.
//!
//! Serves the uploads directory under the public prefix of `base_url`. A
//! request that finds no file is handed to the [`RequestInterceptor`]; only a
//! declined outcome falls through to the plain 404.
//!
//! ```text
//! GET /wp-content/uploads/2023/05/photo-300x200.jpg
//!   ├── file exists            → 200 (static)
//!   ├── interceptor Handled    → 200 (generated just now)
//!   └── interceptor Declined   → 404
//! ```
//!
//! Requests are handled on `server.workers` plain threads. Generation inside a
//! request fans out on the global rayon pool sized by `generation.max_processes`.

use crate::imaging::ImageBackend;
use crate::intercept::{Outcome, RequestInterceptor};
use crate::naming::mime_type_for_extension;
use crate::response::ImageResponse;
use anyhow::{Context, Result, anyhow};
use percent_encoding::percent_decode_str;
use std::fs;
use std::path::{Path, PathBuf};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, info, warn};

/// Everything a request handler needs.
pub struct SiteHandler<B: ImageBackend> {
    uploads_dir: PathBuf,
    url_prefix: String,
    interceptor: RequestInterceptor<B>,
}

impl<B: ImageBackend> SiteHandler<B> {
    pub fn new(
        uploads_dir: impl Into<PathBuf>,
        base_url: &str,
        interceptor: RequestInterceptor<B>,
    ) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            url_prefix: url_prefix(base_url),
            interceptor,
        }
    }

    /// Existing file under the uploads directory for a request URL.
    pub fn static_path(&self, request_url: &str) -> Option<PathBuf> {
        resolve_static(request_url, &self.url_prefix, &self.uploads_dir)
    }
}

/// Path component of `base_url`, without a trailing slash.
///
/// `https://example.com/wp-content/uploads/` → `/wp-content/uploads`.
pub fn url_prefix(base_url: &str) -> String {
    let path = match url::Url::parse(base_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => base_url.to_string(),
    };
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') || trimmed.is_empty() {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Map a request URL onto a file in `root`, if one exists.
fn resolve_static(request_url: &str, prefix: &str, root: &Path) -> Option<PathBuf> {
    let path = request_url.split(['?', '#']).next().unwrap_or(request_url);
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let rel = decoded.strip_prefix(prefix)?.strip_prefix('/')?;

    // Dot segments cover `..` and the library manifest.
    if rel.split('/').any(|segment| segment.starts_with('.')) {
        return None;
    }

    let local = root.join(rel);
    local.is_file().then_some(local)
}

/// Bind the HTTP server.
pub fn bind(address: &str) -> Result<Server> {
    Server::http(address).map_err(|e| anyhow!("Failed to bind {address}: {e}"))
}

/// Handle requests on `workers` threads until the server shuts down (blocking).
///
/// A regeneration occupies only the worker that asked for it; its per-size
/// work runs on the global rayon pool.
pub fn run<B: ImageBackend>(server: &Server, handler: &SiteHandler<B>, workers: usize) -> Result<()> {
    if let Some(addr) = server.server_addr().to_ip() {
        info!(%addr, workers, "serving uploads");
    }

    std::thread::scope(|scope| {
        for i in 0..workers.max(1) {
            std::thread::Builder::new()
                .name(format!("http-{i}"))
                .spawn_scoped(scope, || {
                    for request in server.incoming_requests() {
                        if let Err(e) = handle_request(request, handler) {
                            warn!(error = %e, "request error");
                        }
                    }
                })
                .context("Failed to spawn request worker")?;
        }
        Ok(())
    })
}

fn handle_request<B: ImageBackend>(request: Request, handler: &SiteHandler<B>) -> Result<()> {
    if !matches!(request.method(), Method::Get | Method::Head) {
        return send_text(request, 405, "405 Method Not Allowed");
    }

    if let Some(path) = handler.static_path(request.url()) {
        return respond_file(request, &path);
    }

    let url = request.url().to_string();
    match handler.interceptor.on_not_found(&url) {
        Outcome::Handled(image) => respond_image(request, image),
        Outcome::Declined => {
            debug!(url = %url, "not found");
            send_text(request, 404, "404 Not Found")
        }
    }
}

fn respond_file(request: Request, path: &Path) -> Result<()> {
    let content_type = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(mime_type_for_extension)
        .unwrap_or("application/octet-stream");
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file.metadata()?.len() as usize;
    send_stream(request, content_type, file, len)
}

fn respond_image(request: Request, image: ImageResponse) -> Result<()> {
    let content_type = image.content_type;
    let len = image.content_length as usize;
    send_stream(request, content_type, image.into_reader(), len)
}

fn send_stream<R: std::io::Read + Send + 'static>(
    request: Request,
    content_type: &str,
    body: R,
    len: usize,
) -> Result<()> {
    let headers = vec![make_header("Content-Type", content_type)?];
    if request.method() == &Method::Head {
        let response = Response::new(StatusCode(200), headers, std::io::empty(), Some(len), None);
        request.respond(response)?;
    } else {
        let response = Response::new(StatusCode(200), headers, body, Some(len), None);
        request.respond(response)?;
    }
    Ok(())
}

fn send_text(request: Request, status: u16, body: &str) -> Result<()> {
    let response = Response::from_string(body)
        .with_status_code(StatusCode(status))
        .with_header(make_header("Content-Type", "text/plain; charset=utf-8")?);
    request.respond(response)?;
    Ok(())
}

fn make_header(key: &str, value: &str) -> Result<Header> {
    Header::from_bytes(key, value).map_err(|()| anyhow!("Invalid header {key}: {value}"))
}
