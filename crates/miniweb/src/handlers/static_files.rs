// src/handlers/static_files.rs
use crate::state::AppState;
use miniweb_core::{Context, HandlerError, HandlerResult, Response};
use std::path::{Path, PathBuf};

pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Map a request path below `root` to a regular file.
///
/// Parent components, hidden names and symlinks escaping `root` are forbidden.
pub fn resolve(root: &Path, rel: &str) -> Result<PathBuf, HandlerError> {
    if rel.is_empty() {
        return Err(HandlerError::NotFound(format!("No such file: /static/{rel}")));
    }
    let suspicious = rel.starts_with('/')
        || rel.contains('\\')
        || rel.contains('\0')
        || rel.split('/').any(|c| c == ".." || c.starts_with('.'));
    if suspicious {
        return Err(HandlerError::Forbidden(format!("Access denied: /static/{rel}")));
    }

    let missing = || HandlerError::NotFound(format!("No such file: /static/{rel}"));
    let root = root.canonicalize().map_err(|_| missing())?;
    let path = root.join(rel).canonicalize().map_err(|_| missing())?;
    if !path.starts_with(&root) {
        return Err(HandlerError::Forbidden(format!("Access denied: /static/{rel}")));
    }
    if !path.is_file() {
        return Err(missing());
    }
    Ok(path)
}

/// `GET /static/*path`
pub fn serve(ctx: &Context<'_, AppState>) -> HandlerResult {
    let rel = ctx.get_param("path").unwrap_or("");
    let path = resolve(&ctx.state.config.static_dir, rel)?;
    let body = std::fs::read(&path)?;
    Ok(Response::bytes(mime_type(&path), body).header("Cache-Control", "public, max-age=300"))
}
