use std::sync::atomic::Ordering;

use actix_web::{web, HttpRequest, HttpResponse};
use mime_guess::from_path;
use rust_embed::RustEmbed;

use crate::core::errors::{ApiError, ApiResult};
use crate::AppState;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

/// Serves embedded files under `/app`. Every request counts as a hit, found or not.
pub async fn serve_app(req: HttpRequest, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    state.fileserver_hits.fetch_add(1, Ordering::Relaxed);

    let path = req.match_info().get("path").unwrap_or("");
    let file_path = match path.trim_start_matches('/') {
        "" => "index.html",
        p => p,
    };

    let file = Assets::get(file_path)
        .ok_or_else(|| ApiError::NotFound("File not found".to_string()))?;

    let mime = from_path(file_path).first_or_octet_stream();

    Ok(HttpResponse::Ok()
        .content_type(mime.as_ref())
        .body(file.data.into_owned()))
}
