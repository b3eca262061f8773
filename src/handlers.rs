use std::sync::atomic::Ordering;

use actix_web::{web, HttpResponse};

use crate::AppState;

pub async fn readiness() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("OK")
}

pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let hits = state.fileserver_hits.load(Ordering::Relaxed);
    let html = format!(
        r#"<html>
    <body>
        <h1>Welcome, Peep Admin</h1>
        <p>Peep has been visited {} times!</p>
    </body>
</html>"#,
        hits
    );

    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(html)
}

pub async fn reset_hits(state: web::Data<AppState>) -> HttpResponse {
    state.fileserver_hits.store(0, Ordering::Relaxed);
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Hits reset to 0")
}
