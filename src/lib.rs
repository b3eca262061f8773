use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::web;

pub mod auth;
pub mod config;
pub mod core;
pub mod handlers;
pub mod models;
pub mod posts;
pub mod static_server;
pub mod users;
pub mod webhooks;

use crate::auth::TokenService;
use crate::config::Config;
use crate::core::db::Db;
use crate::core::errors::ApiError;
use crate::core::helpers::CredentialVerifier;
use crate::posts::PostRepository;
use crate::users::AccountRepository;

/// Everything a request handler needs, built once at startup around one store handle.
pub struct AppState {
    pub posts: PostRepository,
    pub accounts: AccountRepository,
    pub tokens: TokenService,
    pub webhook_key: String,
    pub fileserver_hits: AtomicUsize,
}

impl AppState {
    pub fn new(db: Arc<Db>, credentials: CredentialVerifier, config: &Config) -> Self {
        Self::with_tokens(
            db.clone(),
            credentials,
            TokenService::new(db, &config.jwt_secret),
            &config.webhook_key,
        )
    }

    pub fn with_tokens(
        db: Arc<Db>,
        credentials: CredentialVerifier,
        tokens: TokenService,
        webhook_key: &str,
    ) -> Self {
        AppState {
            posts: PostRepository::new(db.clone()),
            accounts: AccountRepository::new(db, credentials),
            tokens,
            webhook_key: webhook_key.to_string(),
            fileserver_hits: AtomicUsize::new(0),
        }
    }
}

/// Browser clients are served from any origin.
pub fn cors() -> Cors {
    Cors::permissive()
}

// === Routes ===
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::BadRequest(format!("Invalid JSON body: {}", err)).into()
    }));

    cfg.service(
        web::scope("/api")
            .route("/healthz", web::get().to(handlers::readiness))
            .route("/reset", web::get().to(handlers::reset_hits))
            .service(
                web::resource("/users")
                    .route(web::post().to(users::create_user))
                    .route(web::put().to(users::update_user)),
            )
            .route("/login", web::post().to(auth::login_user))
            .route("/refresh", web::post().to(auth::refresh_token))
            .route("/revoke", web::post().to(auth::revoke_token))
            .service(
                web::resource("/posts")
                    .route(web::get().to(posts::list_posts))
                    .route(web::post().to(posts::create_post)),
            )
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(posts::get_post))
                    .route(web::delete().to(posts::delete_post)),
            )
            .route("/billing/webhooks", web::post().to(webhooks::handle_upgrade_webhook)),
    )
    .service(web::scope("/admin").route("/metrics", web::get().to(handlers::metrics)))
    .route("/app", web::get().to(static_server::serve_app))
    .route("/app/{path:.*}", web::get().to(static_server::serve_app));
}
