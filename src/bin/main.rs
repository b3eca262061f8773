use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use peep::config::Config;
use peep::core::db::Db;
use peep::core::helpers::CredentialVerifier;
use peep::AppState;

#[derive(Parser, Debug)]
#[command(name = "peep", about = "Short-post service backed by a single JSON file")]
struct Args {
    /// Discard the database file before starting.
    #[arg(long)]
    debug: bool,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let db = Arc::new(Db::open(&config.database_path)?);
    if args.debug {
        db.reset()?;
    }
    tracing::info!(path = %db.path().display(), "database ready");

    let state = web::Data::new(AppState::new(db, CredentialVerifier::default(), &config));

    tracing::info!(addr = %config.bind_addr, "server listening");

    HttpServer::new(move || {
        App::new()
            .wrap(peep::cors())
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(peep::configure)
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
