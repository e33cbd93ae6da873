mod errors;
mod params;
mod services;

use std::io;

use actix_web::{web, App, HttpServer};
use blob_stream::StreamEngine;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::params::Args;
use crate::services::file_service::FileService;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let engine = StreamEngine::new(args.transfer_settings()).map_err(io::Error::other)?;
    let service = FileService::open(&args.database, engine).map_err(io::Error::other)?;
    let service = web::Data::new(service);
    tracing::info!("serving files from {} on {}", args.database.display(), args.http_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .configure(services::files::configure)
    })
    .bind(args.http_addr.clone())?
    .run()
    .await
}
