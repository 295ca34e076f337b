use std::{io, sync::Arc};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use todo_web::{
    admin,
    config::{Cli, Command, ServeArgs},
    database::Database,
    model::{Clock, SystemClock},
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log)?;

    let path = cli.database_path()?;
    let db = Database::open(&path)
        .with_context(|| format!("could not open database at {}", path.display()))?;
    info!(database = %path.display(), "database ready");

    match cli.selected_command()? {
        Command::Serve(args) => serve(args, db).await,
        Command::Category { action } => {
            let now = SystemClock.now();
            db.with_conn(|conn| admin::run_category(conn, action, now, &mut io::stdout().lock()))
        }
        Command::Tag { action } => {
            db.with_conn(|conn| admin::run_tag(conn, action, &mut io::stdout().lock()))
        }
    }
}

fn init_tracing(filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter).context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}

async fn serve(args: ServeArgs, db: Database) -> anyhow::Result<()> {
    let state = AppState::new(db, Arc::new(SystemClock)).context("could not load templates")?;
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("could not bind {}", args.bind))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("received Ctrl+C, shutting down");
}
