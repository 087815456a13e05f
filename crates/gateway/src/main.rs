use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroize;

use docshare_gateway::config::Config;
use docshare_gateway::intake::UploadIntake;
use docshare_gateway::mail::{LogMailer, MailDispatcher, MailOutbox, Mailer, SmtpMailer, OUTBOX_CAPACITY};
use docshare_gateway::store::{MemoryStore, PgStore, UserStore};
use docshare_gateway::tokens::TokenService;
use docshare_gateway::{build_router, init_tracing, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mut config = Config::from_env()?;

    let store: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL...");
            Arc::new(PgStore::connect(url).await?)
        }
        None => {
            warn!("DATABASE_URL is not set. Using an in-memory store; all accounts and file records are lost on restart.");
            Arc::new(MemoryStore::new())
        }
    };

    let tokens = TokenService::new(&config.jwt_secret);
    config.jwt_secret.zeroize();

    let intake = UploadIntake::new(config.upload_dir.clone());
    intake.prepare().await?;
    info!("Storing uploads in {}", intake.dir().display());

    let mailer: Arc<dyn Mailer> = match &config.mail {
        Some(mail) => {
            info!("Sending verification mail through {}:{}", mail.host, mail.port);
            Arc::new(SmtpMailer::new(mail)?)
        }
        None => {
            warn!("EMAIL_HOST is not set. Verification links will only be logged.");
            Arc::new(LogMailer)
        }
    };

    let (outbox, outbox_rx) = MailOutbox::channel(OUTBOX_CAPACITY);
    let dispatcher = MailDispatcher::new(outbox_rx, mailer);
    tokio::spawn(async move {
        dispatcher.start().await;
    });

    let shared_state = Arc::new(AppState {
        store,
        tokens,
        intake,
        outbox,
        base_url: config.base_url.clone(),
    });

    let app = build_router(shared_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("DocShare gateway listening on {} (public URL {})", addr, config.base_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
