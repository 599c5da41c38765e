//! Document portal server.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::{Parser, Subcommand, ValueEnum};
use doc_portal::api::{self, AppState};
use doc_portal_core::auth::Hs256Verifier;
use doc_portal_core::identity::{HttpIdentityProvider, IdentityProvider, StaticIdentityProvider};
use doc_portal_core::storage::{InMemoryObjectStore, ObjectStore, S3ObjectStore};
use doc_portal_core::{DocumentPortal, PortalConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doc-portal")]
#[command(about = "Document storage with tag-based sharing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve(ServeArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Memory,
    S3,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Listen address
    #[arg(short, long, env = "DOC_PORTAL_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    #[arg(long, env = "DOC_PORTAL_BACKEND", value_enum, default_value = "memory")]
    backend: Backend,

    #[arg(long, env = "DOC_PORTAL_S3_BUCKET", default_value = "doc-portal")]
    s3_bucket: String,

    /// Prefix for per-object metadata sidecars
    #[arg(long, env = "DOC_PORTAL_S3_META_PREFIX")]
    s3_meta_prefix: Option<String>,

    /// Base URL of the identity service (`GET {url}/users/{id}`)
    #[arg(long, env = "DOC_PORTAL_IDENTITY_URL")]
    identity_url: Option<String>,

    #[arg(long, env = "DOC_PORTAL_IDENTITY_TOKEN", hide_env_values = true)]
    identity_token: Option<String>,

    #[arg(long, env = "DOC_PORTAL_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Accept `X-User-Id` without a bearer token
    #[arg(long, env = "DOC_PORTAL_TRUST_USER_HEADER")]
    trust_user_header: bool,

    /// Base of signed URLs issued by the memory backend. Must be this
    /// server's address followed by `/files` for the links to open.
    #[arg(long, env = "DOC_PORTAL_URL_BASE", default_value = "http://127.0.0.1:3000/files")]
    url_base: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = PortalConfig::from_env();

    let mut files = None;
    let store: Arc<dyn ObjectStore> = match args.backend {
        Backend::Memory => {
            warn!("using the in-memory backend, documents are lost on exit");
            let memory = Arc::new(InMemoryObjectStore::new().with_url_base(args.url_base.clone()));
            files = Some(memory.clone());
            memory
        }
        Backend::S3 => {
            let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
            let mut s3 = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws), args.s3_bucket.clone());
            if let Some(prefix) = &args.s3_meta_prefix {
                s3 = s3.with_meta_prefix(prefix.clone());
            }
            info!(bucket = %args.s3_bucket, "using S3 backend");
            Arc::new(s3)
        }
    };

    let identity: Arc<dyn IdentityProvider> = match &args.identity_url {
        Some(url) => {
            let mut provider = HttpIdentityProvider::new(url.clone());
            if let Some(token) = &args.identity_token {
                provider = provider.with_token(token.clone());
            }
            Arc::new(provider)
        }
        None => {
            warn!("no identity service configured, owner emails will be empty");
            Arc::new(StaticIdentityProvider::new())
        }
    };

    if args.trust_user_header {
        warn!("trusting X-User-Id headers, do not expose this server publicly");
    }

    let state = AppState {
        portal: Arc::new(DocumentPortal::new(store, identity, config)),
        verifier: Arc::new(Hs256Verifier::new(args.jwt_secret)),
        trust_user_header: args.trust_user_header,
        files,
    };
    let app = api::router(state).layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let listener = TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
