use std::{sync::Arc, time::Duration};

use engine::{Engine, HttpTransport, MemoryProvider, Transport, TransportConfig};
use server::AdminAccess;
use settings::{ProviderKind, Settings};

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "console_admin={level},server={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let transport: Arc<dyn Transport> = match settings.provider.kind {
        ProviderKind::Supabase => {
            tracing::info!(base_url = %settings.provider.base_url, "using the hosted provider");
            Arc::new(HttpTransport::new(TransportConfig {
                base_url: settings.provider.base_url.clone(),
                service_key: settings.provider.service_key.clone(),
                timeout: Duration::from_secs(settings.provider.timeout_secs),
            })?)
        }
        ProviderKind::Memory => {
            tracing::warn!("using the in-memory provider, nothing is persisted");
            Arc::new(MemoryProvider::new())
        }
    };

    let engine = Engine::builder()
        .transport(transport)
        .identity_domain(&settings.identity.email_domain)
        .build()?;

    if !settings.admin.protect_users {
        tracing::warn!(
            "/users routes accept unauthenticated requests; set admin.protect_users = true to require credentials"
        );
    }
    let admin = AdminAccess {
        username: settings.admin.username,
        password: settings.admin.password,
        protect_users: settings.admin.protect_users,
    };

    let addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    server::run_with_listener(engine, admin, listener).await?;

    Ok(())
}
