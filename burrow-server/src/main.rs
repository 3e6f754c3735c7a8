use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use burrow_server::attestation::AllowAllGate;
use burrow_server::config::Config;
use burrow_server::state::AppState;
use burrow_server::{build_acme_router, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Configuration errors must exit non-zero before any listener binds or
    // logging starts, so this check runs ahead of the tracing subscriber.
    if let Err(message) = config.validate() {
        eprintln!("invalid configuration: {message}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .init();

    let base_domain = config.base_domain.clone();
    let listener_port = config.listener_port;
    let http_listener_port = config.http_listener_port;
    let tls = config.tls_cert_file.clone().zip(config.tls_key_file.clone());

    let state = AppState::new(config, Arc::new(AllowAllGate));
    let app = build_router(state.clone());

    // The plain-HTTP listener only ever answers ACME HTTP-01 challenges; it
    // runs regardless of whether TLS is configured, same as the teacher's
    // always-on ACME challenge responder.
    let acme_app = build_acme_router(state);
    let acme_addr = SocketAddr::from(([0, 0, 0, 0], http_listener_port));
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(acme_addr).await {
            Ok(listener) => {
                info!(addr = %acme_addr, "acme challenge listener bound");
                if let Err(e) = axum::serve(listener, acme_app).await {
                    tracing::warn!(error = %e, "acme challenge listener exited");
                }
            }
            Err(e) => tracing::warn!(addr = %acme_addr, error = %e, "failed to bind acme challenge listener"),
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], listener_port));

    match tls {
        Some((cert, key)) => {
            info!(%addr, base_domain, "burrowd listening (tls terminated)");
            let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key).await?;
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await?;
        }
        None => {
            info!(%addr, base_domain, "burrowd listening (plain http, no tls configured)");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
        }
    }

    Ok(())
}
