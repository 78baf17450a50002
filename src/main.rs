use std::future::IntoFuture;
use std::sync::Arc;

use tokio::net::TcpListener;

use fanoutserver::bus::InMemoryBus;
use fanoutserver::config::Config;
use fanoutserver::gateway::{Gateway, ListenerExit};
use fanoutserver::publisher::Publisher;
use fanoutserver::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanoutserver=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env();
    print_banner(&config);

    let bus = Arc::new(InMemoryBus::new());
    let gateway = Arc::new(Gateway::new(
        bus.clone(),
        config.gateway.clone(),
        config.registry(),
    ));
    gateway.start().await.expect("failed to start gateway");

    let state = AppState {
        gateway: Arc::clone(&gateway),
        publisher: Publisher::new(bus),
    };
    let app = fanoutserver::routes::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ listening on 0.0.0.0:{actual_port}\x1b[0m");
    eprintln!();

    let shutdown_gateway = Arc::clone(&gateway);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
        // Open sockets would otherwise hold the graceful shutdown forever.
        shutdown_gateway.stop().await;
    });

    let server = server.into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!("server error: {e}");
            }
        }
        exit = gateway.listener_exit() => {
            if exit != ListenerExit::Shutdown {
                tracing::error!("fan-out listener exited ({exit:?}), shutting down");
                gateway.stop().await;
                std::process::exit(1);
            }
            if let Err(e) = server.await {
                tracing::error!("server error: {e}");
            }
        }
    }

    gateway.stop().await;
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let events = if config.events.trim().is_empty() {
        "any".to_string()
    } else {
        config.events.clone()
    };

    eprintln!();
    eprintln!("  \x1b[1;36mfanout\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!(
        "  \x1b[2mkeepalive\x1b[0m    {}s (timeout {}s)",
        config.gateway.keepalive_interval.as_secs(),
        config.gateway.keepalive_timeout.as_secs()
    );
    eprintln!(
        "  \x1b[2mlimit\x1b[0m        {} per session",
        config.gateway.connection_limit
    );
    eprintln!("  \x1b[2mevents\x1b[0m       {events}");
    eprintln!();
}
