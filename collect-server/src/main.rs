use envconfig::Envconfig;
use tokio::net::TcpListener;
use tokio::signal;

use collect::config::Config;
use collect::server::serve;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration:");

    if let Err(err) = config.validate() {
        for violation in &err.violations {
            tracing::error!(path = %violation.path.join("."), "{}", violation.message);
        }
        std::process::exit(1);
    }

    let listener = TcpListener::bind(config.address)
        .await
        .expect("failed to bind address");

    tracing::info!("listening on {}", config.address);

    serve(config, listener, shutdown()).await
}
