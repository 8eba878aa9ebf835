use clap::{Parser, ValueEnum};
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// How client connections are serviced.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum Strategy {
    /// One worker task per client, registry behind a mutex.
    Workers,
    /// One control loop owns the registry, no lock.
    Reactor,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Maximum number of simultaneous clients
    #[arg(short = 'c', long, default_value_t = shared::MAX_CLIENTS)]
    max_clients: usize,
    /// Servicing strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Workers)]
    strategy: Strategy,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;

    // SIGINT drives the shutdown coordinator: cancel the token and let
    // every loop wind down cooperatively.
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    match args.strategy {
        Strategy::Workers => server::worker::serve(listener, args.max_clients, token).await?,
        Strategy::Reactor => server::reactor::serve(listener, args.max_clients, token).await?,
    }

    println!("Chat server terminated");
    Ok(())
}
