use clap::{Parser, ValueEnum};
use client::session::{self, SessionEnd};
use log::info;
use tokio::net::{lookup_host, TcpStream};

/// How the keyboard and the connection are serviced.
#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    /// One loop multiplexes both channels.
    Multiplexed,
    /// Dedicated send and receive tasks.
    Split,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server host (dotted quad or resolvable name)
    host: String,
    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Session mode
    #[arg(short, long, value_enum, default_value_t = Mode::Multiplexed)]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let addr = lookup_host((args.host.as_str(), args.port))
        .await?
        .next()
        .ok_or_else(|| format!("unknown host: {}", args.host))?;

    info!("connecting to {addr}");
    let mut stream = TcpStream::connect(addr).await?;

    let name = session::login(&mut stream).await?;
    info!("logged in as {name:?}");
    println!("Press ^C to exit");

    let end = match args.mode {
        Mode::Multiplexed => session::run_multiplexed(stream).await?,
        Mode::Split => session::run_split(stream).await?,
    };

    if end == SessionEnd::ServerClosed {
        eprintln!("Server terminated");
        std::process::exit(1);
    }
    println!("Chat client terminated");
    Ok(())
}
