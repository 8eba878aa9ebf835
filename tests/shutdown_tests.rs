//! Teardown tests: cancelling the server token with live clients must
//! finish in bounded time and leave every connection closed.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use shared::{read_trimmed_line, send_line, MAX_WIRE_LEN};

const TEARDOWN_BOUND: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum Strategy {
    Workers,
    Reactor,
}

async fn start(
    strategy: Strategy,
    capacity: usize,
) -> (
    SocketAddr,
    CancellationToken,
    JoinHandle<std::io::Result<()>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let handle = match strategy {
        Strategy::Workers => tokio::spawn(server::worker::serve(listener, capacity, token.clone())),
        Strategy::Reactor => tokio::spawn(server::reactor::serve(listener, capacity, token.clone())),
    };
    (addr, token, handle)
}

struct Participant {
    reader: BufReader<OwnedReadHalf>,
    // Held open so every close observed below is server-driven.
    _writer: OwnedWriteHalf,
}

async fn join(addr: SocketAddr, name: &str) -> Participant {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    send_line(&mut write_half, name).await.unwrap();
    Participant {
        reader: BufReader::new(read_half),
        _writer: write_half,
    }
}

async fn exercise_shutdown(strategy: Strategy) {
    let (addr, token, server_task) = start(strategy, 5).await;

    let mut clients = Vec::new();
    for name in ["alice", "bob", "carol"] {
        clients.push(join(addr, name).await);
    }
    // Let the join notices settle so every handshake has been processed.
    sleep(Duration::from_millis(200)).await;

    token.cancel();

    // The server must come down in bounded time, cleanly.
    let result = timeout(TEARDOWN_BOUND, server_task)
        .await
        .expect("server did not shut down in time")
        .expect("server task panicked");
    assert!(result.is_ok(), "serve returned {result:?}");

    // Every client must observe the close as EOF, not as a chat line.
    for client in &mut clients {
        loop {
            let line = timeout(TEARDOWN_BOUND, read_trimmed_line(&mut client.reader, MAX_WIRE_LEN))
                .await
                .expect("connection left open after shutdown")
                .unwrap();
            match line {
                // Drain any join notices still in flight.
                Some(text) => assert!(text.starts_with("* "), "unexpected line {text:?}"),
                None => break,
            }
        }
    }

    // And no new connection is accepted afterwards.
    match TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(stream) => {
            let (read_half, _w) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let line = timeout(TEARDOWN_BOUND, read_trimmed_line(&mut reader, MAX_WIRE_LEN))
                .await
                .expect("post-shutdown connection left open")
                .unwrap();
            assert_eq!(line, None);
        }
    }

    // Writers kept alive this whole time so slot closes were server-driven.
    drop(clients);
}

#[tokio::test]
async fn workers_shutdown_is_bounded_and_complete() {
    exercise_shutdown(Strategy::Workers).await;
}

#[tokio::test]
async fn reactor_shutdown_is_bounded_and_complete() {
    exercise_shutdown(Strategy::Reactor).await;
}
