use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tilegraph_invalidation::ManagementClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct FakeOptions {
    pub banner: bool,
    pub reply_delay: Duration,
    /// Drop each connection after answering this many commands.
    pub close_after: Option<usize>,
    pub status: u16,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            banner: true,
            reply_delay: Duration::ZERO,
            close_after: None,
            status: 200,
        }
    }
}

/// Local stand-in for a management port. Records every command received.
pub struct FakeManagementPort {
    pub addr: SocketAddr,
    pub commands: Arc<Mutex<Vec<String>>>,
    pub accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeManagementPort {
    pub async fn start(options: FakeOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let options = options.clone();
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = socket.into_split();
                        let mut lines = BufReader::new(read_half).lines();
                        if options.banner {
                            write_half.write_all(b"200 5\nready\n").await.unwrap();
                        }
                        let mut answered = 0;
                        while let Ok(Some(line)) = lines.next_line().await {
                            commands.lock().push(line);
                            tokio::time::sleep(options.reply_delay).await;
                            let reply = format!("{} 2\nOK\n", options.status);
                            if write_half.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                            answered += 1;
                            if options.close_after == Some(answered) {
                                return;
                            }
                        }
                    });
                }
            })
        };

        Self {
            addr,
            commands,
            accepted,
            task,
        }
    }

    pub fn client(&self) -> ManagementClient {
        ManagementClient::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FakeManagementPort {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A client for a port nobody listens on.
pub async fn refused_client() -> ManagementClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ManagementClient::new("127.0.0.1", port)
}
