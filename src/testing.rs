//! In-process fake Elko server for integration tests.
//!
//! ```ignore
//! let mut server = FakeElkoServer::start().await?;
//! let bot = HabiBot::new(server.host(), server.port());
//! bot.connect().await?;
//!
//! server.push(r#"{"op":"make","you":true,"obj":{"ref":"user-x-1","mods":[{"noid":1}]}}"#);
//! bot.send_with_delay(Message::command("WALK", "ME"), Duration::ZERO).await?;
//! let cmd = server.recv_command().await;
//! ```
//!
//! The fake accepts connections sequentially on an ephemeral port, decodes
//! client traffic with the real [`FrameDecoder`], and replays pushed
//! frames back down the wire. Dropping a connection on purpose lets tests
//! exercise the reconnect path.

use crate::frame::FrameDecoder;
use crate::message::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

enum ServerAction {
    Push(String),
    Drop,
}

/// A scripted Elko server on an ephemeral local port.
pub struct FakeElkoServer {
    addr: SocketAddr,
    commands: mpsc::UnboundedReceiver<Message>,
    actions: mpsc::UnboundedSender<ServerAction>,
    connections: Arc<AtomicUsize>,
}

impl FakeElkoServer {
    /// Bind an ephemeral port and start accepting connections.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (actions, actions_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        tokio::spawn(serve(
            listener,
            commands_tx,
            actions_rx,
            Arc::clone(&connections),
        ));
        Ok(Self {
            addr,
            commands,
            actions,
            connections,
        })
    }

    /// Server host, for handing to a client.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Server port, for handing to a client.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// How many connections have been accepted so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Queue a frame to send to the connected client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.actions.send(ServerAction::Push(frame.into()));
    }

    /// Close the current connection from the server side.
    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }

    /// Next command frame received from the client, decoded and parsed.
    ///
    /// `None` once the server task has stopped.
    pub async fn recv_command(&mut self) -> Option<Message> {
        self.commands.recv().await
    }
}

async fn serve(
    listener: TcpListener,
    commands: mpsc::UnboundedSender<Message>,
    mut actions: mpsc::UnboundedReceiver<ServerAction>,
    connections: Arc<AtomicUsize>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        connections.fetch_add(1, Ordering::SeqCst);
        if !handle_connection(stream, &commands, &mut actions).await {
            return;
        }
    }
}

/// Serve one connection. Returns false once the harness itself is gone.
async fn handle_connection(
    mut stream: TcpStream,
    commands: &mpsc::UnboundedSender<Message>,
    actions: &mut mpsc::UnboundedReceiver<ServerAction>,
) -> bool {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return true,
                    Ok(n) => {
                        for frame in decoder.push(&buf[..n]) {
                            if let Ok(msg) = Message::parse(&frame)
                                && commands.send(msg).is_err()
                            {
                                return false;
                            }
                        }
                    }
                }
            }
            action = actions.recv() => {
                match action {
                    Some(ServerAction::Push(frame)) => {
                        let wire = format!("{frame}\n\n");
                        if stream.write_all(wire.as_bytes()).await.is_err() {
                            return true;
                        }
                    }
                    Some(ServerAction::Drop) => return true,
                    None => return false,
                }
            }
        }
    }
}
