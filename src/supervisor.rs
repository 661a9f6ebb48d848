//! Connection supervisor: owns the upstream websocket, pumps frames through
//! the engine, and reconnects with a fixed backoff until the engine halts or
//! the process shuts down.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::config::Config;
use crate::engine::{Command, TradeEngine};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::protocol::parse_frame;

/// Why a session ended; decides whether the supervisor reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Engine issued Shutdown (halt or fatal error). No reconnect.
    Halted,
    /// Process-level shutdown was requested.
    Shutdown,
    /// Transport dropped or a connect attempt failed. Reconnect after backoff.
    Disconnected,
}

pub struct ConnectionSupervisor {
    cfg: Config,
    engine: TradeEngine,
    shutdown: broadcast::Receiver<()>,
}

impl ConnectionSupervisor {
    pub fn new(cfg: Config, engine: TradeEngine, shutdown: broadcast::Receiver<()>) -> Self {
        Self { cfg, engine, shutdown }
    }

    /// Connect-and-pump until the engine halts or shutdown is signalled.
    pub async fn run(mut self) -> Result<()> {
        let endpoint = self.cfg.endpoint()?;
        let backoff = Duration::from_secs(self.cfg.reconnect_backoff_secs);
        loop {
            match self.session(endpoint.as_str()).await {
                SessionEnd::Halted => {
                    log(Level::Info, Domain::Session, "supervisor_halted", obj(&[]));
                    return Ok(());
                }
                SessionEnd::Shutdown => {
                    log(Level::Info, Domain::Session, "supervisor_shutdown", obj(&[]));
                    return Ok(());
                }
                SessionEnd::Disconnected => {
                    self.engine.on_disconnected();
                    log(
                        Level::Warn,
                        Domain::Session,
                        "reconnect_scheduled",
                        obj(&[("backoff_secs", v_num(backoff.as_secs() as f64))]),
                    );
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = self.shutdown.recv() => return Ok(()),
                    }
                }
            }
        }
    }

    async fn session(&mut self, endpoint: &str) -> SessionEnd {
        let ws = match tokio_tungstenite::connect_async(endpoint).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                log(
                    Level::Error,
                    Domain::Session,
                    "connect_failed",
                    obj(&[("error", v_str(&e.to_string()))]),
                );
                return SessionEnd::Disconnected;
            }
        };
        let (mut write, mut read) = ws.split();

        let cmds = self.engine.on_connected();
        match self.execute(&mut write, cmds).await {
            Ok(true) => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Halted;
            }
            Ok(false) => {}
            Err(()) => return SessionEnd::Disconnected,
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            log(
                                Level::Warn,
                                Domain::Session,
                                "ws_read_error",
                                obj(&[("error", v_str(&e.to_string()))]),
                            );
                            return SessionEnd::Disconnected;
                        }
                        None => return SessionEnd::Disconnected,
                    };
                    let cmds = match msg {
                        Message::Text(text) => match parse_frame(&text) {
                            Some(inbound) => self.engine.handle(inbound),
                            None => continue,
                        },
                        Message::Ping(payload) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                return SessionEnd::Disconnected;
                            }
                            continue;
                        }
                        Message::Close(_) => return SessionEnd::Disconnected,
                        _ => continue,
                    };
                    match self.execute(&mut write, cmds).await {
                        Ok(true) => {
                            let _ = write.send(Message::Close(None)).await;
                            return SessionEnd::Halted;
                        }
                        Ok(false) => {}
                        Err(()) => return SessionEnd::Disconnected,
                    }
                }
                _ = self.shutdown.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Send each command; a failed send gets one retry through the engine
    /// before the connection is declared dead. Returns Ok(true) when the
    /// engine asked to shut down.
    async fn execute<S>(&mut self, write: &mut S, cmds: Vec<Command>) -> Result<bool, ()>
    where
        S: SinkExt<Message> + Unpin,
    {
        let mut queue = std::collections::VecDeque::from(cmds);
        let mut retried = false;
        while let Some(cmd) = queue.pop_front() {
            match cmd {
                Command::Shutdown => return Ok(true),
                Command::Send(payload) => {
                    if write.send(Message::Text(payload.to_string())).await.is_err() {
                        if retried {
                            return Err(());
                        }
                        retried = true;
                        queue.clear();
                        queue.extend(self.engine.on_send_failed());
                    }
                }
            }
        }
        Ok(false)
    }
}
