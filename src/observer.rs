//! Observer-facing websocket listener. Each accepted client is registered
//! with the broadcast hub under a fresh id and serviced by its own task; the
//! hub pushes wire messages through a per-client unbounded channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::hub::HubHandle;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub async fn serve(
    bind: String,
    max_observers: usize,
    hub: HubHandle,
    shutdown: broadcast::Sender<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding observer listener on {}", bind))?;
    log(
        Level::Info,
        Domain::Broadcast,
        "observer_listening",
        obj(&[("addr", v_str(&bind))]),
    );

    let next_id = Arc::new(AtomicU64::new(1));
    let live = Arc::new(AtomicU64::new(0));
    let mut stop = shutdown.subscribe();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        log(
                            Level::Warn,
                            Domain::Broadcast,
                            "accept_failed",
                            obj(&[("error", v_str(&e.to_string()))]),
                        );
                        continue;
                    }
                };
                if live.load(Ordering::Relaxed) >= max_observers as u64 {
                    log(
                        Level::Warn,
                        Domain::Broadcast,
                        "observer_rejected",
                        obj(&[("peer", v_str(&peer.to_string())), ("reason", v_str("at_capacity"))]),
                    );
                    drop(stream);
                    continue;
                }
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let hub = hub.clone();
                let live = live.clone();
                let stop = shutdown.subscribe();
                live.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    if let Err(e) = client_task(stream, id, hub.clone(), stop).await {
                        log(
                            Level::Debug,
                            Domain::Broadcast,
                            "observer_closed",
                            obj(&[("client_id", v_num(id as f64)), ("error", v_str(&e.to_string()))]),
                        );
                    }
                    hub.unregister(id);
                    live.fetch_sub(1, Ordering::Relaxed);
                });
            }
            _ = stop.recv() => {
                log(Level::Info, Domain::Broadcast, "observer_listener_stopped", obj(&[]));
                return Ok(());
            }
        }
    }
}

/// One connected observer: forward hub messages out, answer pings, stop on
/// close or shutdown. Inbound text from observers is ignored.
async fn client_task(
    stream: TcpStream,
    id: u64,
    hub: HubHandle,
    mut stop: broadcast::Receiver<()>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake")?;
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    hub.register(id, tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(Message::Close(frame)) => {
                        let _ = write.send(Message::Close(frame)).await;
                        return Ok(());
                    }
                    Some(msg) => write.send(msg).await.context("forwarding to observer")?,
                    // Hub dropped our sender: it is shutting down.
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Ping(payload))) => {
                        write.send(Message::Pong(payload)).await.context("pong")?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {} // observers are read-only
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = stop.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}
