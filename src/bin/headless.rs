//! Headless runner: the same trading worker without the observer listener.
//! Domain events are drained into the process log instead of a broadcast hub.

use anyhow::Result;
use tokio::sync::broadcast;

use ladderfx::config::Config;
use ladderfx::engine::TradeEngine;
use ladderfx::events::DomainEvent;
use ladderfx::hub::event_channel;
use ladderfx::logging::{log, obj, v_num, v_str, Domain, Level};
use ladderfx::supervisor::ConnectionSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    log(Level::Info, Domain::System, "startup_headless", obj(&[]));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (bus, mut events) = event_channel(cfg.event_channel_capacity);

    // Without a hub someone still has to consume the event channel, or the
    // worker's publishes all land on the floor as drops.
    let drain = tokio::spawn(async move {
        while let Some(evt) = events.recv().await {
            match evt {
                DomainEvent::TradeSettled(t) => log(
                    Level::Info,
                    Domain::Trade,
                    "trade_settled",
                    obj(&[
                        ("market", v_str(&t.market)),
                        ("contract_type", v_str(&t.contract_type)),
                        ("stake", v_num(t.stake)),
                        ("outcome", v_str(&t.outcome)),
                        ("profit", v_num(t.profit)),
                    ]),
                ),
                DomainEvent::StatusChanged(s) => log(
                    Level::Debug,
                    Domain::Trade,
                    "status",
                    obj(&[
                        ("market", v_str(s.market.as_deref().unwrap_or("-"))),
                        ("consecutive_losses", v_num(s.consecutive_losses as f64)),
                        ("current_stake", v_num(s.current_stake)),
                    ]),
                ),
                DomainEvent::SequenceChanged(s) => log(
                    Level::Debug,
                    Domain::Trade,
                    "sequence",
                    obj(&[("sequence", v_str(&s.sequence.join("")))]),
                ),
                DomainEvent::Log { .. } => {} // already mirrored to the process log
            }
        }
    });

    let engine = TradeEngine::new(cfg.clone(), bus);
    let supervisor = ConnectionSupervisor::new(cfg, engine, shutdown_tx.subscribe());
    let supervisor_task = tokio::spawn(supervisor.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log(Level::Info, Domain::System, "signal_received", obj(&[]));
            let _ = shutdown_tx.send(());
        }
        res = supervisor_task => {
            if let Ok(Err(e)) = res {
                log(
                    Level::Error,
                    Domain::System,
                    "trading_failed",
                    obj(&[("error", v_str(&e.to_string()))]),
                );
            }
        }
    }

    drop(shutdown_tx);
    let _ = drain.await;
    log(Level::Info, Domain::System, "shutdown_complete", obj(&[]));
    Ok(())
}
