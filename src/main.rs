use anyhow::Result;
use tokio::sync::broadcast;

use ladderfx::config::Config;
use ladderfx::engine::TradeEngine;
use ladderfx::events::StatusSnapshot;
use ladderfx::hub::{control_channel, event_channel, BroadcastHub};
use ladderfx::logging::{log, obj, v_str, Domain, Level};
use ladderfx::observer;
use ladderfx::supervisor::ConnectionSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[("observer_bind", v_str(&cfg.observer_bind))]),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (bus, events) = event_channel(cfg.event_channel_capacity);
    let (hub_handle, control) = control_channel();

    let initial_status = StatusSnapshot {
        market: None,
        authorized: false,
        is_trading: false,
        consecutive_losses: 0,
        current_stake: cfg.stakes.first().copied().unwrap_or(0.0),
        stakes: cfg.stakes.clone(),
    };
    let hub = BroadcastHub::new(
        initial_status,
        cfg.starting_balance,
        events,
        control,
        shutdown_tx.subscribe(),
    );
    let hub_task = tokio::spawn(hub.run());

    let observer_task = tokio::spawn(observer::serve(
        cfg.observer_bind.clone(),
        cfg.max_observers,
        hub_handle,
        shutdown_tx.clone(),
    ));

    let engine = TradeEngine::new(cfg.clone(), bus);
    let supervisor = ConnectionSupervisor::new(cfg, engine, shutdown_tx.subscribe());
    let supervisor_task = tokio::spawn(supervisor.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log(Level::Info, Domain::System, "signal_received", obj(&[]));
        }
        res = supervisor_task => {
            match res {
                Ok(Ok(())) => log(Level::Info, Domain::System, "trading_finished", obj(&[])),
                Ok(Err(e)) => log(
                    Level::Error,
                    Domain::System,
                    "trading_failed",
                    obj(&[("error", v_str(&e.to_string()))]),
                ),
                Err(e) => log(
                    Level::Error,
                    Domain::System,
                    "trading_panicked",
                    obj(&[("error", v_str(&e.to_string()))]),
                ),
            }
        }
    }

    // Broadcast shutdown; hub and listener wind down their clients.
    let _ = shutdown_tx.send(());
    let _ = hub_task.await;
    let _ = observer_task.await;
    log(Level::Info, Domain::System, "shutdown_complete", obj(&[]));
    Ok(())
}
