//! Domain events: immutable snapshots of one observable state change, handed
//! from the trading worker to the broadcast hub. Observers only ever see
//! these, never live engine state.

use serde::Serialize;
use serde_json::{json, Value};

use crate::logging::ts_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub market: Option<String>,
    pub authorized: bool,
    pub is_trading: bool,
    pub consecutive_losses: usize,
    pub current_stake: f64,
    pub stakes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceSnapshot {
    pub sequence: Vec<String>,
    pub current_trade_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSnapshot {
    pub market: String,
    pub contract_type: String,
    pub stake: f64,
    pub outcome: String,
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    StatusChanged(StatusSnapshot),
    SequenceChanged(SequenceSnapshot),
    TradeSettled(TradeSnapshot),
    Log { message: String, level: LogLevel },
}

impl DomainEvent {
    /// Observer wire encoding: a JSON record tagged by `type`, timestamped.
    pub fn to_wire(&self) -> Value {
        match self {
            DomainEvent::StatusChanged(s) => {
                let mut v = json!(s);
                tag(&mut v, "status_update");
                v
            }
            DomainEvent::SequenceChanged(s) => {
                let mut v = json!(s);
                tag(&mut v, "sequence_update");
                v
            }
            DomainEvent::TradeSettled(s) => {
                let mut v = json!(s);
                tag(&mut v, "trade_update");
                v
            }
            DomainEvent::Log { message, level } => json!({
                "type": "log",
                "message": message,
                "level": level.as_str(),
                "timestamp": ts_now(),
            }),
        }
    }
}

/// Balance record emitted by the hub after each settled trade.
pub fn balance_wire(balance: f64, change: f64) -> Value {
    json!({
        "type": "balance_update",
        "balance": balance,
        "change": change,
        "timestamp": ts_now(),
    })
}

fn tag(v: &mut Value, kind: &str) {
    if let Some(map) = v.as_object_mut() {
        map.insert("type".to_string(), json!(kind));
        map.insert("timestamp".to_string(), json!(ts_now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_shape() {
        let evt = DomainEvent::StatusChanged(StatusSnapshot {
            market: Some("R_50".to_string()),
            authorized: true,
            is_trading: true,
            consecutive_losses: 2,
            current_stake: 1.61,
            stakes: vec![0.35, 0.60, 1.61],
        });
        let wire = evt.to_wire();
        assert_eq!(wire["type"], "status_update");
        assert_eq!(wire["market"], "R_50");
        assert_eq!(wire["consecutive_losses"], 2);
        assert_eq!(wire["current_stake"], 1.61);
        assert_eq!(wire["stakes"].as_array().unwrap().len(), 3);
        assert!(wire["timestamp"].is_string());
    }

    #[test]
    fn test_sequence_wire_shape() {
        let evt = DomainEvent::SequenceChanged(SequenceSnapshot {
            sequence: vec!["R".to_string(), "G".to_string()],
            current_trade_index: 1,
        });
        let wire = evt.to_wire();
        assert_eq!(wire["type"], "sequence_update");
        assert_eq!(wire["sequence"][0], "R");
        assert_eq!(wire["current_trade_index"], 1);
    }

    #[test]
    fn test_trade_and_log_wire_shape() {
        let trade = DomainEvent::TradeSettled(TradeSnapshot {
            market: "R_10".to_string(),
            contract_type: "PUT".to_string(),
            stake: 0.35,
            outcome: "won".to_string(),
            profit: 0.33,
        });
        let wire = trade.to_wire();
        assert_eq!(wire["type"], "trade_update");
        assert_eq!(wire["outcome"], "won");

        let log = DomainEvent::Log {
            message: "hello".to_string(),
            level: LogLevel::Success,
        };
        let wire = log.to_wire();
        assert_eq!(wire["type"], "log");
        assert_eq!(wire["level"], "success");
    }

    #[test]
    fn test_balance_wire_shape() {
        let wire = balance_wire(100.33, 0.33);
        assert_eq!(wire["type"], "balance_update");
        assert_eq!(wire["balance"], 100.33);
        assert_eq!(wire["change"], 0.33);
    }
}
