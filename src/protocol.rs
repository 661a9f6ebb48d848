//! Upstream API boundary: request builders and inbound frame parsing. The
//! transport underneath is an opaque request/response + subscription-push
//! channel; everything here is plain JSON keyed by `msg_type`.

use serde::Deserialize;
use serde_json::{json, Value};

pub fn authorize_request(token: &str, req_id: u64) -> Value {
    json!({
        "authorize": token,
        "req_id": req_id,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn buy_request(
    stake: f64,
    contract_type: &str,
    symbol: &str,
    duration: u32,
    duration_unit: &str,
    req_id: u64,
) -> Value {
    json!({
        "buy": 1,
        "price": stake,
        "parameters": {
            "amount": stake,
            "basis": "stake",
            "contract_type": contract_type,
            "currency": "USD",
            "duration": duration,
            "duration_unit": duration_unit,
            "symbol": symbol,
        },
        "req_id": req_id,
    })
}

pub fn subscribe_contract_request(contract_id: u64, req_id: u64) -> Value {
    json!({
        "proposal_open_contract": 1,
        "contract_id": contract_id,
        "subscribe": 1,
        "req_id": req_id,
    })
}

/// Inbound frames the engine reacts to. Anything else parses to `None` and
/// is dropped by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authorized,
    AuthorizeFailed,
    BuyAccepted { contract_id: u64, buy_price: f64 },
    BuyRejected,
    ContractUpdate(ContractUpdate),
    ApiError { message: String, code: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContractUpdate {
    pub contract_id: u64,
    pub status: String,
    #[serde(default)]
    pub profit: f64,
    #[serde(default)]
    pub buy_price: f64,
}

#[derive(Deserialize)]
struct Frame {
    msg_type: Option<String>,
    error: Option<ApiErrorBody>,
    authorize: Option<Value>,
    buy: Option<BuyBody>,
    proposal_open_contract: Option<ContractUpdate>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct BuyBody {
    contract_id: u64,
    #[serde(default)]
    buy_price: f64,
}

pub fn parse_frame(text: &str) -> Option<Inbound> {
    let frame: Frame = serde_json::from_str(text).ok()?;

    // An error object wins over whatever msg_type it arrived under.
    if let Some(err) = frame.error {
        return Some(Inbound::ApiError {
            message: err.message,
            code: err.code.unwrap_or_else(|| "unknown".to_string()),
        });
    }

    match frame.msg_type.as_deref() {
        Some("authorize") => {
            if frame.authorize.map(|v| !v.is_null()).unwrap_or(false) {
                Some(Inbound::Authorized)
            } else {
                Some(Inbound::AuthorizeFailed)
            }
        }
        Some("buy") => match frame.buy {
            Some(body) => Some(Inbound::BuyAccepted {
                contract_id: body.contract_id,
                buy_price: body.buy_price,
            }),
            None => Some(Inbound::BuyRejected),
        },
        Some("proposal_open_contract") => frame.proposal_open_contract.map(Inbound::ContractUpdate),
        _ => None,
    }
}
