use anyhow::{Context, Result};
use url::Url;

/// Default stake ladder: stake per consecutive-loss round (martingale
/// progression sized for ~95% recovery per round).
pub const DEFAULT_STAKES: [f64; 10] = [
    0.35, 0.60, 1.61, 4.34, 11.69, 31.49, 84.82, 228.47, 615.40, 1657.63,
];

/// Default candidate markets: synthetic indices, open around the clock.
pub const DEFAULT_MARKETS: [&str; 10] = [
    "R_10", "R_25", "R_50", "R_75", "R_100", "1HZ10V", "1HZ25V", "1HZ50V", "1HZ75V", "1HZ100V",
];

#[derive(Clone)]
pub struct Config {
    pub api_token: String,
    pub app_id: String,
    pub ws_base: String,
    pub markets: Vec<String>,
    pub stakes: Vec<f64>,
    pub sequence_len: usize,
    pub trade_duration: u32,
    pub trade_duration_unit: String,
    pub reconnect_backoff_secs: u64,
    pub observer_bind: String,
    pub event_channel_capacity: usize,
    pub max_observers: usize,
    pub starting_balance: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_token: std::env::var("API_TOKEN").unwrap_or_default(),
            app_id: std::env::var("APP_ID").unwrap_or_else(|_| "1089".to_string()),
            ws_base: std::env::var("WS_BASE")
                .unwrap_or_else(|_| "wss://ws.binaryws.com/websockets/v3".to_string()),
            markets: std::env::var("MARKETS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| DEFAULT_MARKETS.iter().map(|s| s.to_string()).collect()),
            stakes: std::env::var("STAKES")
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_else(|_| DEFAULT_STAKES.to_vec()),
            sequence_len: std::env::var("SEQUENCE_LEN").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
            trade_duration: std::env::var("TRADE_DURATION").ok().and_then(|v| v.parse().ok()).unwrap_or(1),
            trade_duration_unit: std::env::var("TRADE_DURATION_UNIT").unwrap_or_else(|_| "m".to_string()),
            reconnect_backoff_secs: std::env::var("RECONNECT_BACKOFF_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            observer_bind: std::env::var("OBSERVER_BIND").unwrap_or_else(|_| "127.0.0.1:8765".to_string()),
            event_channel_capacity: std::env::var("EVENT_CHANNEL_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(256),
            max_observers: std::env::var("MAX_OBSERVERS").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            starting_balance: std::env::var("STARTING_BALANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(100.0),
        }
    }

    /// Upstream endpoint with the app_id attached as a query parameter.
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&self.ws_base)
            .with_context(|| format!("invalid WS_BASE: {}", self.ws_base))?;
        url.query_pairs_mut().append_pair("app_id", &self.app_id);
        Ok(url)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        api_token: "test-token".to_string(),
        app_id: "1089".to_string(),
        ws_base: "wss://ws.example.com/v3".to_string(),
        markets: vec!["R_10".to_string(), "R_25".to_string()],
        stakes: vec![1.0, 2.0, 5.0],
        sequence_len: 10,
        trade_duration: 1,
        trade_duration_unit: "m".to_string(),
        reconnect_backoff_secs: 5,
        observer_bind: "127.0.0.1:0".to_string(),
        event_channel_capacity: 16,
        max_observers: 100,
        starting_balance: 100.0,
    }
}
