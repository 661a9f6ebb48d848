//! Trading state machine. The engine is synchronous and pure at its seam:
//! the connection supervisor feeds it connection events and parsed inbound
//! frames, and it returns the outbound commands those imply. Every observable
//! mutation publishes a DomainEvent before the handler returns, so observers
//! never see a later state with an earlier notification.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::config::Config;
use crate::events::{DomainEvent, LogLevel, SequenceSnapshot, StatusSnapshot, TradeSnapshot};
use crate::hub::EventBus;
use crate::ladder::Ladder;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::protocol::{self, ContractUpdate, Inbound};
use crate::sequence::{Direction, SequencePlanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Authorizing,
    Idle,
    AwaitingSettlement,
    Halted,
}

/// Outbound effects of one engine step, executed by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(Value),
    /// Terminal: close the transport and stop trading permanently.
    Shutdown,
}

/// The one contract we are waiting on. At most one exists at a time;
/// settlement pushes for any other id are stale and ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveContract {
    pub id: u64,
    pub direction: Direction,
    pub stake: f64,
    pub cursor_at_placement: usize,
}

/// Trade sent upstream but not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
struct PendingTrade {
    direction: Direction,
    stake: f64,
    cursor_at_placement: usize,
}

pub struct TradeEngine {
    cfg: Config,
    state: EngineState,
    ladder: Ladder,
    planner: SequencePlanner,
    rng: StdRng,
    market: Option<String>,
    consecutive_losses: usize,
    pending: Option<PendingTrade>,
    active: Option<ActiveContract>,
    authorized: bool,
    is_trading: bool,
    req_id: u64,
    bus: EventBus,
}

impl TradeEngine {
    pub fn new(cfg: Config, bus: EventBus) -> Self {
        let seed = rand::thread_rng().gen();
        Self::with_seed(cfg, bus, seed)
    }

    /// Deterministic construction: `seed` drives both market selection and
    /// sequence generation.
    pub fn with_seed(cfg: Config, bus: EventBus, seed: u64) -> Self {
        assert!(!cfg.markets.is_empty(), "candidate market list is empty");
        let ladder = Ladder::new(cfg.stakes.clone());
        let planner = SequencePlanner::with_seed(cfg.sequence_len, seed);
        Self {
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            state: EngineState::Disconnected,
            ladder,
            planner,
            market: None,
            consecutive_losses: 0,
            pending: None,
            active: None,
            authorized: false,
            is_trading: false,
            req_id: 0,
            cfg,
            bus,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state == EngineState::Halted
    }

    pub fn consecutive_losses(&self) -> usize {
        self.consecutive_losses
    }

    pub fn market(&self) -> Option<&str> {
        self.market.as_deref()
    }

    pub fn active_contract(&self) -> Option<&ActiveContract> {
        self.active.as_ref()
    }

    pub fn sequence_generation(&self) -> u64 {
        self.planner.generation()
    }

    pub fn sequence_cursor(&self) -> usize {
        self.planner.cursor()
    }

    // ------------------------------------------------------------------
    // Connection lifecycle (driven by the supervisor)
    // ------------------------------------------------------------------

    /// Transport is up: authorize. Credentials rejection is fatal and comes
    /// back as an inbound frame, never retried here.
    pub fn on_connected(&mut self) -> Vec<Command> {
        if self.is_halted() {
            return Vec::new();
        }
        self.state = EngineState::Authorizing;
        self.emit_log("Connection opened, authorizing", LogLevel::Info);
        let req_id = self.next_req_id();
        vec![Command::Send(protocol::authorize_request(
            &self.cfg.api_token,
            req_id,
        ))]
    }

    /// Transport dropped. The supervisor reconnects after its backoff; any
    /// in-flight contract is abandoned and the session restarts on re-auth.
    pub fn on_disconnected(&mut self) {
        if self.is_halted() || self.state == EngineState::Disconnected {
            return;
        }
        self.state = EngineState::Disconnected;
        self.authorized = false;
        self.is_trading = false;
        self.pending = None;
        self.active = None;
        self.emit_log("Connection lost, will reconnect", LogLevel::Warning);
        self.emit_status();
    }

    /// A request could not be transmitted. Recoverable: try the next market.
    pub fn on_send_failed(&mut self) -> Vec<Command> {
        if self.is_halted() || !self.authorized {
            return Vec::new();
        }
        self.emit_log("Could not place trade, trying another market", LogLevel::Warning);
        let mut cmds = Vec::new();
        self.select_market();
        self.place_trade(&mut cmds);
        cmds
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    pub fn handle(&mut self, inbound: Inbound) -> Vec<Command> {
        if self.is_halted() {
            return Vec::new();
        }
        match inbound {
            Inbound::Authorized => self.on_authorized(),
            Inbound::AuthorizeFailed => {
                self.halt("Authorization rejected: invalid credentials")
            }
            Inbound::BuyAccepted { contract_id, buy_price } => {
                self.on_buy_accepted(contract_id, buy_price)
            }
            Inbound::BuyRejected => self.on_buy_rejected(),
            Inbound::ContractUpdate(update) => self.on_contract_update(update),
            Inbound::ApiError { message, code } => self.on_api_error(&message, &code),
        }
    }

    fn on_authorized(&mut self) -> Vec<Command> {
        self.authorized = true;
        self.state = EngineState::Idle;
        self.emit_log("Successfully authorized with upstream API", LogLevel::Success);
        self.start_session()
    }

    /// Full session start: loss counter to zero, fresh market, fresh
    /// sequence, first trade placed. Used on authorization and after a
    /// rejected buy.
    fn start_session(&mut self) -> Vec<Command> {
        self.consecutive_losses = 0;
        self.is_trading = true;
        self.select_market();
        self.regenerate_sequence();
        let mut cmds = Vec::new();
        self.place_trade(&mut cmds);
        cmds
    }

    fn on_buy_accepted(&mut self, contract_id: u64, buy_price: f64) -> Vec<Command> {
        let Some(pending) = self.pending.take() else {
            // Ack for something we are not waiting on; stale.
            return Vec::new();
        };
        self.active = Some(ActiveContract {
            id: contract_id,
            direction: pending.direction,
            stake: pending.stake,
            cursor_at_placement: pending.cursor_at_placement,
        });
        log(
            Level::Info,
            Domain::Trade,
            "buy_accepted",
            obj(&[
                ("contract_id", v_num(contract_id as f64)),
                ("buy_price", v_num(buy_price)),
            ]),
        );
        self.emit_log(
            &format!("Contract placed successfully. ID: {}", contract_id),
            LogLevel::Success,
        );
        vec![Command::Send(protocol::subscribe_contract_request(
            contract_id,
            self.next_req_id(),
        ))]
    }

    /// Rejection is "never happened": full reset without a loss increment.
    fn on_buy_rejected(&mut self) -> Vec<Command> {
        self.pending = None;
        self.emit_log("Failed to place contract", LogLevel::Error);
        self.start_session()
    }

    fn on_contract_update(&mut self, update: ContractUpdate) -> Vec<Command> {
        let Some(contract) = self.active.clone() else {
            // Stale or duplicate push: protocol-level no-op.
            return Vec::new();
        };
        if contract.id != update.contract_id {
            return Vec::new();
        }
        if update.status == "open" {
            return Vec::new();
        }
        if update.status != "won" && update.status != "lost" {
            log(
                Level::Debug,
                Domain::Trade,
                "settlement_ignored",
                obj(&[("status", v_str(&update.status))]),
            );
            return Vec::new();
        }
        self.active = None;

        self.emit_trade(&contract, &update);

        if update.status == "won" {
            self.emit_log(
                &format!("Contract won! Profit: {:.2}", update.profit),
                LogLevel::Success,
            );
            self.consecutive_losses = 0;
            self.emit_status();
            self.select_market();
            self.regenerate_sequence();
            let mut cmds = Vec::new();
            self.place_trade(&mut cmds);
            return cmds;
        }

        // Lost.
        self.emit_log(
            &format!("Contract lost. Loss: {:.2}", update.profit),
            LogLevel::Error,
        );
        self.consecutive_losses += 1;
        self.emit_status();
        // Whether the ladder still has a rung for this loss count is
        // decided by the stake lookup inside place_trade, nowhere else.
        let mut cmds = Vec::new();
        self.place_trade(&mut cmds);
        cmds
    }

    fn on_api_error(&mut self, message: &str, code: &str) -> Vec<Command> {
        self.emit_log(
            &format!("API Error: {} (Code: {})", message, code),
            LogLevel::Error,
        );

        if is_insufficient_balance(message, code) {
            return self.halt("Insufficient balance, cannot continue");
        }
        if self.state == EngineState::Authorizing {
            return self.halt("Authorization failed: invalid credentials");
        }
        // Explicit code check only; matching on message substrings would
        // misfire on any error that merely mentions a market.
        if code == "MarketIsClosed" {
            let closed = self.market.clone().unwrap_or_default();
            self.pending = None;
            self.emit_log(
                &format!("Market {} is closed. Trying next market.", closed),
                LogLevel::Warning,
            );
            let mut cmds = Vec::new();
            self.select_market();
            self.place_trade(&mut cmds);
            return cmds;
        }
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Build and send the next buy. Consumes one sequence draw; a ladder
    /// exhaustion here ends the session for good.
    fn place_trade(&mut self, cmds: &mut Vec<Command>) {
        if !self.authorized || self.market.is_none() {
            self.emit_log("Cannot place trade: not authorized or no market", LogLevel::Error);
            return;
        }
        let stake = match self.ladder.stake_for(self.consecutive_losses) {
            Ok(stake) => stake,
            Err(err) => {
                cmds.extend(self.halt(&err.to_string()));
                return;
            }
        };
        if self.consecutive_losses > 0 {
            self.emit_log(
                &format!(
                    "Moving to round {} with stake {:.2}",
                    self.consecutive_losses + 1,
                    stake
                ),
                LogLevel::Info,
            );
        }

        let gen_before = self.planner.generation();
        let direction = self.planner.next();
        if self.planner.generation() != gen_before {
            self.emit_log("Reached end of sequence. Generating new sequence.", LogLevel::Warning);
            self.emit_sequence();
        }
        let cursor_at_placement = self.planner.cursor() - 1;
        let market = self.market.clone().unwrap_or_default();

        self.state = EngineState::AwaitingSettlement;
        self.pending = Some(PendingTrade {
            direction,
            stake,
            cursor_at_placement,
        });
        self.emit_log(
            &format!(
                "Placing {} trade on {} with stake ${:.2}",
                direction.contract_type(),
                market,
                stake
            ),
            LogLevel::Info,
        );
        log(
            Level::Info,
            Domain::Trade,
            "buy_submitted",
            obj(&[
                ("market", v_str(&market)),
                ("contract_type", v_str(direction.contract_type())),
                ("stake", v_num(stake)),
                ("round", v_num(self.consecutive_losses as f64 + 1.0)),
            ]),
        );
        let req_id = self.next_req_id();
        cmds.push(Command::Send(protocol::buy_request(
            stake,
            direction.contract_type(),
            &market,
            self.cfg.trade_duration,
            &self.cfg.trade_duration_unit,
            req_id,
        )));
    }

    fn select_market(&mut self) {
        let idx = self.rng.gen_range(0..self.cfg.markets.len());
        let market = self.cfg.markets[idx].clone();
        self.emit_log(&format!("Selected market: {}", market), LogLevel::Info);
        self.market = Some(market);
        self.emit_status();
    }

    fn regenerate_sequence(&mut self) {
        self.planner.regenerate();
        self.emit_log(
            &format!("Generated sequence: {}", self.planner.symbols().join("")),
            LogLevel::Info,
        );
        self.emit_sequence();
    }

    /// Terminal stop: no further trades, transport to be closed.
    fn halt(&mut self, reason: &str) -> Vec<Command> {
        self.state = EngineState::Halted;
        self.is_trading = false;
        self.pending = None;
        self.active = None;
        log(
            Level::Fatal,
            Domain::Trade,
            "halted",
            obj(&[("reason", v_str(reason))]),
        );
        self.emit_log(&format!("{}. Halting.", reason), LogLevel::Error);
        self.emit_status();
        vec![Command::Shutdown]
    }

    fn next_req_id(&mut self) -> u64 {
        self.req_id += 1;
        self.req_id
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    fn emit_status(&self) {
        self.bus.publish(DomainEvent::StatusChanged(StatusSnapshot {
            market: self.market.clone(),
            authorized: self.authorized,
            is_trading: self.is_trading,
            consecutive_losses: self.consecutive_losses,
            current_stake: self.ladder.display_stake(self.consecutive_losses),
            stakes: self.ladder.stakes().to_vec(),
        }));
    }

    fn emit_sequence(&self) {
        self.bus.publish(DomainEvent::SequenceChanged(SequenceSnapshot {
            sequence: self.planner.symbols(),
            current_trade_index: self.planner.cursor(),
        }));
    }

    fn emit_trade(&self, contract: &ActiveContract, update: &ContractUpdate) {
        self.bus.publish(DomainEvent::TradeSettled(TradeSnapshot {
            market: self.market.clone().unwrap_or_default(),
            contract_type: contract.direction.contract_type().to_string(),
            stake: contract.stake,
            outcome: update.status.clone(),
            profit: update.profit,
        }));
    }

    fn emit_log(&self, message: &str, level: LogLevel) {
        let process_level = match level {
            LogLevel::Info | LogLevel::Success => Level::Info,
            LogLevel::Warning => Level::Warn,
            LogLevel::Error => Level::Error,
        };
        log(
            process_level,
            Domain::Session,
            "engine",
            obj(&[("msg", v_str(message))]),
        );
        self.bus.publish(DomainEvent::Log {
            message: message.to_string(),
            level,
        });
    }
}

fn is_insufficient_balance(message: &str, code: &str) -> bool {
    if code == "InsufficientBalance" {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("balance") && lower.contains("insufficient")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::hub::event_channel;
    use tokio::sync::mpsc::Receiver;

    fn make_engine(stakes: Vec<f64>) -> (TradeEngine, Receiver<DomainEvent>) {
        let mut cfg = test_config();
        cfg.stakes = stakes;
        let (bus, rx) = event_channel(256);
        (TradeEngine::with_seed(cfg, bus, 42), rx)
    }

    fn authorize(engine: &mut TradeEngine) -> Vec<Command> {
        engine.on_connected();
        engine.handle(Inbound::Authorized)
    }

    fn buy_stake(cmds: &[Command]) -> f64 {
        for cmd in cmds {
            if let Command::Send(v) = cmd {
                if v["buy"] == 1 {
                    return v["price"].as_f64().unwrap();
                }
            }
        }
        panic!("no buy command in {:?}", cmds);
    }

    fn settle(engine: &mut TradeEngine, status: &str, profit: f64) -> Vec<Command> {
        let id = engine.active_contract().expect("active contract").id;
        engine.handle(Inbound::ContractUpdate(ContractUpdate {
            contract_id: id,
            status: status.to_string(),
            profit,
            buy_price: 0.0,
        }))
    }

    fn accept_buy(engine: &mut TradeEngine, contract_id: u64) -> Vec<Command> {
        engine.handle(Inbound::BuyAccepted { contract_id, buy_price: 0.0 })
    }

    #[test]
    fn test_connect_then_authorize_places_first_trade() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        let cmds = engine.on_connected();
        assert_eq!(engine.state(), EngineState::Authorizing);
        assert!(matches!(&cmds[0], Command::Send(v) if v.get("authorize").is_some()));

        let cmds = engine.handle(Inbound::Authorized);
        assert_eq!(engine.state(), EngineState::AwaitingSettlement);
        assert!(engine.market().is_some());
        assert_eq!(engine.consecutive_losses(), 0);
        assert_eq!(buy_stake(&cmds), 1.0);
    }

    #[test]
    fn test_buy_accepted_records_contract_and_subscribes() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        let cmds = accept_buy(&mut engine, 777);

        let contract = engine.active_contract().unwrap();
        assert_eq!(contract.id, 777);
        assert_eq!(contract.stake, 1.0);
        assert_eq!(contract.cursor_at_placement, 0);
        assert!(matches!(&cmds[0], Command::Send(v) if v["proposal_open_contract"] == 1 && v["contract_id"] == 777));
    }

    #[test]
    fn test_won_resets_losses_and_replaces_market_and_sequence() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        settle(&mut engine, "lost", -1.0);
        accept_buy(&mut engine, 2);
        assert_eq!(engine.consecutive_losses(), 1);

        let gen_before = engine.sequence_generation();
        let cmds = settle(&mut engine, "won", 1.9);
        assert_eq!(engine.consecutive_losses(), 0);
        assert!(engine.sequence_generation() > gen_before);
        assert_eq!(buy_stake(&cmds), 1.0); // back to rung 0
        assert_eq!(engine.state(), EngineState::AwaitingSettlement);
    }

    #[test]
    fn test_lost_increments_losses_and_escalates_stake() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);

        let cursor_before = engine.sequence_cursor();
        let cmds = settle(&mut engine, "lost", -1.0);
        assert_eq!(engine.consecutive_losses(), 1);
        assert_eq!(buy_stake(&cmds), 2.0);
        assert!(engine.sequence_cursor() > cursor_before);
    }

    #[test]
    fn test_three_losses_then_halt_with_stakes_in_order() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        let cmds = authorize(&mut engine);
        assert_eq!(buy_stake(&cmds), 1.0);

        accept_buy(&mut engine, 1);
        let cmds = settle(&mut engine, "lost", -1.0);
        assert_eq!(buy_stake(&cmds), 2.0);

        accept_buy(&mut engine, 2);
        let cmds = settle(&mut engine, "lost", -2.0);
        assert_eq!(buy_stake(&cmds), 5.0);

        accept_buy(&mut engine, 3);
        let cmds = settle(&mut engine, "lost", -5.0);
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(cmds.contains(&Command::Shutdown));
        assert!(!cmds.iter().any(|c| matches!(c, Command::Send(v) if v["buy"] == 1)));

        // Halted engine ignores everything that follows.
        assert!(engine.handle(Inbound::Authorized).is_empty());
    }

    #[test]
    fn test_buy_rejected_resets_without_loss_increment() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        settle(&mut engine, "lost", -1.0);
        assert_eq!(engine.consecutive_losses(), 1);

        let market_gen = engine.sequence_generation();
        let cmds = engine.handle(Inbound::BuyRejected);
        assert_eq!(engine.consecutive_losses(), 0);
        assert!(engine.sequence_generation() > market_gen);
        assert_eq!(buy_stake(&cmds), 1.0);
        assert_eq!(engine.state(), EngineState::AwaitingSettlement);
    }

    #[test]
    fn test_stale_settlement_is_ignored() {
        let (mut engine, mut rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        while rx.try_recv().is_ok() {} // drain events so far

        let cmds = engine.handle(Inbound::ContractUpdate(ContractUpdate {
            contract_id: 999,
            status: "won".to_string(),
            profit: 10.0,
            buy_price: 0.0,
        }));
        assert!(cmds.is_empty());
        assert!(engine.active_contract().is_some());
        assert_eq!(engine.consecutive_losses(), 0);
        assert!(rx.try_recv().is_err(), "stale push must emit no event");
    }

    #[test]
    fn test_open_update_is_ignored() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);

        let cmds = settle(&mut engine, "open", 0.0);
        assert!(cmds.is_empty());
        assert!(engine.active_contract().is_some());
    }

    #[test]
    fn test_market_closed_reselects_without_touching_losses() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        settle(&mut engine, "lost", -1.0);
        assert_eq!(engine.consecutive_losses(), 1);

        let cmds = engine.handle(Inbound::ApiError {
            message: "This market is presently closed.".to_string(),
            code: "MarketIsClosed".to_string(),
        });
        assert_eq!(engine.consecutive_losses(), 1);
        assert_eq!(buy_stake(&cmds), 2.0); // still on rung 1
        assert_eq!(engine.state(), EngineState::AwaitingSettlement);
    }

    #[test]
    fn test_market_mention_in_unrelated_error_does_not_reselect() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        let market = engine.market().unwrap().to_string();

        let cmds = engine.handle(Inbound::ApiError {
            message: "Rate limit for market data exceeded".to_string(),
            code: "RateLimit".to_string(),
        });
        assert!(cmds.is_empty());
        assert_eq!(engine.market().unwrap(), market);
    }

    #[test]
    fn test_insufficient_balance_is_terminal() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);

        let cmds = engine.handle(Inbound::ApiError {
            message: "Your balance is insufficient for this trade".to_string(),
            code: "InsufficientBalance".to_string(),
        });
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(cmds.contains(&Command::Shutdown));
    }

    #[test]
    fn test_auth_error_is_terminal() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        engine.on_connected();

        let cmds = engine.handle(Inbound::ApiError {
            message: "Token is invalid".to_string(),
            code: "InvalidToken".to_string(),
        });
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(cmds.contains(&Command::Shutdown));
    }

    #[test]
    fn test_authorize_failed_frame_is_terminal() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        engine.on_connected();
        let cmds = engine.handle(Inbound::AuthorizeFailed);
        assert_eq!(engine.state(), EngineState::Halted);
        assert!(cmds.contains(&Command::Shutdown));
    }

    #[test]
    fn test_disconnect_clears_session_state() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);

        engine.on_disconnected();
        assert_eq!(engine.state(), EngineState::Disconnected);
        assert!(engine.active_contract().is_none());

        // Reconnect starts over cleanly.
        let cmds = engine.on_connected();
        assert!(matches!(&cmds[0], Command::Send(v) if v.get("authorize").is_some()));
        let cmds = engine.handle(Inbound::Authorized);
        assert_eq!(buy_stake(&cmds), 1.0);
    }

    #[test]
    fn test_send_failure_retries_on_new_market() {
        let (mut engine, _rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        settle(&mut engine, "lost", -1.0);

        let cmds = engine.on_send_failed();
        assert_eq!(engine.consecutive_losses(), 1);
        assert_eq!(buy_stake(&cmds), 2.0);
    }

    #[test]
    fn test_event_ordering_cause_before_next_frame() {
        let (mut engine, mut rx) = make_engine(vec![1.0, 2.0, 5.0]);
        authorize(&mut engine);
        accept_buy(&mut engine, 1);
        while rx.try_recv().is_ok() {}

        settle(&mut engine, "lost", -1.0);
        // The settlement notification must precede any event caused by the
        // follow-up placement.
        let mut saw_trade = false;
        let mut saw_status_after_trade = false;
        while let Ok(evt) = rx.try_recv() {
            match evt {
                DomainEvent::TradeSettled(t) => {
                    assert!(!saw_status_after_trade);
                    assert_eq!(t.outcome, "lost");
                    saw_trade = true;
                }
                DomainEvent::StatusChanged(s) if saw_trade => {
                    assert_eq!(s.consecutive_losses, 1);
                    saw_status_after_trade = true;
                }
                _ => {}
            }
        }
        assert!(saw_trade && saw_status_after_trade);
    }

    #[test]
    fn test_sequence_exhaustion_regenerates_during_placement() {
        let (mut engine, _rx) = make_engine(vec![1.0; 64]);
        authorize(&mut engine);
        let gen_at_start = engine.sequence_generation();
        // Burn through the whole 10-draw sequence via losses.
        for i in 0..10 {
            accept_buy(&mut engine, i + 1);
            settle(&mut engine, "lost", -1.0);
        }
        // 11 placements happened against a 10-long sequence: exactly one
        // implicit regeneration, cursor left just past the new first draw.
        assert_eq!(engine.sequence_generation(), gen_at_start + 1);
        assert_eq!(engine.sequence_cursor(), 1);
    }
}
