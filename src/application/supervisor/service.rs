//! Streaming supervisor for client turns.
//!
//! One call to [`Supervisor::process`] handles one client message end to
//! end: session bootstrap, the approval fast-path, LLM routing, the routed
//! agent branch, and the final metadata chunk. Output is a channel of
//! tagged chunks consumed by the SSE layer; every sub-component failure is
//! converted into an `error` chunk with a user-safe message while the full
//! cause goes to the log.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::application::execution::{
    ApprovalOutcome, ExecutionService, PendingTradeOutcome, TradeRecommendation,
};
use crate::application::router::{AgentKind, AgentRouter};
use crate::application::session_log::SessionLog;
use crate::application::supervisor::prompts;
use crate::domain::chat::{AgentType, MessageType, SessionType};
use crate::domain::errors::{ExecutionError, LlmError};
use crate::domain::ports::{BrokerService, LlmService};
use crate::domain::repositories::PortfolioStore;
use crate::domain::trading::portfolio::{Portfolio, Position, User};
use crate::domain::trading::types::{OrderType, TradeSide, TransactionStatus};

/// A single client turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub request: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Tagged stream chunk; the SSE layer maps each variant to an event name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Chunk {
    Content { content: String },
    Final { result: serde_json::Value },
    Error { error: String, message: String },
}

/// Fraction of portfolio value above which the pre-guard refuses a trade
/// without consulting the compliance reviewer.
const PRE_GUARD_BLOCK: Decimal = dec!(0.50);
const HISTORY_LIMIT: i64 = 10;
const MAX_PRICE_LOOKUPS: usize = 3;

pub struct Supervisor {
    llm: Arc<dyn LlmService>,
    router: Arc<AgentRouter>,
    execution: Arc<ExecutionService>,
    session_log: Arc<SessionLog>,
    store: Arc<dyn PortfolioStore>,
    broker: Arc<dyn BrokerService>,
    turn_timeout: Duration,
    token_timeout: Duration,
}

struct Emitter {
    tx: mpsc::Sender<Chunk>,
    assembled: String,
}

impl Emitter {
    /// True once the client has closed the stream; streaming branches use
    /// this to abort instead of generating into the void.
    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn content(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.assembled.push_str(text);
        let _ = self
            .tx
            .send(Chunk::Content {
                content: text.to_string(),
            })
            .await;
    }

    async fn final_result(&self, result: serde_json::Value) {
        let _ = self.tx.send(Chunk::Final { result }).await;
    }

    async fn error(&self, code: &str, message: &str) {
        let _ = self
            .tx
            .send(Chunk::Error {
                error: code.to_string(),
                message: message.to_string(),
            })
            .await;
    }
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn LlmService>,
        router: Arc<AgentRouter>,
        execution: Arc<ExecutionService>,
        session_log: Arc<SessionLog>,
        store: Arc<dyn PortfolioStore>,
        broker: Arc<dyn BrokerService>,
        turn_timeout: Duration,
        token_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            router,
            execution,
            session_log,
            store,
            broker,
            turn_timeout,
            token_timeout,
        }
    }

    /// Process one client turn; chunks arrive on the returned channel.
    /// Dropping the receiver cancels the turn at its next suspension point.
    pub fn process(self: &Arc<Self>, request: TurnRequest) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(64);
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let turn = supervisor.run_turn(request, tx.clone());
            if tokio::time::timeout(supervisor.turn_timeout, turn).await.is_err() {
                warn!("Client turn exceeded the {}s budget", supervisor.turn_timeout.as_secs());
                let _ = tx
                    .send(Chunk::Error {
                        error: "turn_timeout".to_string(),
                        message: "This request took too long to process. Please try again."
                            .to_string(),
                    })
                    .await;
            }
        });
        rx
    }

    async fn run_turn(&self, req: TurnRequest, tx: mpsc::Sender<Chunk>) {
        let mut emitter = Emitter {
            tx,
            assembled: String::new(),
        };

        let session_id = match self.ensure_session(&req).await {
            Ok(session_id) => session_id,
            Err(e) => {
                error!("Failed to open chat session: {e}");
                emitter
                    .error("session_error", "I couldn't start a session for this conversation.")
                    .await;
                return;
            }
        };

        if let Err(e) = self.run_routed_turn(&req, &session_id, &mut emitter).await {
            error!(session_id, "Turn failed: {e}");
            emitter
                .error("internal_error", "I encountered an error processing your request.")
                .await;
        }

        // The assembled response is logged once, after streaming ends;
        // partial output from an aborted stream still lands here.
        if !emitter.assembled.is_empty() {
            self.session_log
                .log_message(
                    &session_id,
                    AgentType::Advisor,
                    MessageType::Response,
                    &emitter.assembled,
                    None,
                    None,
                )
                .await;
        }
    }

    async fn ensure_session(&self, req: &TurnRequest) -> Result<String, anyhow::Error> {
        let session_id = match &req.session_id {
            Some(session_id) => session_id.clone(),
            None => {
                self.session_log
                    .start_session(
                        req.user_id.as_deref(),
                        SessionType::from_request(&req.request),
                        Some(json!({"initial_request": req.request})),
                    )
                    .await?
            }
        };
        // The user message is written before any streaming begins.
        self.session_log
            .log_message(
                &session_id,
                AgentType::User,
                MessageType::Query,
                &req.request,
                Some(json!({"request_type": "investment_inquiry"})),
                None,
            )
            .await;
        Ok(session_id)
    }

    async fn run_routed_turn(
        &self,
        req: &TurnRequest,
        session_id: &str,
        emitter: &mut Emitter,
    ) -> Result<(), anyhow::Error> {
        // Approval fast-path: "approve" with a pending trade executes it
        // directly, without re-invoking the router.
        if req.request.to_lowercase().contains("approve")
            && let Some(user_id) = &req.user_id
        {
            match self
                .execution
                .approve_workflow(user_id, Some(session_id), &req.request)
                .await
            {
                Ok(approval) => {
                    self.stream_approval(&approval, session_id, emitter).await;
                    return Ok(());
                }
                Err(ExecutionError::NoPendingTrade { .. }) => {
                    info!(user_id = %user_id, "Approval phrasing without a pending trade; routing normally");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (user, portfolio, positions) = self.load_client_context(req.user_id.as_deref()).await;
        let portfolio_block = prompts::portfolio_context(portfolio.as_ref(), &positions);
        let client_block = client_context(user.as_ref());

        let decision = self
            .router
            .classify(&req.request, Some(&portfolio_block), Some(&client_block))
            .await;
        info!(agent = decision.agent.as_str(), task = %decision.task, "Turn routed");

        match decision.agent {
            AgentKind::PortfolioAnalysis => {
                self.run_analysis(req, session_id, &portfolio_block, &client_block, &positions, emitter)
                    .await
            }
            AgentKind::TradeExecution => {
                self.run_trade_execution(
                    req,
                    session_id,
                    portfolio.as_ref(),
                    &positions,
                    &portfolio_block,
                    &client_block,
                    emitter,
                )
                .await
            }
            AgentKind::ComplianceReview => {
                self.run_compliance_review(req, session_id, emitter).await
            }
        }
    }

    async fn load_client_context(
        &self,
        user_id: Option<&str>,
    ) -> (Option<User>, Option<Portfolio>, Vec<Position>) {
        let Some(user_id) = user_id else {
            return (None, None, Vec::new());
        };
        let user = self.store.get_user(user_id).await.unwrap_or_default();
        let portfolio = self
            .store
            .get_primary_portfolio(user_id)
            .await
            .unwrap_or_default();
        let positions = match &portfolio {
            Some(p) => self
                .store
                .get_portfolio_assets(&p.portfolio_id)
                .await
                .unwrap_or_default(),
            None => Vec::new(),
        };
        (user, portfolio, positions)
    }

    // ----- approval fast-path ------------------------------------------

    async fn stream_approval(
        &self,
        approval: &ApprovalOutcome,
        session_id: &str,
        emitter: &mut Emitter,
    ) {
        let tx = &approval.transaction;
        emitter
            .content(&format!(
                "## Trade Approved\n\nExecuting {} order for {} shares of {}...\n\n",
                tx.side, tx.quantity, tx.symbol
            ))
            .await;

        match approval.outcome.status {
            TransactionStatus::Executed => {
                let fill_price = approval.outcome.fill_price.unwrap_or(Decimal::ZERO);
                let total = approval.outcome.filled_qty * fill_price;
                emitter
                    .content(&format!(
                        "**Trade Executed Successfully!**\n\n\
                         - Symbol: {}\n- Action: {}\n- Quantity: {} shares\n\
                         - Execution Price: ${:.2}\n- Total Value: ${:.2}\n- Status: FILLED\n\n\
                         Your portfolio has been updated to reflect this transaction.",
                        tx.symbol, tx.side, approval.outcome.filled_qty, fill_price, total
                    ))
                    .await;
            }
            TransactionStatus::Pending => {
                emitter
                    .content(&format!(
                        "Your order was submitted to the broker and is awaiting a fill. \
                         The background sync will record the result.\n\n{}",
                        approval.outcome.notes
                    ))
                    .await;
            }
            status => {
                emitter
                    .content(&format!(
                        "**Trade {}**\n\n{}\n",
                        status_headline(status),
                        approval.outcome.notes
                    ))
                    .await;
            }
        }

        emitter
            .final_result(json!({
                "response": emitter.assembled,
                "session_id": session_id,
                "workflow_complete": true,
                "execution": {
                    "transaction_id": approval.outcome.transaction_id,
                    "status": approval.outcome.status.as_str(),
                    "filled_qty": approval.outcome.filled_qty,
                    "fill_price": approval.outcome.fill_price,
                    "message": approval.message,
                },
            }))
            .await;
    }

    // ----- portfolio analysis ------------------------------------------

    async fn run_analysis(
        &self,
        req: &TurnRequest,
        session_id: &str,
        portfolio_block: &str,
        client_block: &str,
        positions: &[Position],
        emitter: &mut Emitter,
    ) -> Result<(), anyhow::Error> {
        let history = self
            .session_log
            .get_history(session_id, HISTORY_LIMIT)
            .await
            .unwrap_or_default();
        let history_block = prompts::history_context(&history);
        let price_block = self.lookup_prices(&req.request).await;

        let prompt = prompts::analysis_prompt(
            &req.request,
            portfolio_block,
            &history_block,
            &price_block,
            client_block,
        );
        if let Err(e) = self.stream_llm(prompts::ANALYSIS_SYSTEM, &prompt, emitter).await {
            error!("Analysis stream failed: {e}");
            emitter
                .error("llm_error", "The analysis stream was interrupted.")
                .await;
            return Ok(());
        }

        let metrics = derived_metrics(positions);
        let risk_score = metrics["risk_score"].clone();
        emitter
            .final_result(json!({
                "response": emitter.assembled,
                "session_id": session_id,
                "workflow_complete": true,
                "analysis_results": {"portfolio_metrics": metrics},
                "risk_assessment": {"score": risk_score},
            }))
            .await;
        Ok(())
    }

    // ----- trade execution ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_trade_execution(
        &self,
        req: &TurnRequest,
        session_id: &str,
        portfolio: Option<&Portfolio>,
        positions: &[Position],
        portfolio_block: &str,
        client_block: &str,
        emitter: &mut Emitter,
    ) -> Result<(), anyhow::Error> {
        let prompt = prompts::trade_prompt(&req.request, portfolio_block, client_block);
        if let Err(e) = self.stream_llm(prompts::TRADE_SYSTEM, &prompt, emitter).await {
            error!("Trade narrative stream failed: {e}");
            emitter
                .error("llm_error", "The trade analysis stream was interrupted.")
                .await;
            return Ok(());
        }

        let Some(rec) = self.extract_trade_details(&req.request).await else {
            emitter
                .content(
                    "\n\nI couldn't identify an actionable trade in your request. \
                     Please specify the symbol, quantity and direction (for example: \
                     \"buy 10 MSFT\").",
                )
                .await;
            emitter
                .final_result(json!({
                    "response": emitter.assembled,
                    "session_id": session_id,
                    "workflow_complete": false,
                    "requires_clarification": true,
                }))
                .await;
            return Ok(());
        };

        // Concentration pre-guard: clearly unsuitable trades are refused
        // here and never reach the compliance reviewer or the store.
        if let Some(message) = self.pre_guard(&rec, portfolio, positions).await {
            emitter.content(&format!("\n\n{message}")).await;
            emitter
                .final_result(json!({
                    "response": emitter.assembled,
                    "session_id": session_id,
                    "workflow_complete": true,
                    "trade_blocked": "concentration_pre_guard",
                }))
                .await;
            return Ok(());
        }

        let Some(user_id) = &req.user_id else {
            emitter
                .content("\n\nPlease sign in to submit trades for execution.")
                .await;
            emitter
                .final_result(json!({
                    "response": emitter.assembled,
                    "session_id": session_id,
                    "workflow_complete": false,
                }))
                .await;
            return Ok(());
        };

        match self.execution.create_pending_trade(user_id, &rec).await {
            Ok(outcome) => {
                emitter.content(&format!("\n\n{}", format_verdict(&outcome))).await;
                if outcome.status == TransactionStatus::Pending {
                    self.session_log
                        .log_message(
                            session_id,
                            AgentType::Execution,
                            MessageType::ApprovalRequest,
                            &format!(
                                "Pending trade awaiting approval: {} {} {}",
                                outcome.side, outcome.quantity, outcome.symbol
                            ),
                            Some(json!({"transaction_id": outcome.transaction_id})),
                            None,
                        )
                        .await;
                }
                emitter
                    .final_result(json!({
                        "response": emitter.assembled,
                        "session_id": session_id,
                        "workflow_complete": false,
                        "trade_recommendations": [recommendation_json(&rec, &outcome)],
                        "compliance_approved": outcome.verdict.approved,
                        "requires_user_approval": outcome.status == TransactionStatus::Pending,
                        "transaction_id": outcome.transaction_id,
                    }))
                    .await;
            }
            Err(e) => self.emit_execution_error(e, session_id, emitter).await,
        }
        Ok(())
    }

    // ----- compliance review -------------------------------------------

    async fn run_compliance_review(
        &self,
        req: &TurnRequest,
        session_id: &str,
        emitter: &mut Emitter,
    ) -> Result<(), anyhow::Error> {
        let Some(rec) = self.extract_trade_details(&req.request).await else {
            emitter
                .content(
                    "To run a compliance review I need a concrete trade: symbol, quantity \
                     and direction.",
                )
                .await;
            emitter
                .final_result(json!({
                    "response": emitter.assembled,
                    "session_id": session_id,
                    "workflow_complete": false,
                    "requires_clarification": true,
                }))
                .await;
            return Ok(());
        };
        let Some(user_id) = &req.user_id else {
            emitter
                .content("Please sign in so I can review trades against your portfolio.")
                .await;
            emitter
                .final_result(json!({
                    "response": emitter.assembled,
                    "session_id": session_id,
                    "workflow_complete": false,
                }))
                .await;
            return Ok(());
        };

        match self.execution.create_pending_trade(user_id, &rec).await {
            Ok(outcome) => {
                emitter.content(&format_verdict(&outcome)).await;
                emitter
                    .final_result(json!({
                        "response": emitter.assembled,
                        "session_id": session_id,
                        "workflow_complete": false,
                        "compliance_approved": outcome.verdict.approved,
                        "requires_user_approval": outcome.status == TransactionStatus::Pending,
                        "transaction_id": outcome.transaction_id,
                    }))
                    .await;
            }
            Err(e) => self.emit_execution_error(e, session_id, emitter).await,
        }
        Ok(())
    }

    async fn emit_execution_error(
        &self,
        err: ExecutionError,
        session_id: &str,
        emitter: &mut Emitter,
    ) {
        // Domain errors carry actionable messages; everything else stays
        // generic for the client.
        let message = match &err {
            ExecutionError::NoPortfolio { .. } => {
                "You don't have a portfolio on file yet, so I can't execute trades.".to_string()
            }
            ExecutionError::SymbolNotHeld { symbol } => {
                format!("You don't currently hold {symbol}, so there is nothing to sell.")
            }
            ExecutionError::InsufficientShares {
                symbol,
                requested,
                held,
            } => format!(
                "You asked to sell {requested} shares of {symbol} but hold only {held}."
            ),
            ExecutionError::UnknownSymbol { input } => {
                format!("I couldn't resolve \"{input}\" to a tradable symbol.")
            }
            ExecutionError::NoPendingTrade { .. } => {
                "There is no pending trade awaiting your approval.".to_string()
            }
            _ => {
                error!("Trade workflow failed: {err}");
                emitter
                    .error("execution_error", "I couldn't process that trade right now.")
                    .await;
                return;
            }
        };
        emitter.content(&format!("\n\n{message}")).await;
        emitter
            .final_result(json!({
                "response": emitter.assembled,
                "session_id": session_id,
                "workflow_complete": false,
                "error": err.to_string(),
            }))
            .await;
    }

    // ----- helpers ------------------------------------------------------

    /// Forward LLM tokens to the client, bounding the gap between tokens.
    async fn stream_llm(
        &self,
        system: &str,
        prompt: &str,
        emitter: &mut Emitter,
    ) -> Result<(), LlmError> {
        let mut rx = self.llm.stream(system, prompt).await?;
        loop {
            if emitter.is_closed() {
                // Client went away; dropping the receiver aborts the
                // upstream request. Whatever was assembled still gets
                // logged to the session.
                return Ok(());
            }
            match tokio::time::timeout(self.token_timeout, rx.recv()).await {
                Ok(Some(Ok(token))) => emitter.content(&token).await,
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(LlmError::Timeout {
                        seconds: self.token_timeout.as_secs(),
                    });
                }
            }
        }
    }

    async fn extract_trade_details(&self, request: &str) -> Option<TradeRecommendation> {
        let response = match self
            .llm
            .complete(prompts::EXTRACTION_SYSTEM, &prompts::extraction_prompt(request))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Trade extraction failed: {e}");
                return None;
            }
        };
        parse_trade_details(&response)
    }

    /// Returns the refusal message when the would-be position exceeds the
    /// blocking threshold, or when the entire holding would be sold.
    async fn pre_guard(
        &self,
        rec: &TradeRecommendation,
        portfolio: Option<&Portfolio>,
        positions: &[Position],
    ) -> Option<String> {
        let portfolio = portfolio?;
        if portfolio.total_value <= Decimal::ZERO {
            return None;
        }
        let existing = positions
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(&rec.symbol));
        let existing_value = existing.map(|p| p.market_value).unwrap_or(Decimal::ZERO);
        let held = existing.map(|p| p.quantity).unwrap_or(Decimal::ZERO);

        match rec.action {
            TradeSide::Buy => {
                let quantity = rec.quantity?;
                let price = match rec.price {
                    Some(p) => p,
                    None => match existing.map(|p| p.current_price) {
                        Some(p) if p > Decimal::ZERO => p,
                        _ => self
                            .broker
                            .get_price(&rec.symbol)
                            .await
                            .unwrap_or(Decimal::ZERO),
                    },
                };
                let new_value = existing_value + quantity * price;
                let pct = new_value / portfolio.total_value;
                (pct > PRE_GUARD_BLOCK).then(|| {
                    prompts::extreme_concentration_message(
                        &rec.symbol,
                        pct,
                        new_value,
                        portfolio.total_value,
                        false,
                    )
                })
            }
            TradeSide::Sell => {
                let sell_all =
                    held > Decimal::ZERO && (rec.quantity.is_none() || rec.quantity == Some(held));
                sell_all.then(|| {
                    let pct = if portfolio.total_value > Decimal::ZERO {
                        existing_value / portfolio.total_value
                    } else {
                        Decimal::ZERO
                    };
                    prompts::extreme_concentration_message(
                        &rec.symbol,
                        pct,
                        existing_value,
                        portfolio.total_value,
                        true,
                    )
                })
            }
        }
    }

    /// Resolve tickers mentioned in the request and quote them for prompt
    /// context.
    async fn lookup_prices(&self, request: &str) -> String {
        let mut quotes = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for token in request
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() >= 2 && t.len() <= 6)
        {
            if quotes.len() >= MAX_PRICE_LOOKUPS {
                break;
            }
            let upper = token.to_ascii_uppercase();
            if STOPWORDS.contains(&upper.as_str()) || !seen.insert(upper.clone()) {
                continue;
            }
            if let Some(symbol) = self.broker.resolve_symbol(token).await
                && let Ok(price) = self.broker.get_price(&symbol).await
            {
                quotes.push(format!("- {symbol}: ${price:.2}"));
            }
        }
        if quotes.is_empty() {
            String::new()
        } else {
            format!("LIVE QUOTES:\n{}\n", quotes.join("\n"))
        }
    }
}

const STOPWORDS: &[&str] = &[
    "ALL", "AND", "ANY", "APPROVE", "AT", "BUY", "CAN", "DO", "FOR", "HOW", "IN", "IS", "IT",
    "LETS", "ME", "MY", "OF", "ON", "OR", "PLEASE", "PORTFOLIO", "RISK", "SELL", "SHARE",
    "SHARES", "SHOULD", "STOCK", "STOCKS", "THE", "TO", "TRADE", "WHAT", "WHY", "YOU",
];

fn client_context(user: Option<&User>) -> String {
    match user {
        Some(user) => format!(
            "Risk Tolerance: {}, Objective: {}",
            user.risk_tolerance,
            user.objective.as_str()
        ),
        None => "Risk Tolerance: moderate (default)".to_string(),
    }
}

fn status_headline(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Executed => "Executed",
        TransactionStatus::Rejected => "Rejected",
        TransactionStatus::Failed => "Failed",
        TransactionStatus::Cancelled => "Cancelled",
        TransactionStatus::Pending => "Pending",
    }
}

/// Parse the extraction model's JSON into a recommendation. Returns None
/// for non-trades, nulls, and anything missing the required fields.
fn parse_trade_details(response: &str) -> Option<TradeRecommendation> {
    let trimmed = response.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(&trimmed[start..=end]).ok()?;

    let symbol = parsed.get("symbol")?.as_str()?.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return None;
    }
    let action = TradeSide::from_str(parsed.get("action")?.as_str()?).ok()?;

    let quantity = match parsed.get("quantity") {
        Some(serde_json::Value::Number(n)) => {
            let value = n.as_f64()?;
            if value <= 0.0 {
                return None;
            }
            Some(Decimal::from_f64_retain(value)?)
        }
        Some(serde_json::Value::String(s)) => {
            let lower = s.trim().to_lowercase();
            if matches!(lower.as_str(), "all" | "entire" | "everything") {
                None
            } else {
                let value = lower.parse::<f64>().ok()?;
                if value <= 0.0 {
                    return None;
                }
                Some(Decimal::from_f64_retain(value)?)
            }
        }
        _ => return None,
    };
    // "all" only makes sense when selling an existing position.
    if quantity.is_none() && action == TradeSide::Buy {
        return None;
    }

    let order_type = parsed
        .get("order_type")
        .and_then(|v| v.as_str())
        .and_then(|s| OrderType::from_str(s).ok())
        .unwrap_or_default();
    let rationale = parsed
        .get("rationale")
        .and_then(|v| v.as_str())
        .unwrap_or("Client-requested trade")
        .to_string();

    Some(TradeRecommendation {
        symbol,
        action,
        quantity,
        order_type,
        price: None,
        rationale,
    })
}

/// Markdown rendering of a compliance verdict for the chat stream.
fn format_verdict(outcome: &PendingTradeOutcome) -> String {
    let verdict = &outcome.verdict;
    let mut out = String::from("## Compliance Review\n\n");
    out.push_str(&format!(
        "**Trade:** {} {} {} @ ~${:.2}\n",
        outcome.side, outcome.quantity, outcome.symbol, outcome.estimated_price
    ));
    out.push_str(&format!(
        "**Status:** {} (compliance score {}/100)\n\n",
        if verdict.approved { "APPROVED" } else { "REJECTED" },
        verdict.score
    ));

    if !verdict.violations.is_empty() {
        out.push_str("**Violations:**\n");
        for violation in &verdict.violations {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                violation.severity, violation.rule_id, violation.description
            ));
        }
        out.push('\n');
    }
    if !verdict.warnings.is_empty() {
        out.push_str("**Warnings:**\n");
        for warning in &verdict.warnings {
            out.push_str(&format!("- {warning}\n"));
        }
        out.push('\n');
    }
    if verdict.requires_disclosure {
        out.push_str("This trade requires additional regulatory disclosure.\n\n");
    }

    match outcome.status {
        TransactionStatus::Pending => out.push_str(
            "**Next step:** reply \"approve\" to execute this trade, or tell me to cancel it.",
        ),
        TransactionStatus::Rejected => out.push_str(
            "**Trade Rejected.** The order was not submitted; the violations above must be \
             resolved first.",
        ),
        _ => {}
    }
    out
}

fn recommendation_json(
    rec: &TradeRecommendation,
    outcome: &PendingTradeOutcome,
) -> serde_json::Value {
    json!({
        "symbol": outcome.symbol,
        "action": rec.action.as_order_side(),
        "quantity": outcome.quantity,
        "order_type": rec.order_type.as_str(),
        "estimated_price": outcome.estimated_price,
        "rationale": rec.rationale,
    })
}

/// Presentation metrics derived from the stored positions.
fn derived_metrics(positions: &[Position]) -> serde_json::Value {
    let tech_allocation: f64 = positions
        .iter()
        .filter(|p| p.sector.as_deref() == Some("Technology"))
        .filter_map(|p| (p.allocation * dec!(100)).to_f64())
        .sum();
    let diversification_score = (positions.len() as f64 * 2.0).min(10.0);
    let risk_score = (tech_allocation / 10.0 + diversification_score / 2.0).min(10.0);
    json!({
        "risk_score": (risk_score * 10.0).round() / 10.0,
        "diversification_score": (diversification_score * 10.0).round() / 10.0,
        "tech_allocation": (tech_allocation * 10.0).round() / 10.0,
    })
}
