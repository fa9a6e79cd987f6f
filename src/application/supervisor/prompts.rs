//! Prompt templates for the supervisor's LLM calls.

use crate::domain::chat::ChatMessage;
use crate::domain::trading::portfolio::{Portfolio, Position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const ANALYSIS_SYSTEM: &str = "You are a professional investment advisor. Ground every \
answer in the client's actual portfolio data, be specific about symbols and dollar amounts, \
disclose material risks, and keep a clear, approachable tone. Do not fabricate holdings or \
prices.";

pub const TRADE_SYSTEM: &str = "You are a professional trade execution specialist. Analyze the \
client's trade request against their actual portfolio: validate it, quantify the portfolio \
impact, name the risks, and outline the execution plan. Be conversational but precise.";

pub const EXTRACTION_SYSTEM: &str = "You extract structured trade orders from natural-language \
requests. Respond with a single JSON object or the word null, nothing else.";

/// Renders the portfolio into the context block shared by several prompts.
pub fn portfolio_context(portfolio: Option<&Portfolio>, positions: &[Position]) -> String {
    let Some(portfolio) = portfolio else {
        return "No portfolio on file for this client.".to_string();
    };
    let mut out = format!(
        "Current Portfolio Value: ${:.2}\nCash Balance: ${:.2}\nHoldings:\n",
        portfolio.total_value, portfolio.cash_balance
    );
    if positions.is_empty() {
        out.push_str("- (none)\n");
    }
    for position in positions {
        out.push_str(&format!(
            "- {}: {} shares @ ${:.2} = ${:.2} ({:.1}% of portfolio)\n",
            position.symbol,
            position.quantity,
            position.current_price,
            position.market_value,
            position.allocation * dec!(100),
        ));
    }
    out
}

/// Recent conversation turns rendered oldest-first for prompt context.
pub fn history_context(history: &[ChatMessage]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let mut out = String::from("RECENT CONVERSATION:\n");
    for message in history {
        out.push_str(&format!(
            "[{}] {}\n",
            message.agent_type.as_str(),
            message.content.chars().take(400).collect::<String>()
        ));
    }
    out
}

pub fn analysis_prompt(
    request: &str,
    portfolio_block: &str,
    history_block: &str,
    price_block: &str,
    client_block: &str,
) -> String {
    format!(
        r#"CLIENT REQUEST: "{request}"

{history_block}
CURRENT PORTFOLIO:
{portfolio_block}
{price_block}
CLIENT PROFILE: {client_block}

Answer the client's question directly. Where relevant, comment on diversification,
concentration and risk alignment, and suggest concrete next steps."#
    )
}

pub fn trade_prompt(request: &str, portfolio_block: &str, client_block: &str) -> String {
    format!(
        r#"TRADE REQUEST: "{request}"

CURRENT PORTFOLIO:
{portfolio_block}
CLIENT PROFILE: {client_block}

Provide: trade validation, portfolio impact, risk analysis, an execution plan, and any
recommendations or concerns. For SELL orders confirm the client holds enough shares; for BUY
orders estimate the cost and cash impact."#
    )
}

pub fn extraction_prompt(request: &str) -> String {
    format!(
        r#"Extract trade details from this request. If this is NOT a trade request, return null.

USER REQUEST: "{request}"

Return JSON with fields:
- "symbol": ticker symbol (e.g. "AAPL")
- "action": "buy" or "sell"
- "quantity": number of shares, or "all" when the entire position is meant
- "order_type": "market", "limit", "stop" or "stop_limit"
- "rationale": brief reason for the trade

Examples:
"Sell 100 shares of OKTA" -> {{"symbol": "OKTA", "action": "sell", "quantity": 100, "order_type": "market", "rationale": "User requested sale"}}
"sell all SPY" -> {{"symbol": "SPY", "action": "sell", "quantity": "all", "order_type": "market", "rationale": "User requested full exit"}}
"Should I sell NVDA?" -> null

Return ONLY the JSON object or null:"#
    )
}

/// The stern refusal streamed when the concentration pre-guard trips.
pub fn extreme_concentration_message(
    symbol: &str,
    new_position_pct: Decimal,
    new_position_value: Decimal,
    portfolio_value: Decimal,
    sell_all: bool,
) -> String {
    let pct = new_position_pct * dec!(100);
    let mut out = String::from("## EXTREME CONCENTRATION RISK DETECTED\n\n");
    if sell_all {
        out.push_str(&format!(
            "Selling your entire {symbol} position concentrates the remaining portfolio and \
             removes its diversification benefit in one step.\n\n"
        ));
    } else {
        out.push_str(&format!(
            "This trade would create a concentrated position of **{pct:.1}% in {symbol}** \
             (${new_position_value:.2} of ${portfolio_value:.2} total portfolio value).\n\n"
        ));
    }
    out.push_str(
        "**Why this is blocked before compliance review:**\n\
         - A single position above 50% of portfolio value violates basic diversification principles\n\
         - Individual stocks can fall 20-50% in a single day\n\
         - Regulators flag positions of this size as unsuitable for most risk profiles\n\n\
         **My recommendation:** start with a smaller position (5-15% of portfolio), keep \
         diversification across sectors, and consider dollar-cost averaging.\n\n\
         Would you like a more diversified alternative that fits your goals?",
    );
    out
}
