//! Parsed signals and inbound message shapes
//!
//! Free-text-to-structure parsing is a pluggable upstream concern; what
//! arrives here is the fixed pipe-delimited schema in the `structured`
//! field (`LIMIT|HYPE|Entry:|32.2-31.5|SL:|30.7|TP:|33.5,35`), with the
//! position direction recoverable from the free text when the structured
//! form omits it.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionType {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

impl PositionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionType::Long => "LONG",
            PositionType::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<PositionType> {
        match s {
            "LONG" => Some(PositionType::Long),
            "SHORT" => Some(PositionType::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit => "LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<OrderKind> {
        match s {
            "MARKET" => Some(OrderKind::Market),
            "LIMIT" => Some(OrderKind::Limit),
            _ => None,
        }
    }
}

/// The fixed parser output schema bound to a trade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSignal {
    pub coin_symbol: String,
    pub position_type: PositionType,
    /// One value, or two for an entry range (given best-first).
    pub entry_prices: Vec<f64>,
    pub stop_loss: Option<f64>,
    pub take_profits: Vec<f64>,
    pub order_type: OrderKind,
    /// Integer scale for small-price coins; quantity is multiplied by it.
    pub quantity_multiplier: Option<u32>,
}

impl ParsedSignal {
    /// Parse the structured field, falling back to the free text for the
    /// position direction.
    pub fn parse(structured: &str, content: &str) -> Result<ParsedSignal> {
        let tokens: Vec<&str> = structured.split('|').map(str::trim).collect();
        if tokens.len() < 2 {
            bail!("structured signal too short: {structured:?}");
        }

        let order_type = OrderKind::parse(&tokens[0].to_uppercase())
            .with_context(|| format!("unknown order type {:?}", tokens[0]))?;
        let coin_symbol = tokens[1].to_uppercase();
        if coin_symbol.is_empty() {
            bail!("structured signal has no coin symbol");
        }

        let mut entry_prices = Vec::new();
        let mut stop_loss = None;
        let mut take_profits = Vec::new();
        let mut quantity_multiplier = None;
        let mut position_type = None;

        let mut idx = 2;
        while idx < tokens.len() {
            let marker = tokens[idx].to_uppercase();
            match marker.as_str() {
                "LONG" => {
                    position_type = Some(PositionType::Long);
                    idx += 1;
                }
                "SHORT" => {
                    position_type = Some(PositionType::Short);
                    idx += 1;
                }
                "ENTRY:" => {
                    let value = tokens.get(idx + 1).context("Entry: marker without value")?;
                    entry_prices = parse_price_list(value)?;
                    idx += 2;
                }
                "SL:" => {
                    let value = tokens.get(idx + 1).context("SL: marker without value")?;
                    stop_loss = Some(parse_price(value)?);
                    idx += 2;
                }
                "TP:" => {
                    let value = tokens.get(idx + 1).context("TP: marker without value")?;
                    take_profits = parse_price_list(value)?;
                    idx += 2;
                }
                "MULT:" => {
                    let value = tokens.get(idx + 1).context("Mult: marker without value")?;
                    quantity_multiplier = Some(
                        value
                            .parse()
                            .with_context(|| format!("bad multiplier {value:?}"))?,
                    );
                    idx += 2;
                }
                "" => idx += 1,
                other => bail!("unknown structured marker {other:?}"),
            }
        }

        if entry_prices.is_empty() {
            bail!("structured signal has no entry price");
        }
        if entry_prices.len() > 2 {
            bail!("entry range has more than two bounds");
        }

        let position_type = position_type
            .or_else(|| infer_position_type(content))
            .context("position direction missing from structured signal and content")?;

        Ok(ParsedSignal {
            coin_symbol,
            position_type,
            entry_prices,
            stop_loss,
            take_profits,
            order_type,
            quantity_multiplier,
        })
    }

    /// The price submitted for a LIMIT entry: the first (best) bound of
    /// the range, or the single value.
    pub fn limit_entry_price(&self) -> Option<f64> {
        self.entry_prices.first().copied()
    }
}

fn parse_price(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .with_context(|| format!("bad price {s:?}"))
}

/// "32.2-31.5" is a range, "33.5,35" a list, "32.2" a single value.
fn parse_price_list(s: &str) -> Result<Vec<f64>> {
    let s = s.trim();
    let parts: Vec<&str> = if s.contains(',') {
        s.split(',').collect()
    } else if s.len() > 1 {
        // A dash can be a range separator or a negative sign; prices are
        // never negative here, so any interior dash splits.
        match s[1..].find('-') {
            Some(pos) => vec![&s[..pos + 1], &s[pos + 2..]],
            None => vec![s],
        }
    } else {
        vec![s]
    };
    parts.iter().map(|p| parse_price(p)).collect()
}

fn infer_position_type(content: &str) -> Option<PositionType> {
    let lower = content.to_lowercase();
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        match word {
            "long" | "longed" | "longing" => return Some(PositionType::Long),
            "short" | "shorted" | "shorting" => return Some(PositionType::Short),
            _ => {}
        }
    }
    None
}

/// Normalize an ISO-8601 signal timestamp (with or without the trailing
/// `Z`) to epoch milliseconds.
pub fn parse_signal_timestamp(raw: &str) -> Result<i64> {
    let trimmed = raw.trim().trim_end_matches('Z');
    // Re-append a UTC marker so both forms parse the same way.
    let normalized = format!("{trimmed}+00:00");
    let parsed = DateTime::parse_from_rfc3339(&normalized)
        .with_context(|| format!("unparseable signal timestamp {raw:?}"))?;
    Ok(parsed.timestamp_millis())
}

/// Inbound ingress payload, queued verbatim for the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSignal {
    pub timestamp: String,
    pub content: String,
    #[serde(default)]
    pub structured: Option<String>,
    #[serde(default)]
    pub discord_id: Option<String>,
    /// Parent trade's discord id; present on follow-up alerts only.
    #[serde(default, alias = "trade")]
    pub parent_ref: Option<String>,
    #[serde(default)]
    pub trader: Option<String>,
}

impl InboundSignal {
    pub fn is_follow_up(&self) -> bool {
        self.parent_ref.as_deref().is_some_and(|r| !r.is_empty())
    }
}
