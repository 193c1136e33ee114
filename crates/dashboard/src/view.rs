//! Text rendering for the terminal dashboard

use rust_decimal::Decimal;
use std::fmt::Write;

use roracle_chain::{ConnectionStatus, Endpoint};
use roracle_core::{OracleValue, PriceQuote};

/// Visual weight of a status or source label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Positive,
    Warning,
    Negative,
    Highlight,
    Neutral,
}

impl Tone {
    fn ansi(&self) -> &'static str {
        match self {
            Tone::Positive => "\x1b[32m",
            Tone::Warning => "\x1b[33m",
            Tone::Negative => "\x1b[31m",
            Tone::Highlight => "\x1b[36m",
            Tone::Neutral => "\x1b[37m",
        }
    }
}

pub fn status_tone(status: &str) -> Tone {
    match status.to_lowercase().as_str() {
        "success" => Tone::Positive,
        "warning" => Tone::Warning,
        "error" => Tone::Negative,
        _ => Tone::Neutral,
    }
}

pub fn source_tone(source: &str) -> Tone {
    match source.to_lowercase().as_str() {
        "binance" => Tone::Warning,
        "coinbase" | "kraken" => Tone::Highlight,
        _ => Tone::Neutral,
    }
}

/// `$1,234,567.89`
pub fn format_usd(price: Decimal) -> String {
    let fixed = format!("{:.2}", price.round_dp(2));
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}${grouped}.{frac_part}")
}

fn format_price(value: &OracleValue) -> String {
    match value.price() {
        Ok(price) => format_usd(price),
        Err(_) => format!("{} (unscaled)", value.value),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    pub color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn paint(&self, tone: Tone, text: &str) -> String {
        if self.color {
            format!("{}{}\x1b[0m", tone.ansi(), text)
        } else {
            text.to_string()
        }
    }

    pub fn connection(&self, status: ConnectionStatus, url: Option<&str>) -> String {
        match status {
            ConnectionStatus::Connected(endpoint) => {
                let label = match endpoint {
                    Endpoint::Primary => "Connected",
                    Endpoint::Fallback => "Connected (fallback)",
                };
                format!("{} {}", self.paint(Tone::Positive, "●"), match url {
                    Some(url) => format!("{label} to {url}"),
                    None => label.to_string(),
                })
            }
            ConnectionStatus::Connecting => format!("{} Connecting...", self.paint(Tone::Warning, "●")),
            ConnectionStatus::Disconnected => format!("{} Disconnected", self.paint(Tone::Negative, "●")),
        }
    }

    pub fn last_value(&self, value: Option<&OracleValue>) -> String {
        let mut out = String::from("Last Oracle Value\n");
        let Some(value) = value else {
            out.push_str("  No data available\n");
            return out;
        };

        let updated = value
            .updated_at_datetime()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| value.updated_at.to_string());

        let _ = writeln!(out, "  Value:        {}", format_price(value));
        let _ = writeln!(out, "  Source:       {}", self.paint(source_tone(&value.source), &value.source));
        let _ = writeln!(out, "  Status:       {}", self.paint(status_tone(&value.status), &value.status));
        let _ = writeln!(out, "  Last Updated: {updated}");
        out
    }

    pub fn history(&self, history: &[OracleValue]) -> String {
        let mut out = String::from("Price History\n");
        if history.is_empty() {
            out.push_str("  No history data available\n");
            return out;
        }

        let _ = writeln!(out, "  {:<10} {:>18}  {}", "TIME", "PRICE (USD)", "SOURCE");
        for entry in history {
            let time = entry
                .updated_at_datetime()
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "  {:<10} {:>18}  {}", time, format_price(entry), entry.source);
        }
        out
    }

    pub fn quote(&self, quote: &PriceQuote) -> String {
        format!(
            "BTC/USD {} from {} at {} ms",
            quote.price(),
            self.paint(source_tone(quote.source().name()), quote.source().name()),
            quote.timestamp_ms()
        )
    }
}
