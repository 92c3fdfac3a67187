//! Bank-notification parsing: MIME body extraction plus per-bank
//! amount/timestamp extractors.
//!
//! Adding a bank means implementing [`BankParser`] and registering it in
//! [`BankRegistry::default_registry`]; the connector and the confirmation
//! orchestrator stay untouched.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use mail_parser::MessageParser;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::core::types::Bank;

/// A recognized payment notification, derived per email. Lives only for
/// the duration of one reconcile step; persists through the audit log.
#[derive(Debug, Clone)]
pub struct BankNotification {
    pub bank: Bank,
    /// Credited amount, rounded to 2 decimal places.
    pub amount: Decimal,
    pub raw_text: String,
    /// Timestamp printed inside the notification, zone unknown.
    pub occurred_at: Option<NaiveDateTime>,
    pub received_at: DateTime<Utc>,
}

/// Per-bank notification extractor.
pub trait BankParser: Send + Sync {
    fn bank(&self) -> Bank;

    /// `None` when the text is not this bank's credit notification.
    fn parse(&self, text: &str) -> Option<BankNotification>;
}

/// Registry of available bank parsers, keyed by bank.
pub struct BankRegistry {
    parsers: HashMap<Bank, Box<dyn BankParser>>,
}

impl BankRegistry {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn register(&mut self, parser: Box<dyn BankParser>) {
        self.parsers.insert(parser.bank(), parser);
    }

    pub fn get(&self, bank: Bank) -> Option<&dyn BankParser> {
        self.parsers.get(&bank).map(|p| p.as_ref())
    }

    /// Registry with all known bank parsers.
    pub fn default_registry() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MbankParser));
        registry
    }
}

impl Default for BankRegistry {
    fn default() -> Self {
        Self::default_registry()
    }
}

/// Decoded text body of a raw email: the first `text/plain` part when one
/// exists, otherwise the first `text/html` part with tags stripped.
/// Charset decoding is lossy, never failing. `None` when the message has
/// no readable text at all.
pub fn extract_body(raw: &[u8]) -> Option<String> {
    let parsed = MessageParser::default().parse(raw)?;

    if let Some(text) = parsed.body_text(0) {
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    if let Some(html) = parsed.body_html(0) {
        let text = strip_html(html.as_ref());
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    None
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── MBank ────────────────────────────────────────────────────────────────────

static MBANK_CREDIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)пополнение|зачисление").unwrap());

// The credited sum is the first amount in the text; the running balance
// comes later.
static MBANK_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([0-9][0-9\s.,]*)\s*(?:kgs|сом)").unwrap());

static MBANK_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{2}\.\d{2}\.\d{4})\s+(\d{2}:\d{2})").unwrap());

/// MBank transfer-credited notification.
///
/// Recognized shape:
/// `MBANK: Пополнение +503.37 KGS. 02.08.2026 14:05. Доступно: 9999.99 KGS.`
/// Amount variants with thousands separators (`1 503,37 сом`,
/// `1,503.37 KGS`) are accepted.
pub struct MbankParser;

impl BankParser for MbankParser {
    fn bank(&self) -> Bank {
        Bank::Mbank
    }

    fn parse(&self, text: &str) -> Option<BankNotification> {
        if !MBANK_CREDIT_RE.is_match(text) {
            return None;
        }
        let caps = MBANK_AMOUNT_RE.captures(text)?;
        let amount = normalize_amount(caps.get(1)?.as_str())?;
        if amount <= Decimal::ZERO {
            return None;
        }

        let occurred_at = MBANK_DATE_RE.captures(text).and_then(|c| {
            NaiveDateTime::parse_from_str(&format!("{} {}", &c[1], &c[2]), "%d.%m.%Y %H:%M").ok()
        });

        Some(BankNotification {
            bank: Bank::Mbank,
            amount,
            raw_text: text.to_string(),
            occurred_at,
            received_at: Utc::now(),
        })
    }
}

/// Parse an amount that may carry spaces and `,`/`.` separators. The last
/// separator is the decimal point, except a lone separator followed by
/// exactly three digits, which reads as a thousands group (`1,503`).
fn normalize_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let amount = match cleaned.rfind(|c| c == ',' || c == '.') {
        None => Decimal::from_str(&cleaned).ok()?,
        Some(pos) => {
            let (int_part, frac_part) = cleaned.split_at(pos);
            let frac = &frac_part[1..];
            let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
            if int_digits.is_empty() {
                return None;
            }
            let sep_count = cleaned.matches([',', '.']).count();
            if frac.is_empty() {
                Decimal::from_str(&int_digits).ok()?
            } else if frac.len() == 3 && sep_count == 1 {
                Decimal::from_str(&format!("{}{}", int_digits, frac)).ok()?
            } else {
                Decimal::from_str(&format!("{}.{}", int_digits, frac)).ok()?
            }
        }
    };
    Some(amount.round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MBANK_TEXT: &str =
        "MBANK: Пополнение +503.37 KGS. 02.08.2026 14:05. Доступно: 9999.99 KGS.";

    // ── body extraction ──────────────────────────────────────────────────────

    fn multipart(plain: Option<&str>, html: Option<&str>) -> Vec<u8> {
        let mut parts = String::new();
        if let Some(p) = plain {
            parts.push_str(&format!(
                "--b1\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
                p
            ));
        }
        if let Some(h) = html {
            parts.push_str(&format!(
                "--b1\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
                h
            ));
        }
        format!(
            "From: noreply@mbank.kg\r\nTo: kassa@example.com\r\nSubject: n\r\n\
             MIME-Version: 1.0\r\nContent-Type: multipart/alternative; boundary=\"b1\"\r\n\r\n\
             {}--b1--\r\n",
            parts
        )
        .into_bytes()
    }

    #[test]
    fn plain_part_is_preferred_over_html() {
        let raw = multipart(Some("plain body"), Some("<p>html body</p>"));
        assert_eq!(extract_body(&raw).as_deref(), Some("plain body"));
    }

    #[test]
    fn html_only_message_yields_stripped_text() {
        let raw = multipart(None, Some("<div><b>Пополнение</b> +100.00 KGS</div>"));
        let body = extract_body(&raw).expect("html-only message must yield a body");
        assert!(!body.is_empty());
        assert!(body.contains("Пополнение"), "tags must be stripped: {body}");
        assert!(!body.contains('<'));
    }

    #[test]
    fn unparseable_bytes_yield_none() {
        assert!(extract_body(b"").is_none());
    }

    #[test]
    fn strip_html_drops_tags_and_collapses_whitespace() {
        assert_eq!(strip_html("<p>  Hello   <b>World</b>  </p>"), "Hello World");
        assert_eq!(strip_html("no tags"), "no tags");
    }

    // ── amount normalization ─────────────────────────────────────────────────

    #[test]
    fn amount_plain_decimal() {
        assert_eq!(normalize_amount("503.37"), Some(dec!(503.37)));
        assert_eq!(normalize_amount("100"), Some(dec!(100)));
    }

    #[test]
    fn amount_comma_decimal_with_space_thousands() {
        assert_eq!(normalize_amount("1 503,37"), Some(dec!(1503.37)));
    }

    #[test]
    fn amount_comma_thousands_with_dot_decimal() {
        assert_eq!(normalize_amount("1,503.37"), Some(dec!(1503.37)));
    }

    #[test]
    fn amount_lone_separator_with_three_digits_is_thousands() {
        assert_eq!(normalize_amount("1,503"), Some(dec!(1503)));
        assert_eq!(normalize_amount("2.500"), Some(dec!(2500)));
    }

    #[test]
    fn amount_two_decimal_places_kept() {
        assert_eq!(normalize_amount("75,10"), Some(dec!(75.10)));
    }

    #[test]
    fn amount_garbage_is_none() {
        assert_eq!(normalize_amount(""), None);
        assert_eq!(normalize_amount(","), None);
    }

    // ── MBank format ─────────────────────────────────────────────────────────

    #[test]
    fn mbank_parses_amount_and_timestamp() {
        let n = MbankParser.parse(MBANK_TEXT).expect("must parse");
        assert_eq!(n.bank, Bank::Mbank);
        assert_eq!(n.amount, dec!(503.37));
        let ts = n.occurred_at.expect("timestamp must parse");
        assert_eq!(ts.format("%Y-%m-%d %H:%M").to_string(), "2026-08-02 14:05");
    }

    #[test]
    fn mbank_takes_credit_amount_not_balance() {
        let n = MbankParser.parse(MBANK_TEXT).unwrap();
        assert_ne!(n.amount, dec!(9999.99));
    }

    #[test]
    fn mbank_accepts_sum_line_with_separators() {
        let text = "Зачисление перевода. Сумма: 1 503,37 сом. Дата: 01.08.2026 09:30.";
        let n = MbankParser.parse(text).expect("must parse");
        assert_eq!(n.amount, dec!(1503.37));
    }

    #[test]
    fn mbank_rejects_unrelated_text() {
        assert!(MbankParser.parse("Ваш код подтверждения: 1234").is_none());
        assert!(MbankParser
            .parse("Списание 200.00 KGS со счета")
            .is_none());
    }

    #[test]
    fn mbank_missing_timestamp_is_tolerated() {
        let n = MbankParser
            .parse("Пополнение +10.00 KGS")
            .expect("must parse without a date");
        assert!(n.occurred_at.is_none());
        assert_eq!(n.amount, dec!(10.00));
    }

    // ── registry ─────────────────────────────────────────────────────────────

    #[test]
    fn default_registry_knows_mbank() {
        let registry = BankRegistry::default_registry();
        let parser = registry.get(Bank::Mbank).expect("mbank must be registered");
        assert_eq!(parser.bank(), Bank::Mbank);
    }
}
