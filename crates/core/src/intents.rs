// Intent translation table
//
// Maps an intent tag (from the classifier or from a completed action run)
// to a staff-facing status message and suggested next actions. Everything
// here is pure: same intent + result, same reply.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actions::{AgentReply, SuggestedAction};
use crate::error::Result;
use crate::traits::IntentClassifier;

// Free-text intents
pub const GREETING: &str = "greeting";
pub const BOOKING_CREATE: &str = "booking.create";
pub const PAYMENT_RECORD: &str = "payment.record";
pub const CHECKIN_SCHEDULE: &str = "checkin.schedule";
pub const INVOICE_ISSUE: &str = "invoice.issue";
pub const SUMMARY_TODAY: &str = "summary.today";
pub const UNKNOWN: &str = "unknown";

// Action run outcomes
pub const BOOKING_COMPLETED: &str = "booking.completed";
pub const BOOKING_FAILED: &str = "booking.failed";
pub const PAYMENT_COMPLETED: &str = "payment.completed";
pub const PAYMENT_PENDING: &str = "payment.pending";
pub const CHECKIN_SCHEDULED: &str = "checkin.scheduled";
pub const CHECKIN_COMPLETED: &str = "checkin.completed";
pub const INVOICE_ISSUED: &str = "invoice.issued";
pub const ACTION_FAILED: &str = "action.failed";

// Postback action names
pub const ACTION_PAY_CASH: &str = "payment.cash";
pub const ACTION_PAY_BANK: &str = "payment.bank";
pub const ACTION_NOOP: &str = "noop";

const FALLBACK_MESSAGE: &str =
    "Sorry, I didn't catch that. Try asking me to create a booking, record a payment or issue an invoice.";

const STILL_PROCESSING_MESSAGE: &str =
    "Still processing. I'll post an update here as soon as it finishes.";

/// Reply used when an action run outlives the polling budget
pub fn still_processing() -> AgentReply {
    AgentReply::text(STILL_PROCESSING_MESSAGE)
}

/// Translate an intent and its (optional) result into a reply
pub fn translate(intent: &str, result: &Value) -> AgentReply {
    match intent {
        GREETING => AgentReply::new(
            "Hello! What would you like to do?",
            vec![
                SuggestedAction::postback("New booking", BOOKING_CREATE),
                SuggestedAction::postback("Today's summary", SUMMARY_TODAY),
            ],
        ),
        BOOKING_CREATE => AgentReply::new(
            "Sure, let's create a booking. Choose a room to continue.",
            vec![SuggestedAction::postback("New booking", BOOKING_CREATE)],
        ),
        PAYMENT_RECORD => AgentReply::new(
            "How was the payment made?",
            vec![
                SuggestedAction::postback("Cash", ACTION_PAY_CASH),
                SuggestedAction::postback("Bank transfer", ACTION_PAY_BANK),
            ],
        ),
        CHECKIN_SCHEDULE => AgentReply::new(
            "When is the guest arriving?",
            vec![SuggestedAction::postback("Schedule check-in", CHECKIN_SCHEDULE)],
        ),
        INVOICE_ISSUE => AgentReply::new(
            "Which booking should the invoice be issued for?",
            vec![SuggestedAction::postback("Issue invoice", INVOICE_ISSUE)],
        ),
        SUMMARY_TODAY => AgentReply::text("Today's occupancy and payments are on the dashboard summary."),
        BOOKING_COMPLETED => booking_completed(result),
        BOOKING_FAILED => AgentReply::new(
            format!(
                "The booking could not be completed: {}.",
                text_field(result, "reason")
            ),
            vec![SuggestedAction::postback("Try again", BOOKING_CREATE)],
        ),
        PAYMENT_COMPLETED => payment_completed(result),
        PAYMENT_PENDING => AgentReply::text(format!(
            "A transfer of {} is waiting for verification.",
            amount_field(result, "amount")
        )),
        CHECKIN_SCHEDULED => {
            let booking_id = text_field(result, "booking_id");
            AgentReply::new(
                format!(
                    "Check-in for booking {} is scheduled on {}.",
                    booking_id,
                    text_field(result, "date")
                ),
                vec![SuggestedAction::postback("Issue invoice", INVOICE_ISSUE)
                    .with_args(json!({ "booking_id": booking_id }))],
            )
        }
        CHECKIN_COMPLETED => {
            let booking_id = text_field(result, "booking_id");
            AgentReply::new(
                format!("Guest checked in to room {}.", text_field(result, "room")),
                vec![SuggestedAction::postback("Issue invoice", INVOICE_ISSUE)
                    .with_args(json!({ "booking_id": booking_id }))],
            )
        }
        INVOICE_ISSUED => {
            let mut actions = Vec::new();
            if let Some(url) = result.get("pdf_url").and_then(Value::as_str) {
                actions.push(SuggestedAction::open_url("Open invoice", url));
            }
            AgentReply::new(
                format!(
                    "Invoice {} issued, total {}.",
                    text_field(result, "invoice_no"),
                    amount_field(result, "total")
                ),
                actions,
            )
        }
        ACTION_FAILED => AgentReply::text(format!(
            "That action failed: {}.",
            text_field(result, "error")
        )),
        _ => AgentReply::text(FALLBACK_MESSAGE),
    }
}

fn booking_completed(result: &Value) -> AgentReply {
    let booking_id = text_field(result, "booking_id");
    let amount = result.get("amount_due").cloned().unwrap_or(Value::Null);
    let payment_args = json!({ "booking_id": booking_id, "amount": amount });

    AgentReply::new(
        format!(
            "Booking {} confirmed. Amount due: {}. How will the guest pay?",
            booking_id,
            amount_field(result, "amount_due")
        ),
        vec![
            SuggestedAction::postback("Pay by cash", ACTION_PAY_CASH).with_args(payment_args.clone()),
            SuggestedAction::postback("Bank transfer", ACTION_PAY_BANK).with_args(payment_args),
            SuggestedAction::postback("Schedule check-in", CHECKIN_SCHEDULE)
                .with_args(json!({ "booking_id": booking_id })),
            SuggestedAction::postback("Later", ACTION_NOOP),
        ],
    )
}

fn payment_completed(result: &Value) -> AgentReply {
    let booking_id = text_field(result, "booking_id");
    let mut actions = Vec::new();
    if let Some(url) = result.get("receipt_url").and_then(Value::as_str) {
        actions.push(SuggestedAction::open_url("View receipt", url));
    }
    actions.push(
        SuggestedAction::postback("Schedule check-in", CHECKIN_SCHEDULE)
            .with_args(json!({ "booking_id": booking_id })),
    );

    AgentReply::new(
        format!(
            "Payment of {} recorded for booking {}.",
            amount_field(result, "amount"),
            booking_id
        ),
        actions,
    )
}

fn text_field(result: &Value, key: &str) -> String {
    match result.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "-".to_string(),
    }
}

fn amount_field(result: &Value, key: &str) -> String {
    result
        .get(key)
        .and_then(format_amount)
        .unwrap_or_else(|| "-".to_string())
}

/// Render an amount with thousands separators: `1500` → `1,500`,
/// `1234.5` → `1,234.50`. Numeric strings are accepted.
pub fn format_amount(value: &Value) -> Option<String> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }

    let negative = number < 0.0;
    let cents = (number.abs() * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    let fraction = cents % 100;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&whole);
    if fraction != 0 {
        out.push_str(&format!(".{:02}", fraction));
    }
    Some(out)
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// ============================================================================
// KeywordClassifier
// ============================================================================

/// Local keyword classifier; the default when no remote classifier is
/// configured
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> &'static str {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .collect();
        let has = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));

        if has(&["invoice", "invoices", "bill", "billing"]) {
            INVOICE_ISSUE
        } else if has(&["check-in", "checkin", "arrive", "arrival"]) || lower.contains("check in") {
            CHECKIN_SCHEDULE
        } else if has(&["pay", "paid", "payment", "cash", "transfer"]) {
            PAYMENT_RECORD
        } else if has(&["book", "booking", "reserve", "reservation", "room"]) {
            BOOKING_CREATE
        } else if has(&["summary", "today", "occupancy", "report"]) {
            SUMMARY_TODAY
        } else if has(&["hi", "hello", "hey"]) {
            GREETING
        } else {
            UNKNOWN
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<String> {
        Ok(self.classify_text(text).to_string())
    }
}
