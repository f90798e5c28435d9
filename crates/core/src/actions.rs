// Action and agent DTOs
//
// An action run is one business operation dispatched to the automation
// backend and tracked by kind + id until a status lookup reports completion.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Domain an action run belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Booking,
    Payment,
    Checkin,
    Invoice,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Booking => "booking",
            ActionKind::Payment => "payment",
            ActionKind::Checkin => "checkin",
            ActionKind::Invoice => "invoice",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking" => Ok(ActionKind::Booking),
            "payment" => Ok(ActionKind::Payment),
            "checkin" => Ok(ActionKind::Checkin),
            "invoice" => Ok(ActionKind::Invoice),
            other => Err(format!("unknown action kind: {}", other)),
        }
    }
}

/// Handle returned by the automation backend at dispatch time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ActionRun {
    pub kind: ActionKind,
    pub id: String,
}

impl ActionRun {
    pub fn new(kind: ActionKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ActionRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Status lookup answer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct RunStatus {
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl RunStatus {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn completed(intent: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            done: true,
            intent: Some(intent.into()),
            result: Some(result),
        }
    }
}

/// Action dispatch request sent to the automation backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    /// Action name, e.g. `payment.cash`
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub tenant_id: String,
    pub session_id: String,
}

/// Resolved identity of the staff member talking to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub tenant_id: String,
    pub session_id: String,
}

impl ConversationContext {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// Chat input: either free text or a named action (postback)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AgentInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

impl AgentInput {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn action(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            action: Some(name.into()),
            args: Some(args),
            ..Default::default()
        }
    }
}

/// Suggested next-step button kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    Postback,
    OpenUrl,
}

/// Suggested next action rendered as a button by the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SuggestedAction {
    #[serde(rename = "type")]
    pub kind: SuggestionType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SuggestedAction {
    pub fn postback(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind: SuggestionType::Postback,
            label: label.into(),
            action: Some(action.into()),
            args: None,
            url: None,
        }
    }

    pub fn open_url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: SuggestionType::OpenUrl,
            label: label.into(),
            action: None,
            args: None,
            url: Some(url.into()),
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = Some(args);
        self
    }
}

/// Agent answer: status message plus zero or more suggested actions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AgentReply {
    pub message: String,
    pub actions: Vec<SuggestedAction>,
}

impl AgentReply {
    pub fn new(message: impl Into<String>, actions: Vec<SuggestedAction>) -> Self {
        Self {
            message: message.into(),
            actions,
        }
    }

    pub fn text(message: impl Into<String>) -> Self {
        Self::new(message, Vec::new())
    }
}
