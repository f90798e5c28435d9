// Action-polling agent loop
//
// A staff message either carries a named action (a button postback) or
// free text. Actions are dispatched to the automation backend and the run
// is polled on a fixed schedule:
//
//   DISPATCHED -> POLLING(1..=max_attempts) -> DONE | EXHAUSTED
//
// Every wait between polls is cancellable. Exhaustion is not an error: the
// caller gets a "still processing" reply and may hand the run to
// `follow_up`, which keeps polling in the background and publishes the
// eventual reply on the event bus.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{ActionRequest, ActionRun, AgentInput, AgentReply, ConversationContext, RunStatus};
use crate::bus::{EventBus, PublishReport};
use crate::error::{DashboardError, Result};
use crate::events::{DashboardEvent, AGENT_REPLY};
use crate::intents;
use crate::traits::{AutomationBackend, IntentClassifier};

pub const DEFAULT_POLL_ATTEMPTS: u32 = 6;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Fixed polling schedule: `max_attempts` lookups, each preceded by `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Worst-case time spent polling one run
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Where an action run currently is
#[derive(Debug, Clone, PartialEq)]
pub enum RunPhase {
    Dispatched(ActionRun),
    Polling { run: ActionRun, attempt: u32 },
    Done { run: ActionRun, status: RunStatus },
    Exhausted(ActionRun),
}

/// Terminal result of polling one run
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { intent: String, result: Value },
    Exhausted,
    Cancelled,
}

/// Reply plus the run still pending, if polling ran out of attempts
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurn {
    pub reply: AgentReply,
    pub pending: Option<ActionRun>,
}

pub struct ActionAgent {
    backend: Arc<dyn AutomationBackend>,
    classifier: Arc<dyn IntentClassifier>,
    policy: PollPolicy,
}

impl ActionAgent {
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        classifier: Arc<dyn IntentClassifier>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            backend,
            classifier,
            policy,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Answer a chat input with a message and suggested actions
    pub async fn handle(&self, input: AgentInput, ctx: &ConversationContext) -> Result<AgentReply> {
        let turn = self
            .handle_with_cancel(input, ctx, &CancellationToken::new())
            .await?;
        Ok(turn.reply)
    }

    /// Same as `handle`, but stops waiting as soon as `cancel` fires
    pub async fn handle_with_cancel(
        &self,
        input: AgentInput,
        ctx: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<AgentTurn> {
        if let Some(action) = input.action.filter(|a| !a.trim().is_empty()) {
            let request = ActionRequest {
                name: action,
                args: input.args.unwrap_or(Value::Null),
                tenant_id: ctx.tenant_id.clone(),
                session_id: ctx.session_id.clone(),
            };
            return self.run_action(request, cancel).await;
        }

        let text = input
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or(DashboardError::MissingInput)?;
        let intent = self.classifier.classify(&text).await?;
        debug!(session_id = %ctx.session_id, intent = %intent, "Classified message");

        Ok(AgentTurn {
            reply: intents::translate(&intent, &Value::Null),
            pending: None,
        })
    }

    async fn run_action(
        &self,
        request: ActionRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentTurn> {
        let run = self.backend.dispatch(&request).await?;
        info!(
            session_id = %request.session_id,
            action = %request.name,
            run = %run,
            "Dispatched action"
        );

        match self.poll(&run, &self.policy, cancel).await? {
            PollOutcome::Completed { intent, result } => Ok(AgentTurn {
                reply: intents::translate(&intent, &result),
                pending: None,
            }),
            PollOutcome::Exhausted => {
                info!(run = %run, attempts = self.policy.max_attempts, "Action still processing after polling budget");
                Ok(AgentTurn {
                    reply: intents::still_processing(),
                    pending: Some(run),
                })
            }
            PollOutcome::Cancelled => Err(DashboardError::Cancelled),
        }
    }

    /// Drive one run through its phases until it is done, exhausted or
    /// cancelled. A failed lookup uses up its attempt; the run may still
    /// finish on a later one.
    pub async fn poll(
        &self,
        run: &ActionRun,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome> {
        let mut phase = RunPhase::Dispatched(run.clone());
        loop {
            phase = match phase {
                RunPhase::Dispatched(run) => RunPhase::Polling { run, attempt: 1 },
                RunPhase::Polling { run, attempt } if attempt > policy.max_attempts => {
                    RunPhase::Exhausted(run)
                }
                RunPhase::Polling { run, attempt } => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(run = %run, attempt, "Polling cancelled");
                            return Ok(PollOutcome::Cancelled);
                        }
                        _ = tokio::time::sleep(policy.interval) => {}
                    }

                    match self.backend.status(&run).await {
                        Ok(status) if status.done => RunPhase::Done { run, status },
                        Ok(_) => {
                            debug!(run = %run, attempt, "Action not done yet");
                            RunPhase::Polling {
                                run,
                                attempt: attempt + 1,
                            }
                        }
                        Err(e) => {
                            warn!(run = %run, attempt, error = %e, "Status lookup failed");
                            RunPhase::Polling {
                                run,
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                RunPhase::Done { status, .. } => {
                    return Ok(PollOutcome::Completed {
                        intent: status.intent.unwrap_or_else(|| intents::UNKNOWN.to_string()),
                        result: status.result.unwrap_or(Value::Null),
                    });
                }
                RunPhase::Exhausted(_) => return Ok(PollOutcome::Exhausted),
            };
        }
    }

    /// Keep polling a run that outlived the request and publish the reply
    /// on the session channel once it completes.
    pub async fn follow_up(
        &self,
        run: ActionRun,
        ctx: ConversationContext,
        bus: Arc<EventBus>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Result<Option<PublishReport>> {
        match self.poll(&run, &policy, &cancel).await? {
            PollOutcome::Completed { intent, result } => {
                let reply = intents::translate(&intent, &result);
                let payload = json!({
                    "run": run,
                    "intent": intent,
                    "reply": reply,
                });
                let report = bus
                    .publish(DashboardEvent::new(
                        ctx.tenant_id,
                        ctx.session_id,
                        AGENT_REPLY,
                        payload,
                    ))
                    .await?;
                info!(run = %run, delivered = report.delivered(), "Published follow-up reply");
                Ok(Some(report))
            }
            PollOutcome::Exhausted => {
                warn!(run = %run, "Follow-up gave up waiting for action");
                Ok(None)
            }
            PollOutcome::Cancelled => Ok(None),
        }
    }
}
