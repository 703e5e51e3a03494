//! The per-session orchestration loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use switchboard_agents::{AgentDefinition, AgentRegistry};
use switchboard_core::{
    QueryRequest, Result, SessionOutcome, SwitchboardError, ToolDescriptor, ToolOutcome, TurnKind,
};
use switchboard_mcp::ToolCatalog;
use switchboard_metrics::{TimerGuard, TimingRecorder, OP_SESSION};
use switchboard_provider::{CompletionRequest, ModelAction, ModelProvider, ToolCallRequest};

use crate::transcript::Transcript;

/// Per-session bounds. The step budget caps dispatch cycles (tool turns and
/// hand-off attempts); the message limit bounds the inbound query, checked
/// once at the session entry point.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub step_budget: u32,
    pub message_limit: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            step_budget: 10,
            message_limit: 2000,
        }
    }
}

/// Drives one query at a time: ask the model, dispatch what it asked for,
/// repeat until a final answer or a hard stop. Single-threaded per session;
/// any number of sessions may share one runner since all shared state lives
/// in the catalog and registry.
pub struct SessionRunner {
    provider: Arc<dyn ModelProvider>,
    catalog: Arc<ToolCatalog>,
    registry: Arc<AgentRegistry>,
    metrics: Arc<TimingRecorder>,
    limits: SessionLimits,
}

impl SessionRunner {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        catalog: Arc<ToolCatalog>,
        registry: Arc<AgentRegistry>,
        metrics: Arc<TimingRecorder>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            provider,
            catalog,
            registry,
            metrics,
            limits,
        }
    }

    /// Run one session to completion without external cancellation.
    pub async fn run(&self, request: QueryRequest) -> Result<SessionOutcome> {
        let (_keep_alive, cancel) = watch::channel(false);
        self.run_with_cancel(request, cancel).await
    }

    /// Run one session, stopping between steps once `cancel` flips to true.
    /// An in-flight tool invocation is left to finish and its result is
    /// discarded along with the session.
    #[instrument(skip(self, request, cancel))]
    pub async fn run_with_cancel(
        &self,
        request: QueryRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<SessionOutcome> {
        let _timer = TimerGuard::start(&self.metrics, OP_SESSION);
        let started = Instant::now();
        let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);

        if request.message.chars().count() > self.limits.message_limit {
            return Err(SwitchboardError::Config(format!(
                "message exceeds the {}-character limit",
                self.limits.message_limit
            )));
        }

        let mut agent = self.registry.starting_agent(request.agent.as_deref())?;
        let mut transcript = Transcript::new();
        transcript.append(TurnKind::Instructions {
            agent: agent.name.clone(),
            text: agent.instructions.clone(),
        });
        transcript.append(TurnKind::User {
            text: request.message.clone(),
        });

        info!("Session {} started with agent '{}'", request_id, agent.name);
        let mut steps_used: u32 = 0;

        loop {
            if *cancel.borrow() {
                info!(
                    "Session {} cancelled after {} steps",
                    request_id, steps_used
                );
                return Err(SwitchboardError::Cancelled);
            }

            let completion = CompletionRequest {
                messages: transcript.flatten(),
                tools: self.permitted_tools(&agent).await,
                handoff_targets: agent.handoff_targets.clone(),
            };

            // Provider transport failure propagates untouched: fatal.
            let action = self.provider.complete(completion).await?;

            match action {
                ModelAction::Final { text } => {
                    transcript.append(TurnKind::Assistant { text: text.clone() });
                    info!(
                        "Session {} complete: agent '{}', {} steps",
                        request_id, agent.name, steps_used
                    );
                    return Ok(SessionOutcome {
                        response: text,
                        active_agent: agent.name.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        steps_used,
                        request_id,
                    });
                }
                ModelAction::ToolCalls(calls) => {
                    self.charge_step(&mut steps_used)?;
                    self.dispatch_tool_calls(&agent, calls, &mut transcript)
                        .await?;
                }
                ModelAction::Handoff { target } => {
                    self.charge_step(&mut steps_used)?;
                    agent = self.apply_handoff(agent, &target, &mut transcript)?;
                }
            }
        }
    }

    /// Every dispatch cycle consumes one step; the budget admits exactly
    /// `step_budget` of them before the session fails.
    fn charge_step(&self, steps_used: &mut u32) -> Result<()> {
        if *steps_used >= self.limits.step_budget {
            warn!("Step budget of {} exhausted", self.limits.step_budget);
            return Err(SwitchboardError::StepBudgetExceeded(self.limits.step_budget));
        }
        *steps_used += 1;
        Ok(())
    }

    /// The catalog snapshot restricted to servers the active agent may use.
    /// Recomputed every thinking step, so servers that degrade mid-session
    /// stop being advertised.
    async fn permitted_tools(&self, agent: &AgentDefinition) -> Vec<ToolDescriptor> {
        self.catalog
            .list_all()
            .await
            .into_iter()
            .filter(|descriptor| agent.permits_server(&descriptor.server))
            .collect()
    }

    /// Execute one batch of tool calls strictly in request order. Every
    /// call gets a result turn; failures become error payloads the model
    /// can react to rather than aborting the session.
    async fn dispatch_tool_calls(
        &self,
        agent: &AgentDefinition,
        calls: Vec<ToolCallRequest>,
        transcript: &mut Transcript,
    ) -> Result<()> {
        for call in calls {
            transcript.append(TurnKind::ToolCall {
                request_id: call.id.clone(),
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let outcome = match self.invoke_checked(agent, &call.name, call.arguments).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_session_fatal() => return Err(err),
                Err(err) => {
                    debug!(
                        "Tool '{}' failed ({}); feeding the error back",
                        call.name, err
                    );
                    ToolOutcome::Error {
                        message: err.to_string(),
                    }
                }
            };

            transcript.append(TurnKind::ToolResult {
                request_id: call.id,
                tool: call.name,
                outcome,
            });
        }
        Ok(())
    }

    /// Resolve the tool through the catalog, then hold it against the
    /// active agent's server allow-list before invoking.
    async fn invoke_checked(
        &self,
        agent: &AgentDefinition,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome> {
        let server = self.catalog.resolve(tool).await?;
        if !agent.permits_server(&server) {
            return Err(SwitchboardError::ToolNotPermitted {
                tool: tool.to_string(),
                agent: agent.name.clone(),
            });
        }
        self.catalog.invoke(&server, tool, arguments).await
    }

    /// A permitted hand-off switches the active agent and appends the new
    /// agent's instructions; the transcript itself is carried forward
    /// unmodified. A denied one is recorded and the agent stays put.
    fn apply_handoff(
        &self,
        current: Arc<AgentDefinition>,
        target: &str,
        transcript: &mut Transcript,
    ) -> Result<Arc<AgentDefinition>> {
        if !current.permits_handoff(target) {
            warn!("Hand-off from '{}' to '{}' denied", current.name, target);
            transcript.append(TurnKind::HandoffDenied {
                from: current.name.clone(),
                to: target.to_string(),
            });
            return Ok(current);
        }

        // The hand-off graph is validated at startup, so this lookup only
        // fails if that validation was skipped.
        let next = self.registry.get(target)?;
        info!("Hand-off from '{}' to '{}'", current.name, next.name);
        transcript.append(TurnKind::Handoff {
            from: current.name.clone(),
            to: next.name.clone(),
        });
        transcript.append(TurnKind::Instructions {
            agent: next.name.clone(),
            text: next.instructions.clone(),
        });
        Ok(next)
    }
}
