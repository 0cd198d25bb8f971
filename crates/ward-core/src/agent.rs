// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ward_config::{AgentLimits, ContextConfig};
use ward_model::capability::describe_tools;
use ward_model::{LlmError, LlmGateway, ToolSchema};
use ward_tools::{is_empty_result, ToolError, ToolRegistry};

use crate::{
    context,
    events::{emit, AgentEvent, EventSender},
    prompts::{query_mentions_imaging, system_prompt, PromptRole},
    schemas::{
        answer_schema, is_done_schema, optimized_args_schema, task_list_schema, Answer, IsDone,
        OptimizedArgs, Task, TaskList,
    },
    session::Session,
};

/// Preview length for tool results in `tool_execution` events.
const EVENT_RESULT_PREVIEW_CHARS: usize = 500;
/// Preview length for the failed result inside a retry hint.
const RETRY_RESULT_PREVIEW_CHARS: usize = 300;

/// Single-use hint describing the previous empty-handed call, threaded into
/// the next action-selection prompt and then discarded.
struct RetryContext {
    tool_name: String,
    args: Value,
    result_preview: String,
}

impl RetryContext {
    fn render(&self) -> String {
        format!(
            "\n\n**RETRY CONTEXT**: The previous tool call returned no data.\n\
             - Previous tool: {}\n\
             - Previous args: {}\n\
             - Previous result: {}\n\n\
             Please try a different approach - adjust parameters, use broader search \
             terms, or try a different tool.",
            self.tool_name, self.args, self.result_preview
        )
    }
}

/// The scheduler: plans tasks, drives the act → dispatch → validate loop
/// per task, checks the overall goal, and synthesizes the final answer.
///
/// `run()` is the sole entry and exit: no error of any kind crosses it;
/// every failure path degrades into the answer text or an event.
pub struct Agent {
    gateway: Arc<LlmGateway>,
    tools: Arc<ToolRegistry>,
    limits: AgentLimits,
    context_cfg: ContextConfig,
    events: EventSender,
    cancel: CancellationToken,
    session: Session,
    /// Cached model-facing tool schemas and their prompt catalogue.
    tool_schemas: Vec<ToolSchema>,
    catalogue: String,
    has_images: bool,
}

impl Agent {
    pub fn new(
        gateway: Arc<LlmGateway>,
        tools: Arc<ToolRegistry>,
        limits: AgentLimits,
        context_cfg: ContextConfig,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        let tool_schemas: Vec<ToolSchema> = tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();
        let catalogue = describe_tools(&tool_schemas);
        let session = Session::new(gateway.model());
        debug!(
            model = gateway.model(),
            native_tools = gateway.capability().native_tools,
            "agent initialized"
        );
        Self {
            gateway,
            tools,
            limits,
            context_cfg,
            events,
            cancel,
            session,
            tool_schemas,
            catalogue,
            has_images: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process one clinical query end to end and return the answer text.
    pub async fn run(&mut self, query: &str) -> String {
        emit(
            &self.events,
            AgentEvent::Start { message: query.to_string(), model: self.session.model.clone() },
        )
        .await;
        self.has_images = query_mentions_imaging(query);

        self.session.tasks = self.plan(query).await;
        if self.session.tasks.is_empty() {
            debug!("empty plan, answering without tools");
            return self.finish(query).await;
        }
        emit(
            &self.events,
            AgentEvent::Log {
                message: format!("planned {} task(s)", self.session.tasks.len()),
            },
        )
        .await;

        'tasks: while let Some(idx) = self.session.next_open_task() {
            if self.session.step_count >= self.limits.max_steps {
                warn!("global max steps reached - stopping to prevent a runaway loop");
                break;
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let task = self.session.tasks[idx].clone();
            emit(&self.events, AgentEvent::TaskStart { task: task.description.clone() }).await;

            let task_start = Instant::now();
            let task_deadline = Duration::from_secs(self.limits.task_timeout_secs);
            let mut per_task_steps = 0u32;
            let mut retry_count = 0u32;
            let mut retry_context: Option<RetryContext> = None;
            let mut task_step_outputs: Vec<String> = Vec::new();

            'steps: while per_task_steps < self.limits.max_steps_per_task {
                if task_start.elapsed() > task_deadline {
                    warn!(task = %task.description, "task timeout - moving on");
                    emit(
                        &self.events,
                        AgentEvent::Log {
                            message: format!(
                                "task timed out after {}s - moving to the next task",
                                self.limits.task_timeout_secs
                            ),
                        },
                    )
                    .await;
                    self.session.abandon_task(task.id);
                    break 'steps;
                }
                if self.session.step_count >= self.limits.max_steps {
                    break 'steps;
                }
                if self.cancel.is_cancelled() {
                    break 'tasks;
                }

                let history = self.composed_history().await;

                let reply = self
                    .ask_for_actions(&task.description, &history, retry_context.take())
                    .await;
                let reply = match reply {
                    Err(LlmError::Cancelled) => break 'tasks,
                    Err(e) => {
                        self.session.agent_error_count += 1;
                        warn!(
                            count = self.session.agent_error_count,
                            budget = self.limits.max_agent_errors,
                            "agent error: {e}"
                        );
                        emit(
                            &self.events,
                            AgentEvent::Log {
                                message: format!(
                                    "agent error {}/{}: {e}",
                                    self.session.agent_error_count, self.limits.max_agent_errors
                                ),
                            },
                        )
                        .await;
                        if self.session.agent_error_count >= self.limits.max_agent_errors {
                            warn!("max agent errors reached - forcing task completion");
                            self.complete_task(idx).await;
                            break 'steps;
                        }
                        continue 'steps;
                    }
                    Ok(reply) => reply,
                };
                self.session.agent_error_count = 0;

                if reply.tool_calls.is_empty() {
                    debug!("no tool calls returned - marking task as done");
                    self.complete_task(idx).await;
                    break 'steps;
                }

                for invocation in reply.tool_calls {
                    if self.session.step_count >= self.limits.max_steps {
                        break;
                    }

                    let args = if self.gateway.capability().skip_arg_optimization {
                        as_arg_map(invocation.args)
                    } else {
                        self.optimize_args(&invocation.name, invocation.args, &task.description)
                            .await
                    };

                    let signature = format!("{}|{}", invocation.name, Value::Object(args.clone()));
                    if self.session.push_action(signature) {
                        warn!("detected repeating action - aborting to avoid a loop");
                        emit(
                            &self.events,
                            AgentEvent::Log {
                                message: "detected repeating action - aborting to avoid a loop"
                                    .to_string(),
                            },
                        )
                        .await;
                        self.complete_task(idx).await;
                        break 'steps;
                    }

                    let exec = self.tools.execute(&invocation.name, &args).await;
                    self.session.step_count += 1;
                    per_task_steps += 1;

                    match exec {
                        Ok(result) => {
                            emit(
                                &self.events,
                                AgentEvent::ToolExecution {
                                    tool: invocation.name.clone(),
                                    args: Value::Object(args.clone()),
                                    result: preview(&result, EVENT_RESULT_PREVIEW_CHARS),
                                },
                            )
                            .await;

                            if is_empty_result(&result)
                                && retry_count < self.limits.max_retries_on_no_data
                            {
                                retry_count += 1;
                                debug!(
                                    retry = retry_count,
                                    budget = self.limits.max_retries_on_no_data,
                                    tool = %invocation.name,
                                    "tool returned no data - retrying with hint"
                                );
                                emit(
                                    &self.events,
                                    AgentEvent::Log {
                                        message: format!(
                                            "tool returned no data - retry {retry_count}/{}",
                                            self.limits.max_retries_on_no_data
                                        ),
                                    },
                                )
                                .await;
                                retry_context = Some(RetryContext {
                                    tool_name: invocation.name.clone(),
                                    args: Value::Object(args.clone()),
                                    result_preview: preview(&result, RETRY_RESULT_PREVIEW_CHARS),
                                });
                                continue;
                            }

                            let line = context::format_output(
                                &invocation.name,
                                &Value::Object(args.clone()),
                                &result,
                                self.context_cfg.output_char_cap,
                            );
                            self.session.record_output(line.clone());
                            task_step_outputs.push(line);
                        }
                        Err(e) => {
                            let line = match &e {
                                ToolError::UnknownTool(_) => e.to_string(),
                                other => format!(
                                    "Error from {} with args {}: {other}",
                                    invocation.name,
                                    Value::Object(args.clone())
                                ),
                            };
                            warn!(tool = %invocation.name, "tool failed: {line}");
                            emit(
                                &self.events,
                                AgentEvent::ToolExecution {
                                    tool: invocation.name.clone(),
                                    args: Value::Object(args.clone()),
                                    result: line.clone(),
                                },
                            )
                            .await;
                            self.session.record_output(line.clone());
                            task_step_outputs.push(line);
                        }
                    }
                }

                if self
                    .ask_if_done(&task.description, &task_step_outputs.join("\n"))
                    .await
                {
                    self.complete_task(idx).await;
                    break 'steps;
                }
            }

            // Meta-validation runs only for tasks the task-level validator
            // (or a forced path) marked done; it can end the session early
            // but never overrides a task verdict.
            if self.session.tasks[idx].done && self.is_goal_achieved(query).await {
                debug!("goal achieved - generating summary");
                break 'tasks;
            }
        }

        self.finish(query).await
    }

    // ─── Planning ────────────────────────────────────────────────────────────

    async fn plan(&self, query: &str) -> Vec<Task> {
        let sys = self.prompt_for(PromptRole::Plan);
        let prompt = format!(
            "Given the clinical query: \"{query}\",\n\
             create a list of tasks to be completed.\n\
             Example: {{\"tasks\": [{{\"id\": 1, \"description\": \"some task\", \"done\": false}}]}}"
        );
        match self
            .gateway
            .structured::<TaskList>(&sys, &prompt, task_list_schema())
            .await
        {
            Ok(list) => normalize_task_ids(list.tasks),
            Err(LlmError::Cancelled) => Vec::new(),
            Err(e) => {
                warn!("planning failed: {e}");
                vec![Task { id: 1, description: query.to_string(), done: false }]
            }
        }
    }

    // ─── Action selection ────────────────────────────────────────────────────

    async fn ask_for_actions(
        &self,
        task_desc: &str,
        history: &str,
        retry_context: Option<RetryContext>,
    ) -> Result<ward_model::ActionReply, LlmError> {
        let mut prompt = format!(
            "We are working on: \"{task_desc}\".\n\
             Here is a history of tool outputs from the session so far: {history}\n\n\
             Based on the task and the outputs, what should be the next step?"
        );
        if let Some(rc) = retry_context {
            prompt.push_str(&rc.render());
        }
        let sys = self.prompt_for(PromptRole::Act);
        self.gateway
            .select_action(&sys, &prompt, &self.tool_schemas, Vec::new())
            .await
    }

    /// One extra model round trip to make the tool call use every relevant
    /// filtering parameter.  Failures keep the original arguments.
    async fn optimize_args(
        &self,
        tool_name: &str,
        initial_args: Value,
        task_desc: &str,
    ) -> Map<String, Value> {
        let initial = as_arg_map(initial_args);
        let Some(schema) = self.tool_schemas.iter().find(|s| s.name == tool_name) else {
            // Unknown tool; dispatch will report it.
            return initial;
        };
        let prompt = format!(
            "Task: \"{task_desc}\"\n\
             Tool: {tool_name}\n\
             Tool Description: {}\n\
             Tool Parameters: {}\n\
             Initial Arguments: {}\n\n\
             Review the task and optimize the arguments to ensure all relevant parameters \
             are used correctly. Pay special attention to filtering parameters that would \
             narrow results to match the task.",
            schema.description,
            schema.parameters,
            Value::Object(initial.clone()),
        );
        let sys = self.prompt_for(PromptRole::OptimizeArgs);
        match self
            .gateway
            .structured::<OptimizedArgs>(&sys, &prompt, optimized_args_schema())
            .await
        {
            Ok(optimized) if !optimized.arguments.is_empty() => optimized.arguments,
            Ok(_) => initial,
            Err(e) => {
                debug!("argument optimization failed, keeping originals: {e}");
                initial
            }
        }
    }

    // ─── Validation ──────────────────────────────────────────────────────────

    async fn ask_if_done(&self, task_desc: &str, recent_results: &str) -> bool {
        let prompt = format!(
            "We were trying to complete the task: \"{task_desc}\".\n\
             Here is a history of tool outputs from the session so far: {recent_results}\n\n\
             Is the task done?"
        );
        let sys = self.prompt_for(PromptRole::TaskDone);
        match self
            .gateway
            .structured::<IsDone>(&sys, &prompt, is_done_schema())
            .await
        {
            Ok(resp) => resp.done,
            Err(e) => {
                debug!("task validation failed: {e}");
                false
            }
        }
    }

    async fn is_goal_achieved(&self, query: &str) -> bool {
        let task_plan: Vec<String> = self
            .session
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let status = if t.done { "COMPLETED" } else { "NOT COMPLETED" };
                format!("{}. {status}: {}", i + 1, t.description)
            })
            .collect();
        let history = self.composed_history().await;
        let prompt = format!(
            "Original clinical query: \"{query}\"\n\
             Task Plan:\n{}\n\n\
             Data and results collected from tools so far:\n{history}\n\n\
             Based on the task plan and data above, is the original clinical query \
             sufficiently answered?",
            task_plan.join("\n")
        );
        let sys = self.prompt_for(PromptRole::GoalDone);
        match self
            .gateway
            .structured::<IsDone>(&sys, &prompt, is_done_schema())
            .await
        {
            Ok(resp) => resp.done,
            Err(e) => {
                debug!("meta-validation failed: {e}");
                false
            }
        }
    }

    // ─── Answer ──────────────────────────────────────────────────────────────

    async fn finish(&mut self, query: &str) -> String {
        let answer = self.generate_answer(query).await;
        emit(&self.events, AgentEvent::Answer { answer: answer.clone() }).await;
        emit(&self.events, AgentEvent::Complete { answer: answer.clone() }).await;
        answer
    }

    async fn generate_answer(&self, query: &str) -> String {
        let history = if self.session.outputs.is_empty() {
            "No clinical data was collected.".to_string()
        } else {
            self.composed_history().await
        };
        let prompt = format!(
            "Original clinical query: \"{query}\"\n\n\
             Clinical data and results collected:\n{history}\n\n\
             Provide the comprehensive clinical analysis now. Be thorough and complete \
             every applicable section; do not truncate or stop mid-analysis."
        );
        let sys = self.prompt_for(PromptRole::Answer);
        match self
            .gateway
            .structured::<Answer>(&sys, &prompt, answer_schema())
            .await
        {
            Ok(answer) => answer.answer,
            Err(e) => {
                warn!("answer generation failed: {e}");
                emit(
                    &self.events,
                    AgentEvent::Error { message: format!("answer generation failed: {e}") },
                )
                .await;
                format!(
                    "The clinical summary could not be generated ({e}). \
                     Data collected during the session:\n{history}"
                )
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    fn prompt_for(&self, role: PromptRole) -> String {
        system_prompt(role, self.gateway.capability(), self.has_images, &self.catalogue)
    }

    fn history_budget(&self) -> usize {
        (self.gateway.capability().context_window as usize)
            .saturating_sub(self.context_cfg.headroom_tokens)
    }

    /// History composed within budget, with a utilization warning event
    /// when the estimate crosses the configured threshold.
    async fn composed_history(&self) -> String {
        let budget = self.history_budget();
        let stats = context::stats(
            &self.session.outputs,
            budget,
            self.context_cfg.warn_threshold,
        );
        if stats.at_risk {
            emit(
                &self.events,
                AgentEvent::Log {
                    message: format!(
                        "context utilization {}%: {} of {} tokens",
                        (stats.utilization * 100.0) as u32,
                        stats.estimated_tokens,
                        stats.budget_tokens
                    ),
                },
            )
            .await;
        }
        context::compose(&self.session.outputs, budget)
    }

    async fn complete_task(&mut self, idx: usize) {
        self.session.tasks[idx].done = true;
        emit(
            &self.events,
            AgentEvent::TaskComplete { task: self.session.tasks[idx].description.clone() },
        )
        .await;
    }
}

/// Coerce model-provided arguments into an argument map; anything that is
/// not an object becomes empty rather than failing the dispatch.
fn as_arg_map(args: Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Enforce unique task ids without disturbing order; models occasionally
/// number every task `1`.
fn normalize_task_ids(mut tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = std::collections::HashSet::new();
    let duplicated = tasks.iter().any(|t| !seen.insert(t.id));
    if duplicated {
        for (i, task) in tasks.iter_mut().enumerate() {
            task.id = i as u32 + 1;
        }
    }
    tasks
}

fn preview(result: &Value, cap: usize) -> String {
    let text = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= cap {
        text
    } else {
        text.chars().take(cap).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
