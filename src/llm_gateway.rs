//! LLM gateway: turns a goal plus a UI snapshot into one proposed action.
//!
//! Routing: primary high-fidelity provider first; a safety-filter refusal on
//! vision-grounded planning retries once against the fallback provider;
//! privacy mode routes purely textual steps to the local provider instead of
//! any network one. All routing lives in `choose_provider`, testable without
//! a network.

use crate::config::{env_bool, env_u64};
use crate::context_pruning::{ChatMessage, ContextPruneConfig};
use crate::error::AgentError;
use crate::schema::{AgentAction, RetryContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a desktop automation planner.
You receive a GOAL and the CURRENT UI TREE (accessibility snapshot with element ids).
Decide exactly ONE next action and output ONLY a JSON object.

Available actions:
1. Snapshot:   { "action": "ui.snapshot", "payload": { "scope": "window" } }
2. Click:      { "action": "ui.click", "payload": { "element_id": "<id from the tree>" } }
3. Move mouse: { "action": "mouse.move", "payload": { "x": 100.0, "y": 200.0 } }
4. Type:       { "action": "keyboard.type", "payload": { "text": "..." } }
5. Shell:      { "action": "shell.exec", "payload": { "command": "..." } }
6. Delete:     { "action": "file.delete", "payload": { "path": "..." } }
7. Done:       { "action": "done", "message": "..." }
8. Fail:       { "action": "fail", "reason": "..." }

Rules:
- Prefer ui.click on an element id over typing or shell workarounds.
- If a RETRY_CONTEXT line is present, the previous proposal failed; do not
  repeat it unchanged.
- Output nothing but the JSON object."#;

/// One planning outcome: an action to gate and execute, or a terminal claim.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    Act(AgentAction),
    Done { message: Option<String> },
    Fail { reason: String },
}

impl PlanStep {
    pub fn is_observation_only(&self) -> bool {
        matches!(self, PlanStep::Act(action) if action.is_observation())
    }
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub goal: String,
    pub snapshot: Value,
    pub history: Vec<ChatMessage>,
    pub retry: Option<RetryContext>,
    /// Vision-grounded planning (screenshot or rich UI context). Drives the
    /// safety-filter fallback route and excludes the local provider.
    pub vision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Primary,
    Fallback,
    Local,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub fallback_url: Option<String>,
    pub fallback_key: Option<String>,
    pub local_url: Option<String>,
    pub privacy_mode: bool,
    pub timeout: Duration,
    pub prune: ContextPruneConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").ok(),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            fallback_url: env::var("FALLBACK_API_URL").ok(),
            fallback_key: env::var("FALLBACK_API_KEY").ok(),
            local_url: env::var("LOCAL_LLM_URL").ok(),
            privacy_mode: env_bool("PRIVACY_MODE", false),
            timeout: Duration::from_secs(env_u64("LLM_TIMEOUT_SECS", 60)),
            prune: ContextPruneConfig::from_env(),
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback_url.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local_url.is_some()
    }
}

/// Routing decision, independent of the network calls.
pub fn choose_provider(
    request: &PlanRequest,
    last_failure: Option<&AgentError>,
    config: &GatewayConfig,
) -> Provider {
    if let Some(AgentError::ProviderRefused(_)) = last_failure {
        if request.vision && config.has_fallback() {
            return Provider::Fallback;
        }
    }
    if config.privacy_mode && !request.vision && config.has_local() {
        return Provider::Local;
    }
    Provider::Primary
}

#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<PlanStep, AgentError>;
}

pub struct LlmGateway {
    client: Client,
    config: GatewayConfig,
}

impl LlmGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .no_proxy()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::ExecutionFailed(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, AgentError> {
        Self::new(GatewayConfig::from_env())
    }

    async fn call(&self, provider: Provider, request: &PlanRequest) -> Result<PlanStep, AgentError> {
        let content = match provider {
            Provider::Primary => {
                let key = self.config.api_key.as_deref().ok_or_else(|| {
                    AgentError::ExecutionFailed("OPENAI_API_KEY not configured".to_string())
                })?;
                self.chat_completion(
                    "https://api.openai.com/v1/chat/completions",
                    key,
                    &self.config.model,
                    request,
                )
                .await?
            }
            Provider::Fallback => {
                let url = self.config.fallback_url.as_deref().ok_or_else(|| {
                    AgentError::ExecutionFailed("fallback provider not configured".to_string())
                })?;
                let key = self.config.fallback_key.as_deref().unwrap_or_default();
                self.chat_completion(url, key, &self.config.model, request)
                    .await?
            }
            Provider::Local => self.local_generate(request).await?,
        };
        parse_plan(&content)
    }

    async fn chat_completion(
        &self,
        url: &str,
        api_key: &str,
        model: &str,
        request: &PlanRequest,
    ) -> Result<String, AgentError> {
        let mut messages = vec![json!({ "role": "system", "content": PLANNER_SYSTEM_PROMPT })];
        for m in self.config.prune.prune(&request.history) {
            messages.push(json!({ "role": m.role, "content": m.content }));
        }
        messages.push(json!({ "role": "user", "content": user_message(request) }));

        let body = json!({
            "model": model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "temperature": 0.0,
        });

        let response = self.post_with_retry(url, api_key, &body).await?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ExecutionFailed(format!(
                "provider error: {text}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ExecutionFailed(format!("provider body: {e}")))?;

        // Safety filter: the provider declined to plan against this content.
        if let Some(refusal) = body["choices"][0]["message"]["refusal"].as_str() {
            warn!(refusal, "provider refused planning request");
            return Err(AgentError::ProviderRefused(refusal.to_string()));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::ExecutionFailed("no content in provider response".to_string()))
    }

    async fn local_generate(&self, request: &PlanRequest) -> Result<String, AgentError> {
        let url = self.config.local_url.as_deref().ok_or_else(|| {
            AgentError::ExecutionFailed("local provider not configured".to_string())
        })?;
        let prompt = format!("{}\n\n{}", PLANNER_SYSTEM_PROMPT, user_message(request));
        let body = json!({
            "model": env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "llama3".to_string()),
            "prompt": prompt,
            "stream": false,
            "format": "json",
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::ExecutionFailed(format!(
                "local provider error: {text}"
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ExecutionFailed(format!("local provider body: {e}")))?;
        body["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::ExecutionFailed("no response from local provider".to_string()))
    }

    /// Retry on 429/5xx with exponential backoff; client errors return as-is.
    async fn post_with_retry(
        &self,
        url: &str,
        api_key: &str,
        body: &Value,
    ) -> Result<reqwest::Response, AgentError> {
        let max_retries = 3;
        let mut attempt = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            attempt += 1;
            match self
                .client
                .post(url)
                .header("Authorization", format!("Bearer {api_key}"))
                .json(body)
                .send()
                .await
            {
                Ok(resp) => {
                    let retryable = resp.status().is_server_error()
                        || resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    if !retryable || attempt > max_retries {
                        return Ok(resp);
                    }
                }
                Err(e) => {
                    if attempt > max_retries {
                        return Err(map_reqwest_error(e));
                    }
                    warn!(error = %e, attempt, "provider network error, backing off");
                }
            }
            sleep(backoff).await;
            backoff *= 2;
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout("llm provider".to_string())
    } else {
        AgentError::ExecutionFailed(format!("provider request failed: {e}"))
    }
}

fn user_message(request: &PlanRequest) -> String {
    let mut msg = format!(
        "GOAL: {}\n\nCURRENT UI TREE:\n{}",
        request.goal,
        serde_json::to_string_pretty(&request.snapshot).unwrap_or_default()
    );
    if let Some(retry) = &request.retry {
        msg.push_str("\n\n");
        msg.push_str(&retry.as_prompt_line());
    }
    msg
}

/// Parse the model output into a `PlanStep`. Tolerates markdown fences and
/// one level of `{"action": {..}}` nesting.
pub fn parse_plan(content: &str) -> Result<PlanStep, AgentError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let mut value: Value = serde_json::from_str(cleaned)?;
    if value["action"].is_object() {
        value = value["action"].clone();
    }

    match value["action"].as_str() {
        Some("done") => Ok(PlanStep::Done {
            message: value["message"].as_str().map(str::to_string),
        }),
        Some("fail") => Ok(PlanStep::Fail {
            reason: value["reason"]
                .as_str()
                .unwrap_or("planner gave up")
                .to_string(),
        }),
        _ => {
            let action: AgentAction = serde_json::from_value(value)?;
            Ok(PlanStep::Act(action))
        }
    }
}

#[async_trait]
impl PlannerClient for LlmGateway {
    async fn plan(&self, request: &PlanRequest) -> Result<PlanStep, AgentError> {
        let provider = choose_provider(request, None, &self.config);
        match self.call(provider, request).await {
            Ok(step) => Ok(step),
            Err(refusal @ AgentError::ProviderRefused(_)) => {
                let rerouted = choose_provider(request, Some(&refusal), &self.config);
                if rerouted == provider {
                    return Err(refusal);
                }
                info!("primary provider refused; retrying once on fallback");
                self.call(rerouted, request).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        GatewayConfig {
            api_key: Some("k".to_string()),
            model: "gpt-4o".to_string(),
            fallback_url: Some("https://sandbox.example/v1/chat/completions".to_string()),
            fallback_key: None,
            local_url: Some("http://localhost:11434/api/generate".to_string()),
            privacy_mode: false,
            timeout: Duration::from_secs(5),
            prune: ContextPruneConfig::default(),
        }
    }

    fn request(vision: bool) -> PlanRequest {
        PlanRequest {
            goal: "open notes".to_string(),
            snapshot: json!({}),
            history: vec![],
            retry: None,
            vision,
        }
    }

    #[test]
    fn primary_is_the_default_route() {
        assert_eq!(
            choose_provider(&request(true), None, &config()),
            Provider::Primary
        );
    }

    #[test]
    fn refusal_on_vision_routes_to_fallback_once() {
        let refusal = AgentError::ProviderRefused("safety".to_string());
        assert_eq!(
            choose_provider(&request(true), Some(&refusal), &config()),
            Provider::Fallback
        );
        // No fallback configured: stay on primary (and surface the refusal).
        let mut cfg = config();
        cfg.fallback_url = None;
        assert_eq!(
            choose_provider(&request(true), Some(&refusal), &cfg),
            Provider::Primary
        );
    }

    #[test]
    fn refusal_on_text_does_not_reroute() {
        let refusal = AgentError::ProviderRefused("safety".to_string());
        assert_eq!(
            choose_provider(&request(false), Some(&refusal), &config()),
            Provider::Primary
        );
    }

    #[test]
    fn privacy_mode_routes_text_to_local() {
        let mut cfg = config();
        cfg.privacy_mode = true;
        assert_eq!(choose_provider(&request(false), None, &cfg), Provider::Local);
        // Vision steps never go to the local provider.
        assert_eq!(choose_provider(&request(true), None, &cfg), Provider::Primary);
    }

    #[test]
    fn parse_plan_handles_actions_and_terminals() {
        let step = parse_plan(r#"{"action":"ui.click","payload":{"element_id":"e1"}}"#).unwrap();
        assert_eq!(
            step,
            PlanStep::Act(AgentAction::UiClick {
                element_id: "e1".to_string()
            })
        );

        let done = parse_plan(r#"{"action":"done","message":"all set"}"#).unwrap();
        assert_eq!(
            done,
            PlanStep::Done {
                message: Some("all set".to_string())
            }
        );

        let fail = parse_plan(r#"{"action":"fail","reason":"stuck"}"#).unwrap();
        assert!(matches!(fail, PlanStep::Fail { .. }));
    }

    #[test]
    fn parse_plan_strips_markdown_fences() {
        let step = parse_plan("```json\n{\"action\":\"ui.snapshot\",\"payload\":{\"scope\":null}}\n```").unwrap();
        assert!(step.is_observation_only());
    }

    #[test]
    fn parse_plan_rejects_unknown_action() {
        assert!(parse_plan(r#"{"action":"ui.teleport","payload":{}}"#).is_err());
    }
}
