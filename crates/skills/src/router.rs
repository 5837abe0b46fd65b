//! Skill router: executes a named skill through the tenant's gateway.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use orchestra_core::{
    config::GatewaySettings,
    text::{preview, PREVIEW_CHARS},
    traits::{SkillCatalog, Tool, TraceStore},
    types::{NewTrace, SkillOutcome, StepType, TenantId, ToolOutput},
    Result,
};
use orchestra_governance::{sanitize_details, track_skill_call, CredentialVault};

use crate::gateway::GatewayClient;
use crate::rate_limit::RateLimiter;

/// Task and agent a skill call is made on behalf of.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    pub task_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
}

pub struct SkillRouter {
    catalog: Arc<dyn SkillCatalog>,
    vault: Arc<CredentialVault>,
    traces: Arc<dyn TraceStore>,
    gateway: GatewayClient,
    limiter: RateLimiter,
    instance_type: String,
}

impl SkillRouter {
    pub fn new(
        catalog: Arc<dyn SkillCatalog>,
        vault: Arc<CredentialVault>,
        traces: Arc<dyn TraceStore>,
        settings: &GatewaySettings,
    ) -> Result<Self> {
        Ok(Self {
            catalog,
            vault,
            traces,
            gateway: GatewayClient::new(Duration::from_secs(settings.request_timeout_secs))?,
            limiter: RateLimiter::new(),
            instance_type: settings.instance_type.clone(),
        })
    }

    pub fn catalog(&self) -> &Arc<dyn SkillCatalog> {
        &self.catalog
    }

    /// Resolve, authorise and invoke a skill. Never returns `Err`; every
    /// failure is folded into `SkillOutcome::Error`.
    #[tracing::instrument(skip(self, payload), fields(tenant_id = %tenant))]
    pub async fn execute(
        &self,
        tenant: TenantId,
        skill_name: &str,
        payload: Value,
        ctx: CallContext,
    ) -> SkillOutcome {
        let instance = match self.catalog.running_instance(tenant, &self.instance_type).await {
            Ok(Some(instance)) => instance,
            Ok(None) => return SkillOutcome::error("No running gateway"),
            Err(e) => return SkillOutcome::error(e.user_message()),
        };

        let config = match self.catalog.get_config(tenant, skill_name).await {
            Ok(Some(config)) => config,
            Ok(None) => return SkillOutcome::error(format!("Skill '{}' is not configured", skill_name)),
            Err(e) => return SkillOutcome::error(e.user_message()),
        };
        if !config.enabled {
            return SkillOutcome::error(format!("Skill '{}' is disabled", skill_name));
        }
        if config.requires_approval {
            tracing::info!(skill = %skill_name, "Skill call held for approval");
            return SkillOutcome::PendingApproval {
                skill_name: skill_name.to_string(),
            };
        }
        if let Some(limit) = config.rate_limit {
            if !self.limiter.try_acquire(tenant, skill_name, limit) {
                tracing::warn!(skill = %skill_name, limit, "Skill rate limit exceeded");
                return SkillOutcome::error(format!(
                    "Rate limit exceeded for skill '{}' ({} calls per minute)",
                    skill_name, limit
                ));
            }
        }

        let credentials = match self.vault.retrieve_for_skill(tenant, config.id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::error!(skill = %skill_name, error = %e, "Failed to load skill credentials");
                return SkillOutcome::error(e.user_message());
            }
        };

        let started = Instant::now();
        let result = self
            .gateway
            .execute(&instance.internal_url, skill_name, &payload, &credentials)
            .await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(result) => SkillOutcome::Success { result },
            Err(error) => SkillOutcome::Error { error },
        };
        track_skill_call(skill_name, outcome.status(), elapsed.as_secs_f64());
        self.log_call(tenant, skill_name, &payload, &outcome, elapsed, ctx).await;
        outcome
    }

    async fn log_call(
        &self,
        tenant: TenantId,
        skill_name: &str,
        payload: &Value,
        outcome: &SkillOutcome,
        elapsed: Duration,
        ctx: CallContext,
    ) {
        let Some(task_id) = ctx.task_id else {
            return;
        };

        let mut details = json!({
            "skill": skill_name,
            "status": outcome.status(),
            "payload_preview": preview(&payload.to_string(), PREVIEW_CHARS),
        });
        match outcome {
            SkillOutcome::Success { result } => {
                details["result_preview"] = json!(preview(&result.to_string(), PREVIEW_CHARS));
            }
            SkillOutcome::Error { error } => details["error"] = json!(error),
            SkillOutcome::PendingApproval { .. } => {}
        }

        let trace = NewTrace::new(task_id, StepType::SkillCall)
            .with_agent(ctx.agent_id)
            .with_details(sanitize_details(details))
            .with_duration_ms(elapsed.as_millis() as u64);
        if let Err(e) = self.traces.append(tenant, trace).await {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to record skill_call trace");
        }
    }
}

/// Exposes one gateway skill to the tool-use loop.
pub struct GatewaySkillTool {
    router: Arc<SkillRouter>,
    tenant: TenantId,
    skill_name: String,
    description: String,
    ctx: CallContext,
}

impl GatewaySkillTool {
    pub fn new(router: Arc<SkillRouter>, tenant: TenantId, skill_name: impl Into<String>, ctx: CallContext) -> Self {
        let skill_name = skill_name.into();
        Self {
            description: format!("Run the '{}' skill through the workspace gateway", skill_name),
            router,
            tenant,
            skill_name,
            ctx,
        }
    }
}

#[async_trait]
impl Tool for GatewaySkillTool {
    fn name(&self) -> &str {
        &self.skill_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "description": "Skill-specific payload forwarded to the gateway",
            "additionalProperties": true
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let outcome = self
            .router
            .execute(self.tenant, &self.skill_name, args, self.ctx)
            .await;
        Ok(match outcome {
            SkillOutcome::Success { result } => ToolOutput::json(&result),
            SkillOutcome::PendingApproval { skill_name } => ToolOutput::text(format!(
                "The '{}' skill requires approval before it can run. The request has been held.",
                skill_name
            )),
            SkillOutcome::Error { error } => ToolOutput::error(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use orchestra_core::types::{InstanceStatus, SkillConfig, TenantInstance};
    use orchestra_governance::MasterKey;
    use orchestra_store::{InMemoryCredentialStore, InMemorySkillCatalog, InMemoryTraceStore};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        router: SkillRouter,
        catalog: Arc<InMemorySkillCatalog>,
        vault: Arc<CredentialVault>,
        traces: Arc<InMemoryTraceStore>,
        tenant: TenantId,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemorySkillCatalog::new());
        let traces = Arc::new(InMemoryTraceStore::new());
        let key = MasterKey::parse(&MasterKey::generate_hex()).unwrap();
        let vault = Arc::new(CredentialVault::with_key(Arc::new(InMemoryCredentialStore::new()), &key));
        let router = SkillRouter::new(
            catalog.clone(),
            vault.clone(),
            traces.clone(),
            &GatewaySettings::default(),
        )
        .unwrap();
        Fixture {
            router,
            catalog,
            vault,
            traces,
            tenant: Uuid::new_v4(),
        }
    }

    async fn spawn_gateway(hits: Arc<AtomicUsize>) -> String {
        let router = Router::new().route(
            "/api/execute",
            post(move |Json(body): Json<Value>| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"sent": true, "skill": body["skill"], "saw_key": body["credentials"]["api_key"]}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn running(f: &Fixture, url: &str) {
        f.catalog
            .upsert_instance(TenantInstance::new(f.tenant, "openclaw", InstanceStatus::Running, url))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_running_gateway() {
        let f = fixture();
        f.catalog
            .upsert_instance(TenantInstance::new(f.tenant, "openclaw", InstanceStatus::Stopped, "http://x"))
            .await
            .unwrap();
        let out = f.router.execute(f.tenant, "gmail", json!({}), CallContext::default()).await;
        assert_eq!(out, SkillOutcome::error("No running gateway"));
    }

    #[tokio::test]
    async fn test_pending_approval_skips_gateway_and_trace() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_gateway(hits.clone()).await;
        running(&f, &url).await;
        f.catalog
            .upsert_config(SkillConfig::new(f.tenant, "gmail").requiring_approval())
            .await
            .unwrap();

        let task = Uuid::new_v4();
        let ctx = CallContext {
            task_id: Some(task),
            agent_id: None,
        };
        let out = f.router.execute(f.tenant, "gmail", json!({"to": "x"}), ctx).await;

        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"status": "pending_approval", "skill_name": "gmail"})
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(f.traces.list(f.tenant, task).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_success_injects_credentials_and_traces_without_them() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_gateway(hits.clone()).await;
        running(&f, &url).await;
        let config = SkillConfig::new(f.tenant, "gmail");
        f.catalog.upsert_config(config.clone()).await.unwrap();
        f.vault
            .store(f.tenant, config.id, "api_key", &SecretString::new("sk-live-123".into()), "api_key")
            .await
            .unwrap();

        let task = Uuid::new_v4();
        let ctx = CallContext {
            task_id: Some(task),
            agent_id: None,
        };
        let out = f.router.execute(f.tenant, "gmail", json!({"to": "x"}), ctx).await;

        match out {
            SkillOutcome::Success { result } => assert_eq!(result["saw_key"], "sk-live-123"),
            other => panic!("unexpected outcome {:?}", other),
        }
        let traces = f.traces.list(f.tenant, task).await.unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].step_type, StepType::SkillCall);
        assert!(!traces[0].details.to_string().contains("sk-live-123"));
    }

    #[tokio::test]
    async fn test_disabled_missing_and_rate_limited() {
        let f = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let url = spawn_gateway(hits.clone()).await;
        running(&f, &url).await;

        let out = f.router.execute(f.tenant, "slack", json!({}), CallContext::default()).await;
        assert_eq!(out.status(), "error");

        f.catalog
            .upsert_config(SkillConfig::new(f.tenant, "slack").disabled())
            .await
            .unwrap();
        let out = f.router.execute(f.tenant, "slack", json!({}), CallContext::default()).await;
        assert_eq!(out.status(), "error");

        f.catalog
            .upsert_config(SkillConfig::new(f.tenant, "crm").with_rate_limit(1))
            .await
            .unwrap();
        let first = f.router.execute(f.tenant, "crm", json!({}), CallContext::default()).await;
        let second = f.router.execute(f.tenant, "crm", json!({}), CallContext::default()).await;
        assert_eq!(first.status(), "success");
        assert_eq!(second.status(), "error");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gateway_tool_maps_outcomes() {
        let f = fixture();
        let tool = GatewaySkillTool::new(Arc::new(f.router), f.tenant, "gmail", CallContext::default());
        assert_eq!(tool.name(), "gmail");
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out, ToolOutput::error("No running gateway"));
    }
}
