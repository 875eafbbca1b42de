use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use autoapply_db::entities::user_jobs;
use autoapply_engine::rules::{self, AdminRule, Rule};
use autoapply_engine::types::{LedgerPatch, NewRule, RulePatch};
use autoapply_engine::{Engine, EngineError, LedgerStatus, RuleStatus, RunOutcome, ledger, quota};
use rspc::{Procedure, ProcedureError, ResolverError, Router};
use specta::Type;
use uuid::Uuid;

#[derive(Clone, Debug, serde::Serialize, Type)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
    pub is_admin: bool,
}

// Request context for rspc procedures.
#[derive(Clone)]
pub struct Ctx {
    pub engine: Engine,
    pub user: Option<AuthUser>,
    pub request_id: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub field_errors: BTreeMap<String, String>,
    pub hint: Option<String>,
}

impl rspc::Error for ApiError {
    fn into_procedure_error(self) -> ProcedureError {
        // The payload is the whole error; no source chain leaves the process.
        ResolverError::new(self, Option::<std::io::Error>::None).into()
    }
}

fn api_error(ctx: &Ctx, code: &str, message: impl Into<String>) -> ApiError {
    ApiError {
        code: code.to_string(),
        message: message.into(),
        request_id: ctx.request_id.clone(),
        field_errors: BTreeMap::new(),
        hint: None,
    }
}

fn api_error_from_engine(ctx: &Ctx, action: &str, err: EngineError) -> ApiError {
    match err {
        EngineError::NotFound => api_error(ctx, "not_found", format!("{action}: not found")),
        EngineError::InvalidConfiguration(msg) => {
            let mut fields = BTreeMap::new();
            if msg.starts_with("daily_limit") {
                fields.insert("daily_limit".to_string(), msg.clone());
            }
            ApiError {
                field_errors: fields,
                ..api_error(ctx, "invalid_param", msg)
            }
        }
        EngineError::TooManyAutomations { max } => ApiError {
            hint: Some("Delete an existing automation to create a new one.".to_string()),
            ..api_error(ctx, "limit_reached", format!("Maximum automations ({max}) reached."))
        },
        EngineError::Storage(e) => {
            tracing::error!(request_id = %ctx.request_id, action, error = %e, "storage failure");
            api_error(ctx, "db_error", format!("{action}: storage unavailable"))
        }
    }
}

fn is_read_only() -> bool {
    matches!(
        std::env::var("AUTOAPPLY_READ_ONLY")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn ensure_writable(ctx: &Ctx) -> Result<(), ApiError> {
    if is_read_only() {
        return Err(api_error(ctx, "read_only", "control is in read-only mode"));
    }
    Ok(())
}

// Sliding-window limiter for mutations, keyed by owner.
struct MutationLimiter {
    window: Duration,
    max_hits: usize,
    hits: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

fn env_clamped<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

impl MutationLimiter {
    fn new(window: Duration, max_hits: usize) -> Self {
        Self {
            window,
            max_hits,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn global() -> &'static MutationLimiter {
        static LIMITER: OnceLock<MutationLimiter> = OnceLock::new();
        LIMITER.get_or_init(|| {
            let max_hits = env_clamped("AUTOAPPLY_RATE_LIMIT_MAX_HITS", 30usize, 1, 10_000);
            let window_ms = env_clamped("AUTOAPPLY_RATE_LIMIT_WINDOW_MS", 10_000u64, 1000, 600_000);
            MutationLimiter::new(Duration::from_millis(window_ms), max_hits)
        })
    }

    fn allow(&self, owner: Uuid, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let recent = hits.entry(owner).or_default();
        recent.retain(|t| now.duration_since(*t) <= self.window);
        if recent.len() >= self.max_hits {
            return false;
        }
        recent.push_back(now);
        true
    }
}

fn enforce_rate_limit(ctx: &Ctx, owner: Uuid) -> Result<(), ApiError> {
    if !MutationLimiter::global().allow(owner, Instant::now()) {
        return Err(api_error(ctx, "rate_limited", "too many requests"));
    }
    Ok(())
}

fn require_owner(ctx: &Ctx) -> Result<Uuid, ApiError> {
    ctx.user
        .as_ref()
        .and_then(|u| Uuid::parse_str(&u.user_id).ok())
        .ok_or_else(|| api_error(ctx, "unauthorized", "unauthorized"))
}

fn require_admin(ctx: &Ctx) -> Result<&AuthUser, ApiError> {
    require_owner(ctx)?;
    match ctx.user.as_ref() {
        Some(user) if user.is_admin => Ok(user),
        _ => Err(api_error(ctx, "forbidden", "forbidden")),
    }
}

fn parse_id(ctx: &Ctx, field: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), "must be a UUID".to_string());
        ApiError {
            field_errors: fields,
            ..api_error(ctx, "invalid_param", format!("invalid {field}"))
        }
    })
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct PingResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct AutomationDto {
    pub id: String,
    pub name: String,
    pub target_titles: Option<String>,
    pub locations: Option<String>,
    pub daily_limit: u32,
    pub platforms: Vec<String>,
    pub cover_letter_template: Option<String>,
    pub status: RuleStatus,
    pub total_applied: String,
    pub applications_today: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct AdminAutomationDto {
    pub automation: AutomationDto,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct LedgerEntryDto {
    pub id: String,
    pub job_id: String,
    pub automation_id: Option<String>,
    pub status: String,
    pub applied_at: Option<String>,
    pub notes: Option<String>,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize, Type)]
pub struct DeleteOutput {
    pub ok: bool,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct AutomationIdInput {
    pub automation_id: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct UpdateAutomationInput {
    pub automation_id: String,
    pub patch: RulePatch,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct AdminListInput {
    pub search: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct LedgerListInput {
    pub status: Option<LedgerStatus>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct LedgerSaveInput {
    pub job_id: String,
    pub status: Option<LedgerStatus>,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct LedgerEntryInput {
    pub entry_id: String,
}

#[derive(Debug, Clone, serde::Deserialize, Type)]
pub struct LedgerUpdateInput {
    pub entry_id: String,
    pub patch: LedgerPatch,
}

fn map_rule(rule: Rule, applications_today: u32) -> AutomationDto {
    AutomationDto {
        id: rule.id.to_string(),
        name: rule.name,
        target_titles: rule.target_titles,
        locations: rule.locations,
        daily_limit: rule.daily_limit,
        platforms: rule.platforms,
        cover_letter_template: rule.cover_letter_template,
        status: rule.status,
        total_applied: rule.total_applied.to_string(),
        applications_today,
        created_at: rule.created_at.to_rfc3339(),
        updated_at: rule.updated_at.to_rfc3339(),
    }
}

fn map_entry(e: user_jobs::Model) -> LedgerEntryDto {
    LedgerEntryDto {
        id: e.id.to_string(),
        job_id: e.job_id.to_string(),
        automation_id: e.automation_id.map(|id| id.to_string()),
        status: e.status,
        applied_at: e.applied_at.map(|t| t.to_rfc3339()),
        notes: e.notes,
        resume_path: e.resume_path,
        cover_letter_path: e.cover_letter_path,
        created_at: e.created_at.to_rfc3339(),
        updated_at: e.updated_at.to_rfc3339(),
    }
}

async fn rule_dto(ctx: &Ctx, action: &str, rule: Rule) -> Result<AutomationDto, ApiError> {
    let today = quota::submitted_today(ctx.engine.db(), rule.id, chrono::Utc::now())
        .await
        .map_err(|e| api_error_from_engine(ctx, action, e.into()))?;
    Ok(map_rule(rule, today))
}

const LEDGER_PAGE_DEFAULT: u32 = 10;
const LEDGER_PAGE_MAX: u32 = 100;

pub fn router() -> Router<Ctx> {
    // NOTE: Procedure keys are nested segments; the runtime request path
    // flattens to "segment.procedure".
    let control = Router::new().procedure(
        "ping",
        Procedure::builder::<ApiError>().query(|_, _: ()| async move {
            Ok(PingResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }),
    );

    let automation = Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, _: ()| async move {
                let owner = require_owner(&ctx)?;
                let rows = rules::list_for_user(ctx.engine.db(), owner)
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "automation.list", e.into()))?;
                let mut out = Vec::with_capacity(rows.len());
                for rule in rows {
                    out.push(rule_dto(&ctx, "automation.list", rule).await?);
                }
                Ok(out)
            }),
        )
        .procedure(
            "get",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: AutomationIdInput| async move {
                let owner = require_owner(&ctx)?;
                let id = parse_id(&ctx, "automation_id", &input.automation_id)?;
                let rule = rules::get_for_user(ctx.engine.db(), id, owner)
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "automation.get", e.into()))?
                    .ok_or_else(|| api_error(&ctx, "not_found", "Automation not found"))?;
                rule_dto(&ctx, "automation.get", rule).await
            }),
        )
        .procedure(
            "create",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: NewRule| async move {
                ensure_writable(&ctx)?;
                let owner = require_owner(&ctx)?;
                enforce_rate_limit(&ctx, owner)?;
                let rule = rules::create(
                    ctx.engine.db(),
                    ctx.engine.config(),
                    owner,
                    input,
                    chrono::Utc::now(),
                )
                .await
                .map_err(|e| api_error_from_engine(&ctx, "automation.create", e))?;
                rule_dto(&ctx, "automation.create", rule).await
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateAutomationInput| async move {
                    ensure_writable(&ctx)?;
                    let owner = require_owner(&ctx)?;
                    enforce_rate_limit(&ctx, owner)?;
                    let id = parse_id(&ctx, "automation_id", &input.automation_id)?;
                    let rule = rules::update(
                        ctx.engine.db(),
                        ctx.engine.config(),
                        id,
                        owner,
                        input.patch,
                        chrono::Utc::now(),
                    )
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "automation.update", e))?;
                    rule_dto(&ctx, "automation.update", rule).await
                },
            ),
        )
        .procedure(
            "run",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    ensure_writable(&ctx)?;
                    let owner = require_owner(&ctx)?;
                    enforce_rate_limit(&ctx, owner)?;
                    let id = parse_id(&ctx, "automation_id", &input.automation_id)?;
                    let outcome: RunOutcome = ctx
                        .engine
                        .run_once(id, owner)
                        .await
                        .map_err(|e| api_error_from_engine(&ctx, "automation.run", e))?;
                    Ok(outcome)
                },
            ),
        )
        .procedure(
            "pause",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    set_own_status(&ctx, "automation.pause", &input, RuleStatus::Paused).await
                },
            ),
        )
        .procedure(
            "resume",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    set_own_status(&ctx, "automation.resume", &input, RuleStatus::Running).await
                },
            ),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    ensure_writable(&ctx)?;
                    let owner = require_owner(&ctx)?;
                    enforce_rate_limit(&ctx, owner)?;
                    let id = parse_id(&ctx, "automation_id", &input.automation_id)?;
                    rules::delete(ctx.engine.db(), id, owner)
                        .await
                        .map_err(|e| api_error_from_engine(&ctx, "automation.delete", e))?;
                    Ok(DeleteOutput { ok: true })
                },
            ),
        );

    let admin_automation = Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: AdminListInput| async move {
                require_admin(&ctx)?;
                let rows = rules::list_all(ctx.engine.db(), input.search.as_deref())
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "admin.automation.list", e.into()))?;
                let mut out = Vec::with_capacity(rows.len());
                for AdminRule {
                    rule,
                    owner_email,
                    owner_name,
                } in rows
                {
                    let owner_id = rule.owner_id.to_string();
                    out.push(AdminAutomationDto {
                        automation: rule_dto(&ctx, "admin.automation.list", rule).await?,
                        owner_id,
                        owner_email,
                        owner_name,
                    });
                }
                Ok(out)
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: UpdateAutomationInput| async move {
                    ensure_writable(&ctx)?;
                    let admin = require_admin(&ctx)?;
                    let id = parse_id(&ctx, "automation_id", &input.automation_id)?;
                    let rule = rules::update_any(
                        ctx.engine.db(),
                        ctx.engine.config(),
                        id,
                        input.patch,
                        chrono::Utc::now(),
                    )
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "admin.automation.update", e))?;
                    tracing::info!(request_id = %ctx.request_id, admin = %admin.username, rule_id = %id, "admin updated automation");
                    rule_dto(&ctx, "admin.automation.update", rule).await
                },
            ),
        )
        .procedure(
            "pause",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    set_any_status(&ctx, "admin.automation.pause", &input, RuleStatus::Paused).await
                },
            ),
        )
        .procedure(
            "resume",
            Procedure::builder::<ApiError>().mutation(
                |ctx: Ctx, input: AutomationIdInput| async move {
                    set_any_status(&ctx, "admin.automation.resume", &input, RuleStatus::Running).await
                },
            ),
        );

    let ledger_router = Router::new()
        .procedure(
            "list",
            Procedure::builder::<ApiError>().query(|ctx: Ctx, input: LedgerListInput| async move {
                let owner = require_owner(&ctx)?;
                let limit = input
                    .limit
                    .unwrap_or(LEDGER_PAGE_DEFAULT)
                    .clamp(1, LEDGER_PAGE_MAX);
                let rows = ledger::list_for_user(
                    ctx.engine.db(),
                    owner,
                    input.status,
                    u64::from(input.offset.unwrap_or(0)),
                    u64::from(limit),
                )
                .await
                .map_err(|e| api_error_from_engine(&ctx, "ledger.list", e.into()))?;
                Ok(rows.into_iter().map(map_entry).collect::<Vec<_>>())
            }),
        )
        .procedure(
            "save",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: LedgerSaveInput| async move {
                ensure_writable(&ctx)?;
                let owner = require_owner(&ctx)?;
                enforce_rate_limit(&ctx, owner)?;
                let job_id = parse_id(&ctx, "job_id", &input.job_id)?;
                let entry = ledger::save_job(ctx.engine.db(), owner, job_id, input.status, chrono::Utc::now())
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "ledger.save", e))?;
                Ok(map_entry(entry))
            }),
        )
        .procedure(
            "submit",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: LedgerEntryInput| async move {
                ensure_writable(&ctx)?;
                let owner = require_owner(&ctx)?;
                enforce_rate_limit(&ctx, owner)?;
                let entry_id = parse_id(&ctx, "entry_id", &input.entry_id)?;
                let entry = ledger::submit_entry(ctx.engine.db(), entry_id, owner, chrono::Utc::now())
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "ledger.submit", e))?;
                Ok(map_entry(entry))
            }),
        )
        .procedure(
            "update",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: LedgerUpdateInput| async move {
                ensure_writable(&ctx)?;
                let owner = require_owner(&ctx)?;
                enforce_rate_limit(&ctx, owner)?;
                let entry_id = parse_id(&ctx, "entry_id", &input.entry_id)?;
                let entry = ledger::update_entry(
                    ctx.engine.db(),
                    entry_id,
                    owner,
                    input.patch,
                    chrono::Utc::now(),
                )
                .await
                .map_err(|e| api_error_from_engine(&ctx, "ledger.update", e))?;
                Ok(map_entry(entry))
            }),
        )
        .procedure(
            "delete",
            Procedure::builder::<ApiError>().mutation(|ctx: Ctx, input: LedgerEntryInput| async move {
                ensure_writable(&ctx)?;
                let owner = require_owner(&ctx)?;
                enforce_rate_limit(&ctx, owner)?;
                let entry_id = parse_id(&ctx, "entry_id", &input.entry_id)?;
                let ok = ledger::delete_entry(ctx.engine.db(), entry_id, owner)
                    .await
                    .map_err(|e| api_error_from_engine(&ctx, "ledger.delete", e.into()))?;
                if !ok {
                    return Err(api_error(&ctx, "not_found", "Entry not found"));
                }
                Ok(DeleteOutput { ok })
            }),
        );

    Router::new()
        .nest("control", control)
        .nest("automation", automation)
        .nest("admin", Router::new().nest("automation", admin_automation))
        .nest("ledger", ledger_router)
}

async fn set_own_status(
    ctx: &Ctx,
    action: &str,
    input: &AutomationIdInput,
    status: RuleStatus,
) -> Result<AutomationDto, ApiError> {
    ensure_writable(ctx)?;
    let owner = require_owner(ctx)?;
    enforce_rate_limit(ctx, owner)?;
    let id = parse_id(ctx, "automation_id", &input.automation_id)?;
    let rule = rules::set_status(ctx.engine.db(), id, owner, status, chrono::Utc::now())
        .await
        .map_err(|e| api_error_from_engine(ctx, action, e))?;
    rule_dto(ctx, action, rule).await
}

async fn set_any_status(
    ctx: &Ctx,
    action: &str,
    input: &AutomationIdInput,
    status: RuleStatus,
) -> Result<AutomationDto, ApiError> {
    ensure_writable(ctx)?;
    let admin = require_admin(ctx)?;
    let id = parse_id(ctx, "automation_id", &input.automation_id)?;
    let rule = rules::set_status_any(ctx.engine.db(), id, status, chrono::Utc::now())
        .await
        .map_err(|e| api_error_from_engine(ctx, action, e))?;
    tracing::info!(request_id = %ctx.request_id, admin = %admin.username, rule_id = %id, status = status.as_str(), "admin changed automation status");
    rule_dto(ctx, action, rule).await
}
