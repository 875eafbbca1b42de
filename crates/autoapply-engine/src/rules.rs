//! Rule storage: the `automations` table.

use autoapply_db::entities::{automations, users};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::config::{DEFAULT_DAILY_LIMIT, EngineConfig};
use crate::error::{EngineError, Result};
use crate::ledger;
use crate::like::contains_ci;
use crate::matching::MatchCriteria;
use crate::types::{NewRule, RulePatch, RuleStatus};

const DEFAULT_NAME: &str = "Untitled automation";

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub target_titles: Option<String>,
    pub locations: Option<String>,
    pub daily_limit: u32,
    /// Advisory only; matching ignores it.
    pub platforms: Vec<String>,
    pub cover_letter_template: Option<String>,
    pub status: RuleStatus,
    pub total_applied: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn criteria(&self) -> MatchCriteria {
        MatchCriteria::parse(self.target_titles.as_deref(), self.locations.as_deref())
    }
}

impl From<automations::Model> for Rule {
    fn from(m: automations::Model) -> Self {
        let status = RuleStatus::parse(&m.status).unwrap_or_else(|| {
            tracing::warn!(rule_id = %m.id, status = %m.status, "unknown rule status, treating as paused");
            RuleStatus::Paused
        });
        Self {
            id: m.id,
            owner_id: m.user_id,
            name: m.name,
            target_titles: m.target_titles,
            locations: m.locations,
            daily_limit: u32::try_from(m.daily_limit)
                .ok()
                .filter(|v| *v >= 1)
                .unwrap_or(DEFAULT_DAILY_LIMIT),
            platforms: serde_json::from_value(m.platforms).unwrap_or_default(),
            cover_letter_template: m.cover_letter_template,
            status,
            total_applied: u64::try_from(m.total_applied).unwrap_or(0),
            created_at: m.created_at.with_timezone(&Utc),
            updated_at: m.updated_at.with_timezone(&Utc),
        }
    }
}

/// A rule together with its owner's identity, for admin listings.
#[derive(Debug, Clone)]
pub struct AdminRule {
    pub rule: Rule,
    pub owner_email: Option<String>,
    pub owner_name: Option<String>,
}

fn validate_daily_limit(cfg: &EngineConfig, value: i32) -> Result<i32> {
    let max = i32::try_from(cfg.max_daily_limit).unwrap_or(i32::MAX);
    if !(1..=max).contains(&value) {
        return Err(EngineError::InvalidConfiguration(format!(
            "daily_limit must be between 1 and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn platforms_json(platforms: Vec<String>) -> serde_json::Value {
    serde_json::Value::from(platforms)
}

pub async fn count_for_user<C>(conn: &C, owner_id: Uuid) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    automations::Entity::find()
        .filter(automations::Column::UserId.eq(owner_id))
        .count(conn)
        .await
}

/// New rules always start paused.
pub async fn create<C>(conn: &C, cfg: &EngineConfig, owner_id: Uuid, input: NewRule, now: DateTime<Utc>) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let daily_limit = match input.daily_limit {
        Some(v) => validate_daily_limit(cfg, v)?,
        None => i32::try_from(cfg.default_daily_limit).unwrap_or(1).max(1),
    };

    let existing = count_for_user(conn, owner_id).await?;
    if existing >= u64::from(cfg.max_automations_per_user) {
        return Err(EngineError::TooManyAutomations {
            max: cfg.max_automations_per_user,
        });
    }

    let name = input
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());
    let at: DateTimeWithTimeZone = now.into();
    let model = automations::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(owner_id),
        name: Set(name),
        target_titles: Set(input.target_titles),
        locations: Set(input.locations),
        daily_limit: Set(daily_limit),
        platforms: Set(platforms_json(input.platforms)),
        cover_letter_template: Set(input.cover_letter_template),
        status: Set(RuleStatus::Paused.as_str().to_string()),
        total_applied: Set(0),
        created_at: Set(at),
        updated_at: Set(at),
    };
    let created = model.insert(conn).await?;
    tracing::info!(rule_id = %created.id, %owner_id, "automation created");
    Ok(created.into())
}

pub async fn list_for_user<C>(conn: &C, owner_id: Uuid) -> Result<Vec<Rule>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = automations::Entity::find()
        .filter(automations::Column::UserId.eq(owner_id))
        .order_by_desc(automations::Column::CreatedAt)
        .all(conn)
        .await?;
    Ok(rows.into_iter().map(Rule::from).collect())
}

pub async fn get_for_user<C>(conn: &C, rule_id: Uuid, owner_id: Uuid) -> Result<Option<Rule>, DbErr>
where
    C: ConnectionTrait,
{
    Ok(find_model(conn, rule_id, Some(owner_id)).await?.map(Rule::from))
}

pub async fn get_any<C>(conn: &C, rule_id: Uuid) -> Result<Option<Rule>, DbErr>
where
    C: ConnectionTrait,
{
    Ok(find_model(conn, rule_id, None).await?.map(Rule::from))
}

async fn find_model<C>(conn: &C, rule_id: Uuid, owner_id: Option<Uuid>) -> Result<Option<automations::Model>, DbErr>
where
    C: ConnectionTrait,
{
    let mut query = automations::Entity::find_by_id(rule_id);
    if let Some(owner_id) = owner_id {
        query = query.filter(automations::Column::UserId.eq(owner_id));
    }
    query.one(conn).await
}

async fn apply_patch<C>(
    conn: &C,
    cfg: &EngineConfig,
    model: automations::Model,
    patch: RulePatch,
    now: DateTime<Utc>,
) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let mut active: automations::ActiveModel = model.into();
    if let Some(v) = patch.daily_limit {
        active.daily_limit = Set(validate_daily_limit(cfg, v)?);
    }
    if let Some(v) = patch.name {
        active.name = Set(v);
    }
    if let Some(v) = patch.target_titles {
        active.target_titles = Set(Some(v));
    }
    if let Some(v) = patch.locations {
        active.locations = Set(Some(v));
    }
    if let Some(v) = patch.platforms {
        active.platforms = Set(platforms_json(v));
    }
    if let Some(v) = patch.cover_letter_template {
        active.cover_letter_template = Set(Some(v));
    }
    if let Some(v) = patch.status {
        active.status = Set(v.as_str().to_string());
    }
    active.updated_at = Set(now.into());
    Ok(active.update(conn).await?.into())
}

pub async fn update<C>(
    conn: &C,
    cfg: &EngineConfig,
    rule_id: Uuid,
    owner_id: Uuid,
    patch: RulePatch,
    now: DateTime<Utc>,
) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let model = find_model(conn, rule_id, Some(owner_id))
        .await?
        .ok_or(EngineError::NotFound)?;
    apply_patch(conn, cfg, model, patch, now).await
}

pub async fn update_any<C>(conn: &C, cfg: &EngineConfig, rule_id: Uuid, patch: RulePatch, now: DateTime<Utc>) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let model = find_model(conn, rule_id, None)
        .await?
        .ok_or(EngineError::NotFound)?;
    apply_patch(conn, cfg, model, patch, now).await
}

async fn write_status<C>(conn: &C, model: automations::Model, status: RuleStatus, now: DateTime<Utc>) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let mut active: automations::ActiveModel = model.into();
    active.status = Set(status.as_str().to_string());
    active.updated_at = Set(now.into());
    let updated: Rule = active.update(conn).await?.into();
    tracing::info!(rule_id = %updated.id, status = status.as_str(), "automation status changed");
    Ok(updated)
}

/// Pause or resume.
pub async fn set_status<C>(conn: &C, rule_id: Uuid, owner_id: Uuid, status: RuleStatus, now: DateTime<Utc>) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let model = find_model(conn, rule_id, Some(owner_id))
        .await?
        .ok_or(EngineError::NotFound)?;
    write_status(conn, model, status, now).await
}

pub async fn set_status_any<C>(conn: &C, rule_id: Uuid, status: RuleStatus, now: DateTime<Utc>) -> Result<Rule>
where
    C: ConnectionTrait,
{
    let model = find_model(conn, rule_id, None)
        .await?
        .ok_or(EngineError::NotFound)?;
    write_status(conn, model, status, now).await
}

/// Every rule with a given status, across all owners. Used by the poller.
pub async fn list_by_status<C>(conn: &C, status: RuleStatus) -> Result<Vec<Rule>, DbErr>
where
    C: ConnectionTrait,
{
    let rows = automations::Entity::find()
        .filter(automations::Column::Status.eq(status.as_str()))
        .order_by_asc(automations::Column::CreatedAt)
        .all(conn)
        .await?;
    Ok(rows.into_iter().map(Rule::from).collect())
}

/// All rules, newest first, optionally narrowed by a case-insensitive search
/// over rule name, owner email and owner name.
pub async fn list_all<C>(conn: &C, search: Option<&str>) -> Result<Vec<AdminRule>, DbErr>
where
    C: ConnectionTrait,
{
    let mut query = automations::Entity::find().find_also_related(users::Entity);
    if let Some(term) = search.map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(
            Condition::any()
                .add(contains_ci((automations::Entity, automations::Column::Name), term))
                .add(contains_ci((users::Entity, users::Column::Email), term))
                .add(contains_ci((users::Entity, users::Column::FullName), term)),
        );
    }
    let rows = query
        .order_by_desc(automations::Column::CreatedAt)
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(rule, owner)| AdminRule {
            rule: rule.into(),
            owner_email: owner.as_ref().map(|u| u.email.clone()),
            owner_name: owner.and_then(|u| u.full_name),
        })
        .collect())
}

/// Adds `count` to the cumulative counter in a single statement.
pub async fn increment_total_applied<C>(conn: &C, rule_id: Uuid, count: u64, now: DateTime<Utc>) -> Result<()>
where
    C: ConnectionTrait,
{
    let count = i64::try_from(count).unwrap_or(i64::MAX);
    let at: DateTimeWithTimeZone = now.into();
    let res = automations::Entity::update_many()
        .col_expr(
            automations::Column::TotalApplied,
            Expr::col(automations::Column::TotalApplied).add(count),
        )
        .col_expr(automations::Column::UpdatedAt, Expr::value(at))
        .filter(automations::Column::Id.eq(rule_id))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(EngineError::NotFound);
    }
    Ok(())
}

/// Deletes the rule. Ledger entries it produced are kept with their rule
/// reference cleared.
pub async fn delete<C>(conn: &C, rule_id: Uuid, owner_id: Uuid) -> Result<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = conn.begin().await?;
    find_model(&txn, rule_id, Some(owner_id))
        .await?
        .ok_or(EngineError::NotFound)?;
    let detached = ledger::clear_rule_reference(&txn, rule_id).await?;
    automations::Entity::delete_by_id(rule_id).exec(&txn).await?;
    txn.commit().await?;
    tracing::info!(%rule_id, %owner_id, detached, "automation deleted");
    Ok(())
}
