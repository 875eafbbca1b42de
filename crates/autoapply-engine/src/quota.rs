use autoapply_db::entities::user_jobs;
use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use crate::types::LedgerStatus;

/// 00:00:00 UTC of the day containing `now`.
///
/// The quota day is always the UTC calendar day, whatever the owner's
/// timezone.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Submitted ledger entries produced by `rule_id` since the start of the UTC
/// day containing `now`. Always reads through to storage.
pub async fn submitted_today<C>(conn: &C, rule_id: Uuid, now: DateTime<Utc>) -> Result<u32, DbErr>
where
    C: ConnectionTrait,
{
    let since: DateTimeWithTimeZone = start_of_utc_day(now).into();
    let n = user_jobs::Entity::find()
        .filter(user_jobs::Column::AutomationId.eq(rule_id))
        .filter(user_jobs::Column::Status.eq(LedgerStatus::Submitted.as_str()))
        .filter(user_jobs::Column::AppliedAt.gte(since))
        .count(conn)
        .await?;
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}
