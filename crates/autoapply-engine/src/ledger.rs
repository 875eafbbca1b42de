//! The per-user job ledger (`user_jobs`).
//!
//! Every write path funnels through the `(user_id, job_id)` unique index, so
//! there is at most one entry per user and job no matter who writes it.

use std::collections::HashSet;

use autoapply_db::entities::{jobs, user_jobs};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::types::{LedgerPatch, LedgerStatus};

pub async fn existing_entry<C>(conn: &C, owner_id: Uuid, job_id: Uuid) -> Result<Option<user_jobs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    user_jobs::Entity::find()
        .filter(user_jobs::Column::UserId.eq(owner_id))
        .filter(user_jobs::Column::JobId.eq(job_id))
        .one(conn)
        .await
}

/// Every job the owner has an entry for, whatever its status.
pub async fn job_ids_with_any_entry<C>(conn: &C, owner_id: Uuid) -> Result<HashSet<Uuid>, DbErr>
where
    C: ConnectionTrait,
{
    let ids: Vec<Uuid> = user_jobs::Entity::find()
        .select_only()
        .column(user_jobs::Column::JobId)
        .filter(user_jobs::Column::UserId.eq(owner_id))
        .into_tuple()
        .all(conn)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Marks each job as submitted by `rule_id` at `now`, creating entries that do
/// not exist yet. Returns the resulting entries in input order, duplicates
/// collapsed.
///
/// All-or-nothing per batch. Inside an outer transaction this nests as a
/// savepoint and commits with it.
pub async fn record_submissions<C>(
    conn: &C,
    owner_id: Uuid,
    job_ids: &[Uuid],
    rule_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<user_jobs::Model>, DbErr>
where
    C: ConnectionTrait + TransactionTrait,
{
    let mut seen = HashSet::new();
    let ordered: Vec<Uuid> = job_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if ordered.is_empty() {
        return Ok(Vec::new());
    }

    let txn = conn.begin().await?;
    let at: DateTimeWithTimeZone = now.into();
    for job_id in &ordered {
        let model = user_jobs::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(owner_id),
            job_id: Set(*job_id),
            automation_id: Set(Some(rule_id)),
            status: Set(LedgerStatus::Submitted.as_str().to_string()),
            applied_at: Set(Some(at)),
            notes: Set(None),
            resume_path: Set(None),
            cover_letter_path: Set(None),
            created_at: Set(at),
            updated_at: Set(at),
        };
        // A concurrent writer for the same pair lands on the same row.
        user_jobs::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([user_jobs::Column::UserId, user_jobs::Column::JobId])
                    .update_columns([
                        user_jobs::Column::Status,
                        user_jobs::Column::AppliedAt,
                        user_jobs::Column::AutomationId,
                        user_jobs::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
    }

    let mut rows = user_jobs::Entity::find()
        .filter(user_jobs::Column::UserId.eq(owner_id))
        .filter(user_jobs::Column::JobId.is_in(ordered.iter().copied()))
        .all(&txn)
        .await?;
    txn.commit().await?;
    rows.sort_by_key(|r| ordered.iter().position(|id| *id == r.job_id));
    Ok(rows)
}

/// Adds a job to the owner's list. Idempotent: an existing entry is returned
/// unchanged. A job missing from the catalog is `NotFound`.
pub async fn save_job<C>(
    conn: &C,
    owner_id: Uuid,
    job_id: Uuid,
    status: Option<LedgerStatus>,
    now: DateTime<Utc>,
) -> Result<user_jobs::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = existing_entry(conn, owner_id, job_id).await? {
        return Ok(existing);
    }
    if jobs::Entity::find_by_id(job_id).one(conn).await?.is_none() {
        return Err(EngineError::NotFound);
    }

    let status = status.unwrap_or(LedgerStatus::Saved);
    let at: DateTimeWithTimeZone = now.into();
    let model = user_jobs::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(owner_id),
        job_id: Set(job_id),
        automation_id: Set(None),
        status: Set(status.as_str().to_string()),
        applied_at: Set((status == LedgerStatus::Submitted).then_some(at)),
        notes: Set(None),
        resume_path: Set(None),
        cover_letter_path: Set(None),
        created_at: Set(at),
        updated_at: Set(at),
    };
    // Lost a race with another writer: fall through to the winner's row.
    user_jobs::Entity::insert(model)
        .on_conflict(
            OnConflict::columns([user_jobs::Column::UserId, user_jobs::Column::JobId])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    existing_entry(conn, owner_id, job_id)
        .await?
        .ok_or(EngineError::NotFound)
}

pub async fn get_entry<C>(conn: &C, entry_id: Uuid, owner_id: Uuid) -> Result<Option<user_jobs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    user_jobs::Entity::find_by_id(entry_id)
        .filter(user_jobs::Column::UserId.eq(owner_id))
        .one(conn)
        .await
}

pub async fn list_for_user<C>(
    conn: &C,
    owner_id: Uuid,
    status: Option<LedgerStatus>,
    offset: u64,
    limit: u64,
) -> Result<Vec<user_jobs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    let mut query = user_jobs::Entity::find().filter(user_jobs::Column::UserId.eq(owner_id));
    if let Some(status) = status {
        query = query.filter(user_jobs::Column::Status.eq(status.as_str()));
    }
    query
        .order_by_desc(user_jobs::Column::CreatedAt)
        .order_by_desc(user_jobs::Column::Id)
        .offset(offset)
        .limit(limit)
        .all(conn)
        .await
}

pub async fn update_entry<C>(
    conn: &C,
    entry_id: Uuid,
    owner_id: Uuid,
    patch: LedgerPatch,
    now: DateTime<Utc>,
) -> Result<user_jobs::Model>
where
    C: ConnectionTrait,
{
    let model = get_entry(conn, entry_id, owner_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    let at: DateTimeWithTimeZone = now.into();
    let mut active: user_jobs::ActiveModel = model.into();
    if let Some(status) = patch.status {
        active.status = Set(status.as_str().to_string());
        if status == LedgerStatus::Submitted {
            active.applied_at = Set(Some(at));
        }
    }
    if let Some(notes) = patch.notes {
        active.notes = Set(Some(notes));
    }
    if let Some(path) = patch.resume_path {
        active.resume_path = Set(Some(path));
    }
    if let Some(path) = patch.cover_letter_path {
        active.cover_letter_path = Set(Some(path));
    }
    active.updated_at = Set(at);
    Ok(active.update(conn).await?)
}

pub async fn submit_entry<C>(conn: &C, entry_id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Result<user_jobs::Model>
where
    C: ConnectionTrait,
{
    let patch = LedgerPatch {
        status: Some(LedgerStatus::Submitted),
        ..LedgerPatch::default()
    };
    update_entry(conn, entry_id, owner_id, patch, now).await
}

pub async fn delete_entry<C>(conn: &C, entry_id: Uuid, owner_id: Uuid) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let res = user_jobs::Entity::delete_many()
        .filter(user_jobs::Column::Id.eq(entry_id))
        .filter(user_jobs::Column::UserId.eq(owner_id))
        .exec(conn)
        .await?;
    Ok(res.rows_affected > 0)
}

/// Detaches entries from a rule that is about to be deleted. The entries
/// themselves stay.
pub async fn clear_rule_reference<C>(conn: &C, rule_id: Uuid) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let res = user_jobs::Entity::update_many()
        .col_expr(user_jobs::Column::AutomationId, Expr::value(Option::<Uuid>::None))
        .filter(user_jobs::Column::AutomationId.eq(rule_id))
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sea_orm::TransactionTrait;

    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn record_submissions_is_idempotent_per_pair() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let rule = testing::insert_rule(&db, owner, None, None, 10).await;
        let jobs = testing::insert_approved(&db, 2, "Job").await;
        let now = testing::noon();

        let first = record_submissions(&db, owner, &jobs, rule, now).await.unwrap();
        assert_eq!(first.len(), 2);

        let later = now + Duration::minutes(5);
        let second = record_submissions(&db, owner, &[jobs[1], jobs[1]], rule, later)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[1].id);
        assert_eq!(second[0].applied_at, Some(later.into()));
        assert_eq!(testing::count_entries(&db).await, 2);
    }

    #[tokio::test]
    async fn record_submissions_promotes_existing_entries() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let rule = testing::insert_rule(&db, owner, None, None, 10).await;
        let jobs = testing::insert_approved(&db, 2, "Job").await;
        let saved = testing::insert_entry(&db, owner, jobs[0], None, LedgerStatus::Saved, None).await;
        let now = testing::noon();

        let rows = record_submissions(&db, owner, &[jobs[1], jobs[0]], rule, now)
            .await
            .unwrap();
        assert_eq!(rows.iter().map(|r| r.job_id).collect::<Vec<_>>(), vec![jobs[1], jobs[0]]);

        let promoted = &rows[1];
        assert_eq!(promoted.id, saved);
        assert_eq!(promoted.status, "submitted");
        assert_eq!(promoted.automation_id, Some(rule));
        assert_eq!(promoted.applied_at, Some(now.into()));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_writes() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let rule = testing::insert_rule(&db, owner, None, None, 10).await;
        let jobs = testing::insert_approved(&db, 1, "Job").await;

        let txn = db.begin().await.unwrap();
        // The second id is not in the catalog and trips the foreign key.
        let res = record_submissions(&txn, owner, &[jobs[0], Uuid::new_v4()], rule, testing::noon()).await;
        assert!(res.is_err());
        txn.rollback().await.unwrap();

        assert_eq!(testing::count_entries(&db).await, 0);
    }

    #[tokio::test]
    async fn failed_batch_on_bare_connection_commits_nothing() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let rule = testing::insert_rule(&db, owner, None, None, 10).await;
        let jobs = testing::insert_approved(&db, 1, "Job").await;

        let res = record_submissions(&db, owner, &[jobs[0], Uuid::new_v4()], rule, testing::noon()).await;
        assert!(res.is_err());
        assert_eq!(testing::count_entries(&db).await, 0);

        // The same batch without the bad id goes through.
        let rows = record_submissions(&db, owner, &[jobs[0]], rule, testing::noon())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn save_job_returns_existing_entry() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let jobs = testing::insert_approved(&db, 1, "Job").await;
        let now = testing::noon();

        let first = save_job(&db, owner, jobs[0], None, now).await.unwrap();
        assert_eq!(first.status, "saved");
        assert_eq!(first.applied_at, None);

        let again = save_job(&db, owner, jobs[0], Some(LedgerStatus::Draft), now)
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, "saved");
        assert_eq!(testing::count_entries(&db).await, 1);
    }

    #[tokio::test]
    async fn save_job_rejects_unknown_posting() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;

        let err = save_job(&db, owner, Uuid::new_v4(), None, testing::noon())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
        assert_eq!(testing::count_entries(&db).await, 0);
    }

    #[tokio::test]
    async fn manual_submit_stamps_time_and_keeps_rule_reference_empty() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let jobs = testing::insert_approved(&db, 1, "Job").await;
        let now = testing::noon();
        let entry = save_job(&db, owner, jobs[0], None, now).await.unwrap();

        let later = now + Duration::hours(1);
        let submitted = submit_entry(&db, entry.id, owner, later).await.unwrap();
        assert_eq!(submitted.status, "submitted");
        assert_eq!(submitted.applied_at, Some(later.into()));
        assert_eq!(submitted.automation_id, None);
    }

    #[tokio::test]
    async fn entries_are_scoped_to_their_owner() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let intruder = testing::insert_user(&db, "b@example.com").await;
        let jobs = testing::insert_approved(&db, 1, "Job").await;
        let entry = save_job(&db, owner, jobs[0], None, testing::noon()).await.unwrap();

        assert!(get_entry(&db, entry.id, intruder).await.unwrap().is_none());
        assert!(matches!(
            update_entry(&db, entry.id, intruder, LedgerPatch::default(), testing::noon()).await,
            Err(EngineError::NotFound)
        ));
        assert!(!delete_entry(&db, entry.id, intruder).await.unwrap());
        assert!(delete_entry(&db, entry.id, owner).await.unwrap());
        assert_eq!(testing::count_entries(&db).await, 0);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let jobs = testing::insert_approved(&db, 3, "Job").await;
        let now = testing::noon();
        save_job(&db, owner, jobs[0], None, now).await.unwrap();
        save_job(&db, owner, jobs[1], Some(LedgerStatus::Submitted), now).await.unwrap();
        save_job(&db, owner, jobs[2], Some(LedgerStatus::Submitted), now).await.unwrap();

        let all = list_for_user(&db, owner, None, 0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        let submitted = list_for_user(&db, owner, Some(LedgerStatus::Submitted), 0, 10)
            .await
            .unwrap();
        assert_eq!(submitted.len(), 2);
        let page = list_for_user(&db, owner, None, 2, 10).await.unwrap();
        assert_eq!(page.len(), 1);
    }
}
