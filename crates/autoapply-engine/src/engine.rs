use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use autoapply_db::entities::user_jobs;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::rules::Rule;
use crate::types::RunOutcome;
use crate::{ledger, matching, quota, rules};

/// Runs automation rules against the catalog and the ledger.
///
/// Cheap to clone; clones share the connection and the per-rule locks.
#[derive(Clone)]
pub struct Engine {
    db: Arc<DatabaseConnection>,
    config: EngineConfig,
    run_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Engine {
    pub fn new(db: Arc<DatabaseConnection>, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            run_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run_once(&self, rule_id: Uuid, owner_id: Uuid) -> Result<RunOutcome> {
        self.run_once_at(rule_id, owner_id, Utc::now()).await
    }

    /// One run of `rule_id` as of `now`: fill the rule's remaining daily slots
    /// with matching postings the owner has not touched yet.
    ///
    /// A rule that does not belong to `owner_id` is `NotFound`. Paused rules
    /// run like any other; whether to skip them is the caller's call.
    pub async fn run_once_at(&self, rule_id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Result<RunOutcome> {
        let db = &*self.db;
        let rule = rules::get_for_user(db, rule_id, owner_id)
            .await?
            .ok_or(EngineError::NotFound)?;

        let guard = self.lock_rule(rule_id).await;
        let result = self.fill_slots(&rule, owner_id, now).await;
        drop(guard);
        self.release_lock(rule_id);
        result
    }

    async fn fill_slots(&self, rule: &Rule, owner_id: Uuid, now: DateTime<Utc>) -> Result<RunOutcome> {
        let db = &*self.db;
        let rule_id = rule.id;
        let daily_limit = rule.daily_limit;
        let applications_today = quota::submitted_today(db, rule_id, now).await?;
        let slots = daily_limit.saturating_sub(applications_today);
        if slots == 0 {
            tracing::info!(%rule_id, applications_today, daily_limit, "automation run skipped: daily limit reached");
            return Ok(RunOutcome::limit_exceeded(applications_today, daily_limit));
        }

        let exclude = ledger::job_ids_with_any_entry(db, owner_id).await?;
        let candidates = matching::select_candidates(db, rule, &exclude, slots).await?;
        if candidates.is_empty() {
            tracing::info!(%rule_id, slots, "automation run found no candidates");
            return Ok(RunOutcome::no_candidates(applications_today));
        }

        let job_ids: Vec<Uuid> = candidates.iter().map(|j| j.id).collect();
        let applied = self.commit_submissions(rule_id, owner_id, &job_ids, now).await?;
        let applied = u32::try_from(applied.len()).unwrap_or(u32::MAX);

        let outcome = RunOutcome::applied(
            applied,
            slots,
            applications_today.saturating_add(applied),
            daily_limit,
        );
        tracing::info!(
            %rule_id,
            %owner_id,
            applied,
            applications_today = outcome.applications_today,
            limit_reached = outcome.limit_reached,
            "automation run applied"
        );
        Ok(outcome)
    }

    /// Ledger writes and the rule counter commit together or not at all.
    async fn commit_submissions(
        &self,
        rule_id: Uuid,
        owner_id: Uuid,
        job_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<user_jobs::Model>> {
        let txn = self.db.begin().await?;
        let applied = ledger::record_submissions(&txn, owner_id, job_ids, rule_id, now).await?;
        rules::increment_total_applied(&txn, rule_id, applied.len() as u64, now).await?;
        txn.commit().await?;
        Ok(applied)
    }

    async fn lock_rule(&self, rule_id: Uuid) -> Option<OwnedMutexGuard<()>> {
        if !self.config.serialize_runs {
            return None;
        }
        let lock = {
            let mut map = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(rule_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Some(lock.lock_owned().await)
    }

    // Drops the rule's lock entry once no run holds or awaits it.
    fn release_lock(&self, rule_id: Uuid) {
        let mut map = self.run_locks.lock().unwrap_or_else(|e| e.into_inner());
        if map.get(&rule_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            map.remove(&rule_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.run_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
