use std::time::Duration;

use autoapply_engine::rules;
use autoapply_engine::{Engine, RuleStatus};

const MIN_INTERVAL_SECS: u64 = 30;

// Periodically runs every rule in `running` status. Each pass respects the
// same daily quota as a manual run, so repeated ticks within a day are no-ops
// once the limit is hit.
#[derive(Clone)]
pub struct AutomationPoller {
    engine: Engine,
    interval: Duration,
}

impl AutomationPoller {
    pub fn new(engine: Engine, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Disabled unless `AUTOAPPLY_POLL_INTERVAL_SECS` is set to a positive value.
    pub fn from_env(engine: Engine) -> Option<Self> {
        let secs = parse_interval(std::env::var("AUTOAPPLY_POLL_INTERVAL_SECS").ok().as_deref())?;
        Some(Self::new(engine, Duration::from_secs(secs)))
    }

    pub fn spawn(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "automation poller started");
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                self.tick().await;
            }
        });
    }

    async fn tick(&self) {
        let running = match rules::list_by_status(self.engine.db(), RuleStatus::Running).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "poller: listing running automations failed");
                return;
            }
        };

        for rule in running {
            match self.engine.run_once(rule.id, rule.owner_id).await {
                Ok(outcome) => {
                    tracing::debug!(
                        rule_id = %rule.id,
                        applied = outcome.applied_count,
                        limit_reached = outcome.limit_reached,
                        "poller: run finished"
                    );
                }
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "poller: run failed");
                }
            }
        }
    }
}

fn parse_interval(raw: Option<&str>) -> Option<u64> {
    let secs = raw?.trim().parse::<u64>().ok()?;
    (secs > 0).then(|| secs.max(MIN_INTERVAL_SECS))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use autoapply_db::entities::{jobs, user_jobs, users};
    use autoapply_engine::types::NewRule;
    use autoapply_engine::{EngineConfig, ModerationStatus};
    use autoapply_migration::{Migrator, MigratorTrait};
    use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
    use uuid::Uuid;

    use super::*;

    async fn setup() -> DatabaseConnection {
        let mut opts = ConnectOptions::new("sqlite::memory:");
        opts.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opts).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn insert_user(db: &DatabaseConnection, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        users::Entity::insert(users::ActiveModel {
            id: Set(id),
            email: Set(email.to_string()),
            full_name: Set(None),
            is_admin: Set(false),
            created_at: Set(chrono::Utc::now().into()),
        })
        .exec_without_returning(db)
        .await
        .unwrap();
        id
    }

    async fn insert_job(db: &DatabaseConnection, title: &str) {
        let at = chrono::Utc::now() - chrono::Duration::days(1);
        jobs::Entity::insert(jobs::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            company: Set("Acme".to_string()),
            location: Set(None),
            description: Set(None),
            job_url: Set(None),
            source: Set(None),
            status: Set(ModerationStatus::Approved.as_str().to_string()),
            created_at: Set(at.into()),
            updated_at: Set(at.into()),
        })
        .exec_without_returning(db)
        .await
        .unwrap();
    }

    async fn rule(engine: &Engine, owner: Uuid, titles: &str, status: RuleStatus) -> Uuid {
        let input = NewRule {
            target_titles: Some(titles.to_string()),
            daily_limit: Some(10),
            ..NewRule::default()
        };
        let now = chrono::Utc::now();
        let created = rules::create(engine.db(), engine.config(), owner, input, now)
            .await
            .unwrap();
        if status != created.status {
            rules::set_status(engine.db(), created.id, owner, status, now)
                .await
                .unwrap();
        }
        created.id
    }

    async fn total_applied(engine: &Engine, id: Uuid) -> u64 {
        rules::get_any(engine.db(), id).await.unwrap().unwrap().total_applied
    }

    #[tokio::test]
    async fn tick_runs_running_rules_and_skips_paused_ones() {
        let db = setup().await;
        let alice = insert_user(&db, "alice@example.com").await;
        let bob = insert_user(&db, "bob@example.com").await;
        for title in ["Rust Engineer", "Go Engineer", "Rust Developer"] {
            insert_job(&db, title).await;
        }
        let engine = Engine::new(Arc::new(db), EngineConfig::default());

        // Finds nothing; the rest of the pass still runs.
        let idle = rule(&engine, bob, "Haskell", RuleStatus::Running).await;
        let running = rule(&engine, alice, "Engineer", RuleStatus::Running).await;
        let paused = rule(&engine, bob, "Developer", RuleStatus::Paused).await;

        let poller = AutomationPoller::new(engine.clone(), Duration::from_secs(60));
        poller.tick().await;

        assert_eq!(total_applied(&engine, idle).await, 0);
        assert_eq!(total_applied(&engine, running).await, 2);
        assert_eq!(total_applied(&engine, paused).await, 0);

        let entries = user_jobs::Entity::find().all(engine.db()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.automation_id == Some(running)));

        // Nothing new to apply to on the next pass.
        poller.tick().await;
        assert_eq!(total_applied(&engine, running).await, 2);
        assert_eq!(
            rules::get_any(engine.db(), paused).await.unwrap().unwrap().status,
            RuleStatus::Paused
        );
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval(None), None);
        assert_eq!(parse_interval(Some("0")), None);
        assert_eq!(parse_interval(Some("soon")), None);
        assert_eq!(parse_interval(Some("5")), Some(MIN_INTERVAL_SECS));
        assert_eq!(parse_interval(Some(" 600 ")), Some(600));
    }
}
