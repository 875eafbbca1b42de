use autoapply_db::entities::{automations, jobs, user_jobs, users};
use autoapply_migration::{Migrator, MigratorTrait};
use chrono::{DateTime, Duration, TimeZone, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use uuid::Uuid;

use crate::types::{LedgerStatus, ModerationStatus, RuleStatus};

// A single pooled connection: every connection to `sqlite::memory:` gets its
// own empty database.
pub async fn setup() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

/// Noon UTC on a fixed day, far from the day boundary.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

pub async fn insert_user(db: &DatabaseConnection, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    users::Entity::insert(users::ActiveModel {
        id: Set(id),
        email: Set(email.to_string()),
        full_name: Set(None),
        is_admin: Set(false),
        created_at: Set(noon().into()),
    })
    .exec_without_returning(db)
    .await
    .unwrap();
    id
}

pub struct JobSeed<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub status: ModerationStatus,
}

impl<'a> JobSeed<'a> {
    pub fn approved(title: &'a str) -> Self {
        Self {
            title,
            description: None,
            location: None,
            status: ModerationStatus::Approved,
        }
    }
}

/// Inserts postings in order; later seeds get later `created_at`.
pub async fn insert_jobs(db: &DatabaseConnection, seeds: &[JobSeed<'_>]) -> Vec<Uuid> {
    let base = noon() - Duration::days(30);
    let mut ids = Vec::new();
    for (i, seed) in seeds.iter().enumerate() {
        let id = Uuid::new_v4();
        let at = base + Duration::minutes(i as i64);
        jobs::Entity::insert(jobs::ActiveModel {
            id: Set(id),
            title: Set(seed.title.to_string()),
            company: Set("Acme".to_string()),
            location: Set(seed.location.map(str::to_string)),
            description: Set(seed.description.map(str::to_string)),
            job_url: Set(None),
            source: Set(None),
            status: Set(seed.status.as_str().to_string()),
            created_at: Set(at.into()),
            updated_at: Set(at.into()),
        })
        .exec_without_returning(db)
        .await
        .unwrap();
        ids.push(id);
    }
    ids
}

pub async fn insert_approved(db: &DatabaseConnection, n: usize, title: &str) -> Vec<Uuid> {
    let titles: Vec<String> = (0..n).map(|i| format!("{title} {i}")).collect();
    let seeds: Vec<JobSeed<'_>> = titles.iter().map(|t| JobSeed::approved(t)).collect();
    insert_jobs(db, &seeds).await
}

pub async fn insert_rule(
    db: &DatabaseConnection,
    owner: Uuid,
    target_titles: Option<&str>,
    locations: Option<&str>,
    daily_limit: i32,
) -> Uuid {
    let id = Uuid::new_v4();
    automations::Entity::insert(automations::ActiveModel {
        id: Set(id),
        user_id: Set(owner),
        name: Set("rule".to_string()),
        target_titles: Set(target_titles.map(str::to_string)),
        locations: Set(locations.map(str::to_string)),
        daily_limit: Set(daily_limit),
        platforms: Set(serde_json::json!([])),
        cover_letter_template: Set(None),
        status: Set(RuleStatus::Paused.as_str().to_string()),
        total_applied: Set(0),
        created_at: Set(noon().into()),
        updated_at: Set(noon().into()),
    })
    .exec_without_returning(db)
    .await
    .unwrap();
    id
}

pub async fn insert_entry(
    db: &DatabaseConnection,
    owner: Uuid,
    job_id: Uuid,
    rule_id: Option<Uuid>,
    status: LedgerStatus,
    applied_at: Option<DateTime<Utc>>,
) -> Uuid {
    let id = Uuid::new_v4();
    user_jobs::Entity::insert(user_jobs::ActiveModel {
        id: Set(id),
        user_id: Set(owner),
        job_id: Set(job_id),
        automation_id: Set(rule_id),
        status: Set(status.as_str().to_string()),
        applied_at: Set(applied_at.map(Into::into)),
        notes: Set(None),
        resume_path: Set(None),
        cover_letter_path: Set(None),
        created_at: Set(noon().into()),
        updated_at: Set(noon().into()),
    })
    .exec_without_returning(db)
    .await
    .unwrap();
    id
}

pub async fn count_entries(db: &DatabaseConnection) -> usize {
    user_jobs::Entity::find().all(db).await.unwrap().len()
}
