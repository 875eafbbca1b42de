use std::collections::HashSet;

use autoapply_db::entities::jobs;
use sea_orm::{ConnectionTrait, DbErr};
use uuid::Uuid;

use crate::catalog;
use crate::rules::Rule;

/// Rule criteria after parsing the raw comma-separated text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCriteria {
    /// Lower-cased.
    pub title_keywords: Vec<String>,
    /// As typed; the catalog compares case-insensitively.
    pub location_terms: Vec<String>,
}

impl MatchCriteria {
    pub fn parse(target_titles: Option<&str>, locations: Option<&str>) -> Self {
        Self {
            title_keywords: parse_terms(target_titles)
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            location_terms: parse_terms(locations),
        }
    }
}

/// Splits on commas, trims, drops empty segments.
pub fn parse_terms(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Up to `limit` catalog postings for `rule`, skipping `exclude_job_ids`.
/// First come first served in catalog order; there is no ranking.
pub async fn select_candidates<C>(
    conn: &C,
    rule: &Rule,
    exclude_job_ids: &HashSet<Uuid>,
    limit: u32,
) -> Result<Vec<jobs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    catalog::find_matching(conn, &rule.criteria(), exclude_job_ids, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;
    use crate::testing::{self, JobSeed};
    use crate::types::LedgerStatus;

    #[test]
    fn parse_terms_trims_and_drops_empties() {
        assert_eq!(
            parse_terms(Some(" React , Frontend Engineer,, ,Rust ")),
            vec!["React", "Frontend Engineer", "Rust"]
        );
        assert!(parse_terms(Some(" , ")).is_empty());
        assert!(parse_terms(None).is_empty());
    }

    #[test]
    fn criteria_lowercase_titles_only() {
        let c = MatchCriteria::parse(Some("React, GoLang"), Some("Remote, UK"));
        assert_eq!(c.title_keywords, vec!["react", "golang"]);
        assert_eq!(c.location_terms, vec!["Remote", "UK"]);
    }

    #[tokio::test]
    async fn never_offers_jobs_already_in_the_ledger() {
        let db = testing::setup().await;
        let owner = testing::insert_user(&db, "a@example.com").await;
        let other = testing::insert_user(&db, "b@example.com").await;
        let jobs = testing::insert_jobs(
            &db,
            &[
                JobSeed::approved("Rust 0"),
                JobSeed::approved("Rust 1"),
                JobSeed::approved("Rust 2"),
                JobSeed::approved("Rust 3"),
            ],
        )
        .await;
        // Any status excludes, not only submitted.
        testing::insert_entry(&db, owner, jobs[0], None, LedgerStatus::Saved, None).await;
        testing::insert_entry(&db, owner, jobs[1], None, LedgerStatus::Withdrawn, None).await;
        // Another user's ledger is irrelevant.
        testing::insert_entry(&db, other, jobs[2], None, LedgerStatus::Submitted, None).await;

        let rule_id = testing::insert_rule(&db, owner, Some("rust"), None, 10).await;
        let rule = rules::get_for_user(&db, rule_id, owner).await.unwrap().unwrap();

        let exclude = crate::ledger::job_ids_with_any_entry(&db, owner).await.unwrap();
        let picked: Vec<Uuid> = select_candidates(&db, &rule, &exclude, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(picked, vec![jobs[3], jobs[2]]);
    }
}
