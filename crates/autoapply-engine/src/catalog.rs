//! Read-only queries over the job catalog.

use std::collections::HashSet;

use autoapply_db::entities::jobs;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::like::contains_ci;
use crate::matching::MatchCriteria;
use crate::types::ModerationStatus;

/// Approved postings matching `criteria`, newest first, at most `limit`.
///
/// Title keywords match against title or description; location terms match
/// against location. Within a facet any term may match, the facets are ANDed,
/// and an empty facet matches everything. Both comparisons are
/// case-insensitive substring matches.
pub async fn find_matching<C>(
    conn: &C,
    criteria: &MatchCriteria,
    exclude_job_ids: &HashSet<Uuid>,
    limit: u32,
) -> Result<Vec<jobs::Model>, DbErr>
where
    C: ConnectionTrait,
{
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut query = jobs::Entity::find()
        .filter(jobs::Column::Status.eq(ModerationStatus::Approved.as_str()));

    if !exclude_job_ids.is_empty() {
        query = query.filter(jobs::Column::Id.is_not_in(exclude_job_ids.iter().copied()));
    }

    if !criteria.title_keywords.is_empty() {
        let mut any = Condition::any();
        for kw in &criteria.title_keywords {
            any = any
                .add(contains_ci((jobs::Entity, jobs::Column::Title), kw))
                .add(contains_ci((jobs::Entity, jobs::Column::Description), kw));
        }
        query = query.filter(any);
    }

    if !criteria.location_terms.is_empty() {
        let mut any = Condition::any();
        for term in &criteria.location_terms {
            any = any.add(contains_ci((jobs::Entity, jobs::Column::Location), term));
        }
        query = query.filter(any);
    }

    query
        .order_by_desc(jobs::Column::CreatedAt)
        .order_by_desc(jobs::Column::Id)
        .limit(u64::from(limit))
        .all(conn)
        .await
}
