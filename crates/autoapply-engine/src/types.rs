use specta::Type;

/// Lifecycle of a rule. Only toggled by an explicit owner/admin action; runs
/// never change it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Paused,
    Running,
}

impl RuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleStatus::Paused => "paused",
            RuleStatus::Running => "running",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "paused" => Some(RuleStatus::Paused),
            "running" => Some(RuleStatus::Running),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Saved,
    Draft,
    Submitted,
    Reviewing,
    Interview,
    Rejected,
    Accepted,
    Withdrawn,
}

impl LedgerStatus {
    pub const ALL: [LedgerStatus; 8] = [
        LedgerStatus::Saved,
        LedgerStatus::Draft,
        LedgerStatus::Submitted,
        LedgerStatus::Reviewing,
        LedgerStatus::Interview,
        LedgerStatus::Rejected,
        LedgerStatus::Accepted,
        LedgerStatus::Withdrawn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Saved => "saved",
            LedgerStatus::Draft => "draft",
            LedgerStatus::Submitted => "submitted",
            LedgerStatus::Reviewing => "reviewing",
            LedgerStatus::Interview => "interview",
            LedgerStatus::Rejected => "rejected",
            LedgerStatus::Accepted => "accepted",
            LedgerStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }
}

/// Moderation state of a catalog posting. Only `Approved` postings are
/// offered to automations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }
}

/// Result of one automation run. "Limit already reached" and "nothing to
/// apply to" are ordinary outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Type)]
pub struct RunOutcome {
    pub applied_count: u32,
    pub limit_reached: bool,
    pub message: String,
    pub applications_today: u32,
}

impl RunOutcome {
    pub(crate) fn limit_exceeded(applications_today: u32, daily_limit: u32) -> Self {
        Self {
            applied_count: 0,
            limit_reached: true,
            message: format!("Daily limit exceeded ({applications_today}/{daily_limit})."),
            applications_today,
        }
    }

    pub(crate) fn no_candidates(applications_today: u32) -> Self {
        Self {
            applied_count: 0,
            limit_reached: false,
            message: "No similar jobs available to apply to.".to_string(),
            applications_today,
        }
    }

    pub(crate) fn applied(applied: u32, slots: u32, applications_today: u32, daily_limit: u32) -> Self {
        let limit_reached = applications_today >= daily_limit;
        let message = if applied < slots {
            format!("Applied to {applied} job(s) (only {applied} similar job(s) available).")
        } else if limit_reached {
            format!("Applied to {applied} job(s). Daily limit exceeded.")
        } else {
            format!("Applied to {applied} job(s).")
        };
        Self {
            applied_count: applied,
            limit_reached,
            message,
            applications_today,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize, Type)]
pub struct NewRule {
    pub name: Option<String>,
    pub target_titles: Option<String>,
    pub locations: Option<String>,
    pub daily_limit: Option<i32>,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub cover_letter_template: Option<String>,
}

/// Partial rule update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, serde::Deserialize, Type)]
pub struct RulePatch {
    pub name: Option<String>,
    pub target_titles: Option<String>,
    pub locations: Option<String>,
    pub daily_limit: Option<i32>,
    pub platforms: Option<Vec<String>>,
    pub cover_letter_template: Option<String>,
    pub status: Option<RuleStatus>,
}

#[derive(Debug, Clone, Default, serde::Deserialize, Type)]
pub struct LedgerPatch {
    pub status: Option<LedgerStatus>,
    pub notes: Option<String>,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_status_round_trips_through_str() {
        for s in LedgerStatus::ALL {
            assert_eq!(LedgerStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(LedgerStatus::parse("SUBMITTED"), None);
    }

    #[test]
    fn rule_status_rejects_unknown_values() {
        assert_eq!(RuleStatus::parse("running"), Some(RuleStatus::Running));
        assert_eq!(RuleStatus::parse("stopped"), None);
    }

    #[test]
    fn applied_outcome_notes_short_supply() {
        let out = RunOutcome::applied(2, 7, 5, 10);
        assert_eq!(
            out.message,
            "Applied to 2 job(s) (only 2 similar job(s) available)."
        );
        assert!(!out.limit_reached);
    }

    #[test]
    fn applied_outcome_flags_limit() {
        let out = RunOutcome::applied(10, 10, 10, 10);
        assert_eq!(out.message, "Applied to 10 job(s). Daily limit exceeded.");
        assert!(out.limit_reached);

        let out = RunOutcome::applied(3, 3, 4, 10);
        assert_eq!(out.message, "Applied to 3 job(s).");
    }

    #[test]
    fn limit_exceeded_message_shows_counts() {
        let out = RunOutcome::limit_exceeded(5, 5);
        assert_eq!(out.message, "Daily limit exceeded (5/5).");
        assert_eq!(out.applied_count, 0);
        assert!(out.limit_reached);
    }
}
