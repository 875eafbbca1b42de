/// Engine-wide settings. Read once at startup and injected; nothing in the
/// engine reads the environment on its own.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_automations_per_user: u32,
    pub default_daily_limit: u32,
    pub max_daily_limit: u32,
    /// Hold a per-rule lock across quota check and submission so two runs of
    /// the same rule in this process cannot both claim the same slots.
    pub serialize_runs: bool,
}

pub const DEFAULT_DAILY_LIMIT: u32 = 25;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_automations_per_user: 10,
            default_daily_limit: DEFAULT_DAILY_LIMIT,
            max_daily_limit: 500,
            serialize_runs: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_daily_limit = lookup("AUTOAPPLY_MAX_DAILY_LIMIT")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_daily_limit)
            .clamp(1, 10_000);
        Self {
            max_automations_per_user: lookup("AUTOAPPLY_MAX_AUTOMATIONS_PER_USER")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(defaults.max_automations_per_user)
                .clamp(1, 1_000),
            default_daily_limit: defaults.default_daily_limit.min(max_daily_limit),
            max_daily_limit,
            serialize_runs: lookup("AUTOAPPLY_SERIALIZE_RUNS")
                .map(|v| {
                    !matches!(
                        v.trim().to_ascii_lowercase().as_str(),
                        "0" | "false" | "no" | "off"
                    )
                })
                .unwrap_or(defaults.serialize_runs),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = EngineConfig::from_lookup(|_| None);
        assert_eq!(cfg.max_automations_per_user, 10);
        assert_eq!(cfg.default_daily_limit, 25);
        assert_eq!(cfg.max_daily_limit, 500);
        assert!(cfg.serialize_runs);
    }

    #[test]
    fn parses_and_clamps_values() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[
            ("AUTOAPPLY_MAX_AUTOMATIONS_PER_USER", "0"),
            ("AUTOAPPLY_MAX_DAILY_LIMIT", " 20 "),
            ("AUTOAPPLY_SERIALIZE_RUNS", "off"),
        ]));
        assert_eq!(cfg.max_automations_per_user, 1);
        assert_eq!(cfg.max_daily_limit, 20);
        assert_eq!(cfg.default_daily_limit, 20);
        assert!(!cfg.serialize_runs);
    }

    #[test]
    fn ignores_garbage() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[("AUTOAPPLY_MAX_DAILY_LIMIT", "lots")]));
        assert_eq!(cfg.max_daily_limit, 500);
    }
}
