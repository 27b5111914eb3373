use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Per-server config key the schedule is persisted under.
pub const SCHEDULE_KEY: &str = "backup_schedule";

/// When to back a server up and how long to keep the archives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSchedule {
    pub enabled: bool,
    /// Five-field (`min hour dom month dow`) or six-field (with seconds)
    /// cron expression
    pub cron: String,
    /// Backups older than this many days are pruned after each run; 0 keeps
    /// everything
    pub retention_days: u32,
}

impl BackupSchedule {
    /// Read the persisted schedule out of a server's config map.
    ///
    /// `Ok(None)` when no schedule was ever saved.
    pub fn from_config(config: &Map<String, Value>) -> Result<Option<Self>> {
        match config.get(SCHEDULE_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Whether this schedule should have a timer at all.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.cron.trim().is_empty()
    }
}

/// Parse a cron expression, accepting the classic five-field form by
/// firing at second zero.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| Error::Schedule(format!("{}: {}", expr, e)))
}

/// Next firing strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn five_field_expression_fires_on_the_minute() {
        let schedule = parse_cron("30 3 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            next_fire(&schedule, after),
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 3, 30, 0).unwrap())
        );
    }

    #[test]
    fn six_field_expression_is_kept() {
        let schedule = parse_cron("15 */5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            next_fire(&schedule, after),
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 15).unwrap())
        );
    }

    #[test]
    fn garbage_is_a_schedule_error() {
        assert!(matches!(parse_cron("every day"), Err(Error::Schedule(_))));
    }

    #[test]
    fn reads_persisted_schedule() {
        let mut config = Map::new();
        assert_eq!(BackupSchedule::from_config(&config).unwrap(), None);

        config.insert(
            SCHEDULE_KEY.to_string(),
            json!({"enabled": true, "cron": "0 4 * * *", "retentionDays": 7}),
        );
        let schedule = BackupSchedule::from_config(&config).unwrap().unwrap();
        assert!(schedule.is_active());
        assert_eq!(schedule.retention_days, 7);
    }
}
