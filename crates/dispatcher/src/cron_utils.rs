use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use taskflow_core::{TaskflowError, TaskflowResult};

/// CRON表达式解析和调度工具
///
/// 支持带秒字段的6/7段表达式；5段的标准表达式会自动补上秒字段 `0`。
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> TaskflowResult<Self> {
        let expression = Self::normalize(cron_expr);
        let schedule = Schedule::from_str(&expression).map_err(|e| TaskflowError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression,
            schedule,
        })
    }

    /// 5段表达式补齐秒字段
    pub fn normalize(cron_expr: &str) -> String {
        let trimmed = cron_expr.trim();
        if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 计划的下一次触发时间是否已到
    pub fn is_due(next_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let due = next_run <= now;
        if due {
            debug!(
                "到达触发时间: 计划={}, 当前时间={}",
                next_run.format("%Y-%m-%d %H:%M:%S UTC"),
                now.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        due
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> TaskflowResult<()> {
        Self::new(cron_expr).map(|_| ())
    }
}

/// 解析一次性调度的触发时间（RFC3339）
pub fn parse_once_time(rule: &str) -> TaskflowResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(rule.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TaskflowError::InvalidSchedule {
            rule: rule.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn test_five_field_expression_gets_seconds() {
        let scheduler = CronScheduler::new("*/5 * * * *").unwrap();
        assert_eq!(scheduler.expression(), "0 */5 * * * *");

        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 2, 30).unwrap();
        let next = scheduler.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_upcoming_times_are_strictly_after() {
        let scheduler = CronScheduler::new("0 0 * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let times = scheduler.upcoming_times(from, 3);
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].hour(), 11);
        assert_eq!(times[2].hour(), 13);
    }

    #[test]
    fn test_invalid_expressions() {
        let err = CronScheduler::validate_cron_expression("not a cron").unwrap_err();
        assert!(err.is_malformed_schedule());
        assert!(CronScheduler::new("61 * * * * *").is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(CronScheduler::is_due(now - Duration::seconds(1), now));
        assert!(CronScheduler::is_due(now, now));
        assert!(!CronScheduler::is_due(now + Duration::seconds(1), now));
    }

    #[test]
    fn test_parse_once_time() {
        let at = parse_once_time("2024-05-01T08:00:00+08:00").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(parse_once_time("tomorrow").unwrap_err().is_malformed_schedule());
    }
}
