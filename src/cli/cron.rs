//! Fixed-interval scheduling for repeated recovery runs
//!
//! Only minute intervals are supported: `* * * * *` or `*/N * * * *`.

use std::future::Future;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{error, info};

use crate::error::{Error, Result};

/// A minute-interval schedule parsed from a 5-field cron expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    every_minutes: u32,
}

const MINUTE_FIELD: &str = r"^\*(?:/(\d{1,2}))?$";

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidCron {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid("expected 5 fields"));
        }
        if fields[1..].iter().any(|f| *f != "*") {
            return Err(invalid("only the minute field may be set"));
        }

        let minute = Regex::new(MINUTE_FIELD).map_err(|e| Error::Config(e.to_string()))?;
        let captures = minute
            .captures(fields[0])
            .ok_or_else(|| invalid("minute must be * or */N"))?;
        let every_minutes = match captures.get(1) {
            Some(step) => step
                .as_str()
                .parse::<u32>()
                .map_err(|_| invalid("minute step is not a number"))?,
            None => 1,
        };
        if !(1..=59).contains(&every_minutes) {
            return Err(invalid("minute step must be between 1 and 59"));
        }

        Ok(Self { every_minutes })
    }

    pub fn every_minutes(&self) -> u32 {
        self.every_minutes
    }

    /// First minute boundary strictly after `now` whose minute-of-hour is a
    /// multiple of the step
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let step = i64::from(self.every_minutes);
        let secs = now.timestamp();
        let mut next = secs - secs.rem_euclid(60) + 60;
        while (next / 60).rem_euclid(60) % step != 0 {
            next += 60;
        }
        DateTime::from_timestamp(next, 0).unwrap_or(now)
    }
}

/// Run `job` now and then at every scheduled time
///
/// A failed run is logged and the loop goes on. Only errors that no later run
/// could get past (bad configuration, a declined confirmation) end it.
pub async fn run_forever<F, Fut>(schedule: CronSchedule, mut job: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        if let Err(e) = job().await {
            if e.downcast_ref::<Error>().is_some_and(Error::is_fatal) {
                return Err(e);
            }
            error!("Scheduled run failed: {:#}", e);
        }

        let now = Utc::now();
        let next = schedule.next_after(now);
        info!("Next run at {}", next.to_rfc3339());
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_valid() {
        assert_eq!(CronSchedule::parse("* * * * *").unwrap().every_minutes(), 1);
        assert_eq!(CronSchedule::parse("*/15 * * * *").unwrap().every_minutes(), 15);
        assert_eq!(CronSchedule::parse("  */5  *  * * * ").unwrap().every_minutes(), 5);
    }

    #[test]
    fn test_parse_invalid() {
        for expr in [
            "",
            "*/5 * * *",
            "*/5 * * * * *",
            "5 * * * *",
            "*/0 * * * *",
            "*/60 * * * *",
            "*/5 1 * * *",
            "*/x * * * *",
            "1-5 * * * *",
        ] {
            let err = CronSchedule::parse(expr).unwrap_err();
            assert!(matches!(err, Error::InvalidCron { .. }), "{expr}");
        }
    }

    #[test]
    fn test_next_after() {
        let every_15 = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(every_15.next_after(at(10, 7, 30)), at(10, 15, 0));
        assert_eq!(every_15.next_after(at(10, 15, 0)), at(10, 30, 0));
        assert_eq!(every_15.next_after(at(10, 59, 59)), at(11, 0, 0));

        let every_minute = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(every_minute.next_after(at(10, 7, 30)), at(10, 8, 0));

        // Steps that do not divide the hour restart at minute 0
        let every_25 = CronSchedule::parse("*/25 * * * *").unwrap();
        assert_eq!(every_25.next_after(at(10, 51, 0)), at(11, 0, 0));
    }

    #[tokio::test]
    async fn test_fatal_error_stops_loop() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        let mut runs = 0;

        let result = run_forever(schedule, || {
            runs += 1;
            async { Err(Error::Aborted("declined".to_string()).into()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(runs, 1);
    }
}
