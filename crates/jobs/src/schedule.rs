//! Cron parsing and next-fire computation.

use {chrono::Local, cron::Schedule};

use {
    crate::{Error, Result},
    jobkeeper_common::time::{local_datetime, local_to_ms},
};

/// Parse a cron expression.
///
/// Accepts the `cron` crate's 6/7-field form (seconds first), Quartz-style `?`
/// placeholders, and classic 5-field expressions (seconds and year padded).
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let normalized = expr.trim().replace('?', "*");
    normalized
        .parse::<Schedule>()
        .or_else(|first| {
            if normalized.split_whitespace().count() == 5 {
                format!("0 {normalized} *").parse::<Schedule>()
            } else {
                Err(first)
            }
        })
        .map_err(|e| Error::cron(expr, e))
}

/// Next fire time strictly after `after_ms`, honoring an optional validity
/// window. `None` when the schedule is exhausted or the window has closed.
#[must_use]
pub fn next_fire_after(
    schedule: &Schedule,
    after_ms: u64,
    start_at_ms: Option<u64>,
    end_at_ms: Option<u64>,
) -> Option<u64> {
    let from = match start_at_ms {
        Some(start) if start > after_ms => start.saturating_sub(1),
        _ => after_ms,
    };
    let next = schedule
        .after::<Local>(&local_datetime(from))
        .next()
        .map(|dt| local_to_ms(&dt))?;
    match end_at_ms {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    // 2024-02-01T00:00:00Z
    const BASE_MS: u64 = 1_706_745_600_000;

    #[rstest]
    #[case("0 0/5 * * * ?")]
    #[case("0 0 2 * * ?")]
    #[case("*/10 * * * * *")]
    #[case("0 9 * * *")]
    #[case("0 0 12 ? * MON-FRI")]
    fn test_parse_accepts(#[case] expr: &str) {
        assert!(parse_cron(expr).is_ok(), "{expr}");
    }

    #[rstest]
    #[case("")]
    #[case("not valid")]
    #[case("99 * * * * *")]
    fn test_parse_rejects(#[case] expr: &str) {
        assert!(matches!(parse_cron(expr), Err(Error::CronParse { .. })), "{expr}");
    }

    #[test]
    fn test_next_fire_every_five_minutes() {
        let schedule = parse_cron("0 0/5 * * * ?").unwrap();
        assert_eq!(
            next_fire_after(&schedule, BASE_MS, None, None),
            Some(BASE_MS + 5 * 60_000)
        );
    }

    #[test]
    fn test_next_fire_waits_for_window_start() {
        let schedule = parse_cron("0 * * * * ?").unwrap();
        let start = BASE_MS + 3_600_000;
        assert_eq!(next_fire_after(&schedule, BASE_MS, Some(start), None), Some(start));
    }

    #[test]
    fn test_next_fire_none_after_window_end() {
        let schedule = parse_cron("0 0/5 * * * ?").unwrap();
        assert_eq!(
            next_fire_after(&schedule, BASE_MS, None, Some(BASE_MS + 60_000)),
            None
        );
    }

    #[test]
    fn test_five_field_fires_on_minute_boundary() {
        let schedule = parse_cron("*/15 * * * *").unwrap();
        let next = next_fire_after(&schedule, BASE_MS + 1, None, None).unwrap();
        assert_eq!(next, BASE_MS + 15 * 60_000);
    }
}
