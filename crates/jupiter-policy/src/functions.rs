//! Built-in condition functions
//!
//! Function conditions dispatch by name against pre-computed enrichment
//! data or the engine clock. The set is closed: unknown names are
//! evaluation errors, not silent non-matches.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use jupiter_core::Value;

use crate::config::BusinessHoursConfig;
use crate::context::EvalTarget;

/// Evaluate a named condition function
pub fn evaluate(
    name: &str,
    _args: &[Value],
    target: &EvalTarget<'_>,
    business_hours: &BusinessHoursConfig,
) -> Result<bool, String> {
    match name {
        "has_pii" => Ok(target.content_analysis().pii_detection.has_pii),
        "has_injection" => Ok(target
            .content_analysis()
            .prompt_injection
            .has_prompt_injection),
        "in_business_hours" => in_business_hours_at(business_hours, Utc::now()),
        other => Err(format!("unknown function '{}'", other)),
    }
}

/// Evaluate the business-hours window at a given instant.
///
/// Split from [`evaluate`] so tests can pin the clock.
pub fn in_business_hours_at(
    config: &BusinessHoursConfig,
    now: DateTime<Utc>,
) -> Result<bool, String> {
    let tz: Tz = config
        .timezone
        .parse()
        .map_err(|_| format!("unknown timezone '{}'", config.timezone))?;

    let local = tz.from_utc_datetime(&now.naive_utc());
    let day_in_window = config
        .days
        .iter()
        .any(|d| weekday_matches(d, local.weekday()));
    let hour = local.hour();

    Ok(day_in_window && hour >= config.start_hour && hour < config.end_hour)
}

fn weekday_matches(name: &str, weekday: Weekday) -> bool {
    let expected = match name.to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        _ => return false,
    };
    expected == weekday
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jupiter_core::request::PiiDetection;
    use jupiter_core::{EnrichedRequest, OriginalRequest};

    #[test]
    fn test_has_pii_reads_enrichment() {
        let mut request = EnrichedRequest::new("req-1", OriginalRequest::new("gpt-4"));
        request.content_analysis.pii_detection = PiiDetection {
            has_pii: true,
            detected_types: vec![],
            score: 0.9,
        };
        let target = EvalTarget::Request(&request);
        let config = BusinessHoursConfig::default();

        assert!(evaluate("has_pii", &[], &target, &config).unwrap());
        assert!(!evaluate("has_injection", &[], &target, &config).unwrap());
    }

    #[test]
    fn test_unknown_function_is_error() {
        let request = EnrichedRequest::new("req-1", OriginalRequest::new("gpt-4"));
        let target = EvalTarget::Request(&request);
        let config = BusinessHoursConfig::default();

        assert!(evaluate("is_weekend", &[], &target, &config).is_err());
    }

    #[test]
    fn test_business_hours_weekday_inside_window() {
        let config = BusinessHoursConfig {
            timezone: "America/New_York".to_string(),
            days: vec!["mon".to_string(), "tue".to_string()],
            start_hour: 9,
            end_hour: 17,
        };

        // Monday 2024-06-03 14:00 UTC = 10:00 New York
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap();
        assert!(in_business_hours_at(&config, now).unwrap());

        // Monday 2024-06-03 02:00 UTC = Sunday 22:00 New York
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 2, 0, 0).unwrap();
        assert!(!in_business_hours_at(&config, now).unwrap());
    }

    #[test]
    fn test_business_hours_end_hour_exclusive() {
        let config = BusinessHoursConfig {
            timezone: "UTC".to_string(),
            days: vec!["wed".to_string()],
            start_hour: 9,
            end_hour: 17,
        };

        // Wednesday 2024-06-05 exactly 17:00 UTC is outside
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 17, 0, 0).unwrap();
        assert!(!in_business_hours_at(&config, now).unwrap());

        // 16:59 is inside
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 16, 59, 0).unwrap();
        assert!(in_business_hours_at(&config, now).unwrap());
    }

    #[test]
    fn test_invalid_timezone_is_error() {
        let config = BusinessHoursConfig {
            timezone: "Mars/Olympus".to_string(),
            ..BusinessHoursConfig::default()
        };
        assert!(in_business_hours_at(&config, Utc::now()).is_err());
    }
}
