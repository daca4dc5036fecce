use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTiming {
    pub remaining_sec: u64,
    pub progress_pct: u8,
    pub label: String,
}

impl MatchTiming {
    pub fn is_over(&self) -> bool {
        self.remaining_sec == 0
    }
}

/// Remaining time and progress of a timed match, from the server-issued
/// start time. Pure; call it again on every display tick.
pub fn compute_match_timing(
    started_at: Option<DateTime<Utc>>,
    duration_minutes: Option<u32>,
    now: DateTime<Utc>,
) -> Option<MatchTiming> {
    let started_at = started_at?;
    let duration_minutes = duration_minutes.filter(|d| *d > 0)?;

    let duration_ms = i64::from(duration_minutes) * 60_000;
    let start_ms = started_at.timestamp_millis();
    let end_ms = start_ms + duration_ms;
    let now_ms = now.timestamp_millis();

    let left_ms = end_ms - now_ms;
    let remaining_sec = if left_ms <= 0 {
        0
    } else {
        ((left_ms + 999) / 1000) as u64
    };

    let elapsed_ms = (now_ms - start_ms).clamp(0, duration_ms);
    let progress_pct = ((elapsed_ms as f64 / duration_ms as f64) * 100.0).round() as u8;

    let label = if remaining_sec == 0 {
        "Ended".to_string()
    } else {
        format!("{}:{:02}", remaining_sec / 60, remaining_sec % 60)
    };

    Some(MatchTiming {
        remaining_sec,
        progress_pct,
        label,
    })
}
