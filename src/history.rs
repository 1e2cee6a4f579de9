//! Presentation helpers for stored session history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::clock::EpochMillis;
use crate::storage::SessionRow;

/// Sessions bucketed by how long ago they started. Day boundaries are UTC
/// midnights. Sessions older than thirty days are left out.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GroupedSessions {
    pub today: Vec<SessionRow>,
    pub yesterday: Vec<SessionRow>,
    pub last_7_days: Vec<SessionRow>,
    pub last_30_days: Vec<SessionRow>,
}

impl GroupedSessions {
    pub fn len(&self) -> usize {
        self.today.len() + self.yesterday.len() + self.last_7_days.len() + self.last_30_days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-empty groups with a display heading, most recent first.
    pub fn sections(&self) -> Vec<(&'static str, &[SessionRow])> {
        [
            ("Today", self.today.as_slice()),
            ("Yesterday", self.yesterday.as_slice()),
            ("Last 7 days", self.last_7_days.as_slice()),
            ("Last 30 days", self.last_30_days.as_slice()),
        ]
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .collect()
    }
}

pub fn group_sessions_by_period(sessions: Vec<SessionRow>, now_ms: EpochMillis) -> GroupedSessions {
    let mut grouped = GroupedSessions::default();
    let Some(today) = utc_date(now_ms) else {
        log::warn!("clock reading {}ms is out of range; no sessions grouped", now_ms);
        return grouped;
    };
    for session in sessions {
        let Some(started) = utc_date(session.started_at_ms) else {
            continue;
        };
        match today.signed_duration_since(started).num_days() {
            ..=0 => grouped.today.push(session),
            1 => grouped.yesterday.push(session),
            2..=7 => grouped.last_7_days.push(session),
            8..=30 => grouped.last_30_days.push(session),
            _ => {}
        }
    }
    grouped
}

/// `in progress` for open sessions, otherwise `42s` or `3m 5s`.
pub fn format_session_duration(started_at_ms: EpochMillis, ended_at_ms: Option<EpochMillis>) -> String {
    let Some(ended) = ended_at_ms else {
        return "in progress".to_string();
    };
    let elapsed = ended.saturating_sub(started_at_ms);
    let minutes = elapsed / 60_000;
    let seconds = (elapsed % 60_000) / 1_000;
    if minutes == 0 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// `YYYY-MM-DD HH:MM` in UTC.
pub fn format_timestamp(epoch_ms: EpochMillis) -> String {
    match utc(epoch_ms) {
        Some(at) => at.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("@{}ms", epoch_ms),
    }
}

fn utc(epoch_ms: EpochMillis) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(epoch_ms).ok()?)
}

fn utc_date(epoch_ms: EpochMillis) -> Option<NaiveDate> {
    utc(epoch_ms).map(|at| at.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DirectionTally;

    // 2024-03-15 10:30 UTC
    const NOW: u64 = 1_710_498_600_000;
    const MS_PER_DAY: u64 = 86_400_000;

    fn row(id: &str, started_at_ms: u64) -> SessionRow {
        SessionRow {
            session_id: id.into(),
            user_id: "u".into(),
            started_at_ms,
            ended_at_ms: None,
            duration_seconds: None,
            total_captures: 0,
            direction_tally: DirectionTally::new(),
        }
    }

    #[test]
    fn groups_on_utc_day_boundaries() {
        let midnight = NOW - NOW % MS_PER_DAY;
        let grouped = group_sessions_by_period(
            vec![
                row("a", midnight),
                row("b", midnight - 1),
                row("c", midnight - MS_PER_DAY - 1),
                row("d", midnight - 7 * MS_PER_DAY),
                row("e", midnight - 7 * MS_PER_DAY - 1),
                row("f", midnight - 31 * MS_PER_DAY),
            ],
            NOW,
        );
        let ids = |rows: &[SessionRow]| rows.iter().map(|r| r.session_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&grouped.today), vec!["a"]);
        assert_eq!(ids(&grouped.yesterday), vec!["b"]);
        assert_eq!(ids(&grouped.last_7_days), vec!["c", "d"]);
        assert_eq!(ids(&grouped.last_30_days), vec!["e"]);
        assert_eq!(grouped.len(), 5);
        assert_eq!(grouped.sections().len(), 4);
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_session_duration(0, None), "in progress");
        assert_eq!(format_session_duration(1_000, Some(43_500)), "42s");
        assert_eq!(format_session_duration(0, Some(185_000)), "3m 5s");
        assert_eq!(format_session_duration(5_000, Some(1_000)), "0s");
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
        assert_eq!(format_timestamp(NOW), "2024-03-15 10:30");
        assert_eq!(format_timestamp(951_782_400_000), "2000-02-29 00:00");
        assert_eq!(format_timestamp(u64::MAX), format!("@{}ms", u64::MAX));
    }

    #[test]
    fn future_sessions_count_as_today() {
        let grouped = group_sessions_by_period(vec![row("later", NOW + 60_000)], NOW);
        assert_eq!(grouped.today.len(), 1);
    }
}
