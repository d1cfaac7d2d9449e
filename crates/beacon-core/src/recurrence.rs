use beacon_events::ids::TaskId;
use beacon_events::types::RecurrenceRule;
use chrono::{Datelike, Days, NaiveDate};
use sha2::{Digest, Sha256};

/// Next occurrence after `from`. Monthly steps land on the same day of the
/// next month, clamped to its last day when the month is shorter (Jan 31 →
/// Feb 28, or Feb 29 in a leap year).
pub fn next_occurrence(rule: RecurrenceRule, from: NaiveDate) -> NaiveDate {
    match rule {
        RecurrenceRule::Daily => from + Days::new(1),
        RecurrenceRule::Weekly => from + Days::new(7),
        RecurrenceRule::Monthly => {
            let (year, month) = match from.month() {
                12 => (from.year() + 1, 1),
                m => (from.year(), m + 1),
            };
            let day = from.day().min(days_in_month(year, month));
            NaiveDate::from_ymd_opt(year, month, day).unwrap_or(from)
        }
    }
}

/// Token the external task store dedups `create_task` on. Stable across
/// redeliveries of the same completion event: same source task + same
/// occurrence date = same token.
pub fn dedup_token(source_task_id: &TaskId, occurrence: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_task_id.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(occurrence.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn daily_and_weekly_step_forward() {
        assert_eq!(
            next_occurrence(RecurrenceRule::Daily, date(2025, 3, 31)),
            date(2025, 4, 1)
        );
        assert_eq!(
            next_occurrence(RecurrenceRule::Weekly, date(2025, 12, 29)),
            date(2026, 1, 5)
        );
    }

    #[test]
    fn monthly_clamps_to_end_of_february() {
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(2025, 1, 31)),
            date(2025, 2, 28)
        );
    }

    #[test]
    fn monthly_clamp_respects_leap_years() {
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(2024, 1, 31)),
            date(2024, 2, 29)
        );
        // 1900 was not a leap year, 2000 was.
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(1900, 1, 31)),
            date(1900, 2, 28)
        );
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(2000, 1, 31)),
            date(2000, 2, 29)
        );
    }

    #[test]
    fn monthly_rolls_over_december() {
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(2025, 12, 15)),
            date(2026, 1, 15)
        );
    }

    #[test]
    fn monthly_clamps_thirty_one_to_thirty() {
        assert_eq!(
            next_occurrence(RecurrenceRule::Monthly, date(2025, 3, 31)),
            date(2025, 4, 30)
        );
    }

    #[test]
    fn dedup_token_is_stable_and_distinct() {
        let task = TaskId::generate();
        let a = dedup_token(&task, date(2025, 2, 28));
        let b = dedup_token(&task, date(2025, 2, 28));
        let c = dedup_token(&task, date(2025, 3, 28));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, dedup_token(&TaskId::generate(), date(2025, 2, 28)));
    }
}
