//! Schedule entries and their sort keys.

use chrono::Weekday;

/// Start time used for records whose time range cannot be parsed; sorts them last within their day.
pub const UNPARSEABLE_START: u32 = 9999;

const DAY_NAMES: [(&str, Weekday); 7] = [
    ("pondělí", Weekday::Mon),
    ("úterý", Weekday::Tue),
    ("středa", Weekday::Wed),
    ("čtvrtek", Weekday::Thu),
    ("pátek", Weekday::Fri),
    ("sobota", Weekday::Sat),
    ("neděle", Weekday::Sun),
];

/// Czech day name as shown on the schedule page.
pub fn day_name(day: Weekday) -> &'static str {
    DAY_NAMES
        .iter()
        .find(|(_, d)| *d == day)
        .map(|(n, _)| *n)
        .unwrap_or("pondělí")
}

/// Monday = 0 … Sunday = 6; unknown names sort after the week (7).
pub fn day_ordinal(day: &str) -> u8 {
    let lower = day.trim().to_lowercase();
    DAY_NAMES
        .iter()
        .find(|(n, _)| lower.starts_with(n))
        .map(|(_, d)| d.num_days_from_monday() as u8)
        .unwrap_or(7)
}

/// Display bucket; the declaration order is the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShiftCategory {
    MorningPrimary,
    MorningSecondary,
    AfternoonPrimary,
    AfternoonSecondary,
}

impl ShiftCategory {
    pub const ALL: [ShiftCategory; 4] = [
        ShiftCategory::MorningPrimary,
        ShiftCategory::MorningSecondary,
        ShiftCategory::AfternoonPrimary,
        ShiftCategory::AfternoonSecondary,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShiftCategory::MorningPrimary => "☀️ Morning · primary",
            ShiftCategory::MorningSecondary => "🌤️ Morning · secondary",
            ShiftCategory::AfternoonPrimary => "🌇 Afternoon · primary",
            ShiftCategory::AfternoonSecondary => "🌙 Afternoon · secondary",
        }
    }
}

const MORNING_MARKERS: [&str; 3] = ["ran", "ráno", "dopo"];
const AFTERNOON_MARKERS: [&str; 2] = ["odpo", "večer"];
const SECONDARY_MARKERS: [&str; 3] = ["výpomoc", "záskok", "pomocn"];

/// Bucket for a position label. Labels naming the part of day win; otherwise a start before noon
/// is morning and anything else (including unparseable times) afternoon. Labels that mark a
/// helper role, or end in "2", are secondary.
pub fn classify(position: &str, start_minutes: Option<u32>) -> ShiftCategory {
    let label = position.trim().to_lowercase();
    let morning = if MORNING_MARKERS.iter().any(|m| label.contains(m)) {
        true
    } else if AFTERNOON_MARKERS.iter().any(|m| label.contains(m)) {
        false
    } else {
        start_minutes.is_some_and(|m| m < 12 * 60)
    };
    let secondary = SECONDARY_MARKERS.iter().any(|m| label.contains(m)) || label.ends_with('2');
    match (morning, secondary) {
        (true, false) => ShiftCategory::MorningPrimary,
        (true, true) => ShiftCategory::MorningSecondary,
        (false, false) => ShiftCategory::AfternoonPrimary,
        (false, true) => ShiftCategory::AfternoonSecondary,
    }
}

/// Minutes after midnight of the range start ("09:00-13:00" → 540).
pub fn parse_start_minutes(range: &str) -> Option<u32> {
    let start = range.split(['-', '–']).next()?.trim();
    let (h, m) = start.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// One scraped shift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub location: String,
    pub day: String,
    pub position: String,
    pub person: String,
    pub time_range: String,
    pub day_order: u8,
    pub category: ShiftCategory,
    pub start_minutes: u32,
}

impl ScheduleEntry {
    pub fn new(
        location: impl Into<String>,
        day: impl Into<String>,
        position: impl Into<String>,
        person: impl Into<String>,
        time_range: impl Into<String>,
    ) -> Self {
        let day = day.into();
        let position = position.into();
        let time_range = time_range.into();
        let start = parse_start_minutes(&time_range);
        if start.is_none() {
            log::debug!("schedule: unparseable time range {:?}", time_range);
        }
        Self {
            location: location.into(),
            day_order: day_ordinal(&day),
            category: classify(&position, start),
            start_minutes: start.unwrap_or(UNPARSEABLE_START),
            day,
            position,
            person: person.into(),
            time_range,
        }
    }

    pub fn sort_key(&self) -> (u8, ShiftCategory, u32) {
        (self.day_order, self.category, self.start_minutes)
    }
}

/// Stable sort by day, bucket, then start time.
pub fn sort_entries(entries: &mut [ScheduleEntry]) {
    entries.sort_by_key(ScheduleEntry::sort_key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_minutes_parsing() {
        assert_eq!(parse_start_minutes("09:00-13:00"), Some(540));
        assert_eq!(parse_start_minutes(" 7:30 – 12:00"), Some(450));
        assert_eq!(parse_start_minutes("bad-string"), None);
        assert_eq!(parse_start_minutes("25:00-26:00"), None);
    }

    #[test]
    fn malformed_time_sorts_last_in_day() {
        let mut entries = vec![
            ScheduleEntry::new("Truck A", "Pondělí", "Barista", "Eva", "bad-string"),
            ScheduleEntry::new("Truck A", "Pondělí", "Barista", "Jan", "09:00-13:00"),
        ];
        sort_entries(&mut entries);
        assert_eq!(entries[0].person, "Jan");
        assert_eq!(entries[1].person, "Eva");
        assert_eq!(entries[1].start_minutes, UNPARSEABLE_START);
    }

    #[test]
    fn day_ordering() {
        assert_eq!(day_ordinal("Pondělí"), 0);
        assert_eq!(day_ordinal("neděle 7.1."), 6);
        assert_eq!(day_ordinal("someday"), 7);
        assert_eq!(day_name(Weekday::Fri), "pátek");
    }

    #[test]
    fn classification() {
        assert_eq!(classify("Ranní", Some(900)), ShiftCategory::MorningPrimary);
        assert_eq!(classify("Odpolední výpomoc", Some(420)), ShiftCategory::AfternoonSecondary);
        assert_eq!(classify("Barista 2", Some(480)), ShiftCategory::MorningSecondary);
        assert_eq!(classify("Barista", Some(780)), ShiftCategory::AfternoonPrimary);
        assert_eq!(classify("Barista", None), ShiftCategory::AfternoonPrimary);
    }

    #[test]
    fn sorted_by_day_then_bucket_then_start() {
        let mut entries = vec![
            ScheduleEntry::new("T", "Úterý", "Barista", "d", "08:00-12:00"),
            ScheduleEntry::new("T", "Pondělí", "Barista", "c", "13:00-17:00"),
            ScheduleEntry::new("T", "Pondělí", "Barista 2", "b", "08:00-12:00"),
            ScheduleEntry::new("T", "Pondělí", "Barista", "a", "10:00-14:00"),
        ];
        sort_entries(&mut entries);
        let order: Vec<&str> = entries.iter().map(|e| e.person.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }
}
