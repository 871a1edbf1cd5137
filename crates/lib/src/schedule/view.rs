//! Query views over scraped entries: per-location breakdowns and the "today" pager.

use super::entry::{day_name, ScheduleEntry, ShiftCategory};
use super::scrape::ScrapeOutcome;
use crate::delivery::Embed;
use chrono::{DateTime, Datelike, FixedOffset};

pub const PREVIOUS_EMOJI: &str = "⬅️";
pub const NEXT_EMOJI: &str = "➡️";

const SCHEDULE_COLOR: u32 = 0x8b5a2b;
const NO_DATA: &str = "No schedule data available.";
const LOGIN_FAILED: &str = "Login to the schedule system failed.";
const FETCH_FAILED: &str = "The schedule could not be loaded right now.";

/// Lines per bucket for a set of entries (already sorted), skipping empty buckets.
fn bucket_lines<'a>(entries: impl Iterator<Item = &'a ScheduleEntry> + Clone) -> String {
    let mut out = Vec::new();
    for category in ShiftCategory::ALL {
        let lines: Vec<String> = entries
            .clone()
            .filter(|e| e.category == category)
            .map(|e| format!("{} · {} ({})", e.person, e.position, e.time_range))
            .collect();
        if lines.is_empty() {
            continue;
        }
        out.push(format!("**{}**\n{}", category.label(), lines.join("\n")));
    }
    out.join("\n")
}

pub fn no_data_embed() -> Embed {
    Embed::new("Schedule", SCHEDULE_COLOR).description(NO_DATA)
}

pub fn login_failed_embed() -> Embed {
    Embed::new("Schedule", SCHEDULE_COLOR).description(LOGIN_FAILED)
}

pub fn fetch_failed_embed() -> Embed {
    Embed::new("Schedule", SCHEDULE_COLOR).description(FETCH_FAILED)
}

/// Embed for a scrape outcome that carries no usable entries, if that is the case.
pub fn unusable_outcome(outcome: &ScrapeOutcome) -> Option<Embed> {
    match outcome {
        ScrapeOutcome::LoginFailed => Some(login_failed_embed()),
        ScrapeOutcome::Loaded(e) if e.is_empty() => Some(no_data_embed()),
        ScrapeOutcome::Loaded(_) => None,
    }
}

/// Week breakdown for one location: one field per day, buckets inside.
pub fn render_location(entries: &[ScheduleEntry], location: &str) -> Embed {
    let mine: Vec<&ScheduleEntry> = entries.iter().filter(|e| e.location == location).collect();
    if mine.is_empty() {
        return Embed::new(format!("🚚 {}", location), SCHEDULE_COLOR).description(NO_DATA);
    }
    let mut embed = Embed::new(format!("🚚 {}", location), SCHEDULE_COLOR);
    let mut days: Vec<(u8, &str)> = Vec::new();
    for e in &mine {
        if !days.iter().any(|(o, d)| *o == e.day_order && *d == e.day) {
            days.push((e.day_order, e.day.as_str()));
        }
    }
    days.sort_by_key(|(o, _)| *o);
    for (order, day) in days {
        let lines = bucket_lines(mine.iter().copied().filter(|e| e.day_order == order && e.day == day));
        embed = embed.field(day, lines, false);
    }
    embed
}

/// One location's entries for a single day.
pub fn render_location_day(entries: &[ScheduleEntry], location: &str, day_order: u8) -> Embed {
    let day = entries
        .iter()
        .find(|e| e.day_order == day_order)
        .map(|e| e.day.clone())
        .unwrap_or_default();
    let lines = bucket_lines(
        entries
            .iter()
            .filter(|e| e.location == location && e.day_order == day_order),
    );
    let embed = Embed::new(format!("🚚 {} · {}", location, day), SCHEDULE_COLOR);
    if lines.is_empty() {
        embed.description(NO_DATA)
    } else {
        embed.description(lines)
    }
}

/// Day ordinal (Monday = 0) of `now`.
pub fn today_order(now: DateTime<FixedOffset>) -> u8 {
    now.weekday().num_days_from_monday() as u8
}

pub fn today_name(now: DateTime<FixedOffset>) -> &'static str {
    day_name(now.weekday())
}

/// Locations with entries on `day_order`, ordered by the configured list, then unknown ones by name.
pub fn locations_for_day(entries: &[ScheduleEntry], day_order: u8, known: &[String]) -> Vec<String> {
    let mut present: Vec<String> = Vec::new();
    for e in entries.iter().filter(|e| e.day_order == day_order) {
        if !present.contains(&e.location) {
            present.push(e.location.clone());
        }
    }
    present.sort_by_key(|loc| {
        let idx = known.iter().position(|k| k == loc).unwrap_or(known.len());
        (idx, loc.clone())
    });
    present
}

/// Paged view cycling locations for one day; wraps at both ends.
#[derive(Debug, Clone)]
pub struct Pager {
    pages: Vec<Embed>,
    index: usize,
}

impl Pager {
    /// Build pages for `day_order`; `None` if no location has entries that day.
    pub fn for_day(entries: &[ScheduleEntry], day_order: u8, known: &[String]) -> Option<Self> {
        let locations = locations_for_day(entries, day_order, known);
        if locations.is_empty() {
            return None;
        }
        let total = locations.len();
        let pages = locations
            .iter()
            .enumerate()
            .map(|(i, loc)| {
                render_location_day(entries, loc, day_order).footer(format!("{}/{}", i + 1, total))
            })
            .collect();
        Some(Self { pages, index: 0 })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&Embed> {
        self.pages.get(self.index)
    }

    pub fn next(&mut self) -> Option<&Embed> {
        if self.pages.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.pages.len();
        self.current()
    }

    pub fn previous(&mut self) -> Option<&Embed> {
        if self.pages.is_empty() {
            return None;
        }
        self.index = (self.index + self.pages.len() - 1) % self.pages.len();
        self.current()
    }

    /// Turn the page for a navigation emoji; `None` for any other emoji.
    pub fn turn(&mut self, emoji: &str) -> Option<&Embed> {
        match emoji {
            PREVIOUS_EMOJI => self.previous(),
            NEXT_EMOJI => self.next(),
            _ => None,
        }
    }
}
