//! Shift schedule: scrape, parse, sort and present as query views.
//!
//! Each successful scrape replaces the whole entry list; there is no incremental update.

mod entry;
mod parse;
mod scrape;
mod view;

pub use entry::{
    classify, day_name, day_ordinal, parse_start_minutes, sort_entries, ScheduleEntry, ShiftCategory,
    UNPARSEABLE_START,
};
pub use parse::{is_login_page, parse_schedule};
pub use scrape::{HttpScheduleSource, ScheduleSource, ScrapeError, ScrapeOutcome};
pub use view::{
    fetch_failed_embed, locations_for_day, login_failed_embed, no_data_embed, render_location, render_location_day,
    today_name, today_order, unusable_outcome, Pager, NEXT_EMOJI, PREVIOUS_EMOJI,
};
