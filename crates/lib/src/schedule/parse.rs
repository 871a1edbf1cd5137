//! HTML → schedule entries.
//!
//! The schedule page lists one shift per table row: location, day, position, person, time range.
//! Header rows (`th`) and rows with fewer than five cells are skipped.

use super::entry::{sort_entries, ScheduleEntry};
use scraper::{Html, Selector};

const MIN_CELLS: usize = 5;

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            log::error!("schedule: invalid selector {}: {:?}", css, e);
            None
        }
    }
}

fn cell_text(cell: scraper::ElementRef<'_>) -> String {
    cell.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the page still shows a login form (password input present).
pub fn is_login_page(html: &str) -> bool {
    let doc = Html::parse_document(html);
    selector("input[type=password]").is_some_and(|s| doc.select(&s).next().is_some())
}

/// Parse all shift rows and sort them.
pub fn parse_schedule(html: &str) -> Vec<ScheduleEntry> {
    let doc = Html::parse_document(html);
    let (Some(rows), Some(cells)) = (selector("table tr"), selector("td")) else {
        return Vec::new();
    };
    let mut entries: Vec<ScheduleEntry> = doc
        .select(&rows)
        .filter_map(|row| {
            let values: Vec<String> = row.select(&cells).map(cell_text).collect();
            if values.len() < MIN_CELLS || values.iter().take(MIN_CELLS).all(|v| v.is_empty()) {
                return None;
            }
            let mut it = values.into_iter();
            Some(ScheduleEntry::new(
                it.next()?,
                it.next()?,
                it.next()?,
                it.next()?,
                it.next()?,
            ))
        })
        .collect();
    sort_entries(&mut entries);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::entry::UNPARSEABLE_START;

    const PAGE: &str = r#"
        <html><body>
          <table class="smeny">
            <tr><th>Lokace</th><th>Den</th><th>Pozice</th><th>Jméno</th><th>Čas</th></tr>
            <tr><td>Truck A</td><td>Úterý</td><td>Barista</td><td>Eva</td><td>09:00-13:00</td></tr>
            <tr><td>Truck A</td><td>Pondělí</td><td>Barista</td><td> Jan
                 Novák </td><td>bad-string</td></tr>
            <tr><td>Truck B</td><td>Pondělí</td><td>Barista</td><td>Ola</td><td>07:00-11:00</td></tr>
            <tr><td colspan="5">Poznámka</td></tr>
          </table>
        </body></html>"#;

    #[test]
    fn parses_rows_and_sorts() {
        let entries = parse_schedule(PAGE);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].person, "Ola");
        assert_eq!(entries[1].person, "Jan Novák");
        assert_eq!(entries[1].start_minutes, UNPARSEABLE_START);
        assert_eq!(entries[2].location, "Truck A");
        assert_eq!(entries[2].day, "Úterý");
    }

    #[test]
    fn empty_page_yields_no_entries() {
        assert!(parse_schedule("<html><body><p>Žádné směny</p></body></html>").is_empty());
    }

    #[test]
    fn login_form_detection() {
        assert!(is_login_page(r#"<form><input name="login"><input type="password" name="password"></form>"#));
        assert!(!is_login_page(PAGE));
    }
}
