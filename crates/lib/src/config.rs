//! Bridge configuration, resolved from environment variables.
//!
//! Values are trimmed and an empty value counts as unset. Every missing required key is reported
//! at once so a single run of `bridge check-config` lists them all.

use crate::routing::{Route, RouteMode};
use chrono::FixedOffset;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ROUTE_COLOR: u32 = 0x5865f2;
/// Direct posts default to the shift topic's amber.
const DEFAULT_DIRECT_COLOR: u32 = 0xcc8800;
const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
const DEFAULT_GRACE_SECS: u64 = 30;
const DEFAULT_SETTLE_MS: u64 = 1500;
const DEFAULT_OFFSET_HOURS: i32 = 1;
const DEFAULT_BIND: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 15152;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required variables: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub api_base: Option<String>,
    /// Chat consulted for the album-completion check instead of the message's own chat.
    pub reference_chat_id: Option<i64>,
    /// When set, updates arrive on `POST /telegram/webhook` instead of getUpdates.
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordSettings {
    pub token: String,
    pub api_base: Option<String>,
    pub final_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub login_url: String,
    pub schedule_url: String,
    pub login: String,
    pub password: String,
    /// Closed list offered as the `/schedule` location choices; also the page order for "today".
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub telegram: TelegramSettings,
    pub discord: DiscordSettings,
    pub routes: Vec<Route>,
    pub schedule: ScheduleSettings,
    pub downloads_dir: PathBuf,
    /// `None` disables the idle-album flush.
    pub media_group_grace: Option<Duration>,
    /// Quiet time before an album's completion is checked; zero checks on every part.
    pub media_group_settle: Duration,
    pub display_offset: FixedOffset,
    pub server: ServerSettings,
}

impl Settings {
    /// "webhook" or "polling".
    pub fn telegram_mode(&self) -> &'static str {
        if self.telegram.webhook_url.is_some() {
            "webhook"
        } else {
            "polling"
        }
    }

    /// Resolve settings through `lookup` (key → raw value).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut env = Lookup {
            get: &lookup,
            missing: Vec::new(),
        };

        let bot_token = env.required("TELEGRAM_BOT_TOKEN");
        let discord_token = env.required("DISCORD_TOKEN");
        let final_channel_id = env.required("FINAL_CHANNEL_ID");
        let route_names: Vec<String> = split_list(&env.required("BRIDGE_ROUTES"));
        let route_raw: Vec<RawRoute> = route_names
            .iter()
            .map(|name| {
                let prefix = format!("ROUTE_{}", key_segment(name));
                RawRoute {
                    name: name.clone(),
                    source: env.required(&format!("{}_SOURCE", prefix)),
                    target: env.required(&format!("{}_TARGET", prefix)),
                    title: env.optional(&format!("{}_TITLE", prefix)),
                    color: env.optional(&format!("{}_COLOR", prefix)),
                    topic: env.optional(&format!("{}_TOPIC", prefix)),
                    mode: env.optional(&format!("{}_MODE", prefix)),
                    prefix,
                }
            })
            .collect();
        let schedule = ScheduleSettings {
            login_url: env.required("SCHEDULE_LOGIN_URL"),
            schedule_url: env.required("SCHEDULE_URL"),
            login: env.required("SCHEDULE_LOGIN"),
            password: env.required("SCHEDULE_PASSWORD"),
            locations: split_list(&env.required("SCHEDULE_LOCATIONS")),
        };

        if !env.missing.is_empty() {
            return Err(ConfigError::Missing(env.missing));
        }
        if route_names.is_empty() {
            return Err(invalid("BRIDGE_ROUTES", "no route names"));
        }
        if schedule.locations.is_empty() {
            return Err(invalid("SCHEDULE_LOCATIONS", "no locations"));
        }

        let routes = route_raw
            .into_iter()
            .map(RawRoute::into_route)
            .collect::<Result<Vec<_>, _>>()?;

        let reference_chat_id = env
            .optional("TELEGRAM_REFERENCE_CHAT_ID")
            .map(|v| parse_number::<i64>("TELEGRAM_REFERENCE_CHAT_ID", &v))
            .transpose()?;
        let grace_secs = env
            .optional("MEDIA_GROUP_GRACE_SECS")
            .map(|v| parse_number::<u64>("MEDIA_GROUP_GRACE_SECS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_GRACE_SECS);
        let settle_ms = env
            .optional("MEDIA_GROUP_SETTLE_MS")
            .map(|v| parse_number::<u64>("MEDIA_GROUP_SETTLE_MS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_SETTLE_MS);
        let offset_hours = env
            .optional("DISPLAY_UTC_OFFSET_HOURS")
            .map(|v| parse_number::<i32>("DISPLAY_UTC_OFFSET_HOURS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_OFFSET_HOURS);
        let display_offset = (-12..=14)
            .contains(&offset_hours)
            .then(|| FixedOffset::east_opt(offset_hours * 3600))
            .flatten()
            .ok_or_else(|| invalid("DISPLAY_UTC_OFFSET_HOURS", "must be between -12 and 14"))?;
        let port = env
            .optional("BRIDGE_PORT")
            .map(|v| parse_number::<u16>("BRIDGE_PORT", &v))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);

        Ok(Settings {
            telegram: TelegramSettings {
                bot_token,
                api_base: env.optional("TELEGRAM_API_BASE"),
                reference_chat_id,
                webhook_url: env.optional("TELEGRAM_WEBHOOK_URL"),
                webhook_secret: env.optional("TELEGRAM_WEBHOOK_SECRET"),
            },
            discord: DiscordSettings {
                token: discord_token,
                api_base: env.optional("DISCORD_API_BASE"),
                final_channel_id,
            },
            routes,
            schedule,
            downloads_dir: PathBuf::from(
                env.optional("DOWNLOADS_DIR")
                    .unwrap_or_else(|| DEFAULT_DOWNLOADS_DIR.to_string()),
            ),
            media_group_grace: (grace_secs > 0).then(|| Duration::from_secs(grace_secs)),
            media_group_settle: Duration::from_millis(settle_ms),
            display_offset,
            server: ServerSettings {
                bind: env
                    .optional("BRIDGE_BIND")
                    .unwrap_or_else(|| DEFAULT_BIND.to_string()),
                port,
            },
        })
    }
}

/// Resolve settings from the process environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    Settings::from_lookup(|key| std::env::var(key).ok())
}

struct Lookup<'a> {
    get: &'a dyn Fn(&str) -> Option<String>,
    missing: Vec<String>,
}

impl Lookup<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.get)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn required(&mut self, key: &str) -> String {
        match self.optional(key) {
            Some(v) => v,
            None => {
                self.missing.push(key.to_string());
                String::new()
            }
        }
    }
}

struct RawRoute {
    name: String,
    prefix: String,
    source: String,
    target: String,
    title: Option<String>,
    color: Option<String>,
    topic: Option<String>,
    mode: Option<String>,
}

impl RawRoute {
    fn into_route(self) -> Result<Route, ConfigError> {
        let source_key = format!("{}_SOURCE", self.prefix);
        let topic_key = format!("{}_TOPIC", self.prefix);
        let color_key = format!("{}_COLOR", self.prefix);
        let mode_key = format!("{}_MODE", self.prefix);
        let mode = match self.mode {
            Some(m) => RouteMode::parse(&m)
                .ok_or_else(|| invalid(&mode_key, "expected \"approval\" or \"direct\""))?,
            None => RouteMode::default(),
        };
        Ok(Route {
            source_chat_id: parse_number(&source_key, &self.source)?,
            topic_id: self.topic.map(|t| parse_number(&topic_key, &t)).transpose()?,
            target_channel_id: self.target,
            title: self.title.unwrap_or_else(|| self.name.clone()),
            color: match self.color {
                Some(c) => parse_color(&c).ok_or_else(|| invalid(&color_key, "expected 0xRRGGBB, #RRGGBB or decimal"))?,
                None if mode == RouteMode::Direct => DEFAULT_DIRECT_COLOR,
                None => DEFAULT_ROUTE_COLOR,
            },
            mode,
            name: self.name,
        })
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| invalid(key, format!("{:?}: {}", value, e)))
}

/// Comma list, trimmed, empties dropped.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Route name as used in variable names: "day-news" → "DAY_NEWS".
fn key_segment(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// "0x3498db", "#3498db" or "3447003"; must fit in 24 bits.
pub fn parse_color(raw: &str) -> Option<u32> {
    let s = raw.trim();
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).or_else(|| s.strip_prefix('#')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        s.parse::<u32>().ok()?
    };
    (value <= 0xff_ffff).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("DISCORD_TOKEN", "dc-token"),
            ("FINAL_CHANNEL_ID", "final-1"),
            ("BRIDGE_ROUTES", "news, day-shift"),
            ("ROUTE_NEWS_SOURCE", "-1001"),
            ("ROUTE_NEWS_TARGET", "review-1"),
            ("ROUTE_NEWS_TITLE", "📰 News"),
            ("ROUTE_NEWS_COLOR", "#3498db"),
            ("ROUTE_DAY_SHIFT_SOURCE", "-1002"),
            ("ROUTE_DAY_SHIFT_TARGET", "direct-1"),
            ("ROUTE_DAY_SHIFT_TOPIC", "3"),
            ("ROUTE_DAY_SHIFT_MODE", "direct"),
            ("SCHEDULE_LOGIN_URL", "https://shifts.example/login"),
            ("SCHEDULE_URL", "https://shifts.example/schedule"),
            ("SCHEDULE_LOGIN", "user"),
            ("SCHEDULE_PASSWORD", "pass"),
            ("SCHEDULE_LOCATIONS", "Truck A,Truck B"),
        ])
    }

    fn resolve(vars: &HashMap<&str, &str>) -> Result<Settings, ConfigError> {
        Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn resolves_routes_and_defaults() {
        let s = resolve(&base()).unwrap();
        assert_eq!(s.routes.len(), 2);
        let news = &s.routes[0];
        assert_eq!(news.name, "news");
        assert_eq!(news.source_chat_id, -1001);
        assert_eq!(news.title, "📰 News");
        assert_eq!(news.color, 0x3498db);
        assert_eq!(news.mode, RouteMode::Approval);
        let day = &s.routes[1];
        assert_eq!(day.title, "day-shift");
        assert_eq!(day.topic_id, Some(3));
        assert_eq!(day.mode, RouteMode::Direct);
        assert_eq!(day.color, DEFAULT_DIRECT_COLOR);

        assert_eq!(s.schedule.locations, vec!["Truck A", "Truck B"]);
        assert_eq!(s.downloads_dir, PathBuf::from("downloads"));
        assert_eq!(s.media_group_grace, Some(Duration::from_secs(30)));
        assert_eq!(s.media_group_settle, Duration::from_millis(1500));
        assert_eq!(s.display_offset.local_minus_utc(), 3600);
        assert_eq!(s.server.bind, "127.0.0.1");
        assert_eq!(s.server.port, 15152);
        assert_eq!(s.telegram_mode(), "polling");
    }

    #[test]
    fn reports_every_missing_key() {
        let mut vars = base();
        vars.remove("DISCORD_TOKEN");
        vars.remove("ROUTE_NEWS_TARGET");
        vars.insert("SCHEDULE_PASSWORD", "   ");
        let err = resolve(&vars).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing(vec![
                "DISCORD_TOKEN".to_string(),
                "ROUTE_NEWS_TARGET".to_string(),
                "SCHEDULE_PASSWORD".to_string(),
            ])
        );
    }

    #[test]
    fn rejects_malformed_values() {
        let mut vars = base();
        vars.insert("ROUTE_NEWS_SOURCE", "news-chat");
        assert!(matches!(resolve(&vars), Err(ConfigError::Invalid { key, .. }) if key == "ROUTE_NEWS_SOURCE"));

        let mut vars = base();
        vars.insert("ROUTE_NEWS_MODE", "sometimes");
        assert!(matches!(resolve(&vars), Err(ConfigError::Invalid { key, .. }) if key == "ROUTE_NEWS_MODE"));

        let mut vars = base();
        vars.insert("DISPLAY_UTC_OFFSET_HOURS", "20");
        assert!(resolve(&vars).is_err());
    }

    #[test]
    fn zero_grace_disables_flush_and_webhook_switches_mode() {
        let mut vars = base();
        vars.insert("MEDIA_GROUP_GRACE_SECS", "0");
        vars.insert("MEDIA_GROUP_SETTLE_MS", "0");
        vars.insert("TELEGRAM_WEBHOOK_URL", "https://bridge.example/telegram/webhook");
        let s = resolve(&vars).unwrap();
        assert_eq!(s.media_group_grace, None);
        assert!(s.media_group_settle.is_zero());
        assert_eq!(s.telegram_mode(), "webhook");
    }

    #[test]
    fn color_formats() {
        assert_eq!(parse_color("0x5865f2"), Some(0x5865f2));
        assert_eq!(parse_color("#CC8800"), Some(0xcc8800));
        assert_eq!(parse_color("3447003"), Some(3447003));
        assert_eq!(parse_color("0x1000000"), None);
        assert_eq!(parse_color("blue"), None);
    }
}
