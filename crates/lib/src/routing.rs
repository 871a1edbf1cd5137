//! Source chat → destination routing table.
//!
//! Each route maps a monitored Telegram chat (optionally narrowed to one forum topic) to a Discord
//! channel plus display title and color. Approval routes post for review; direct routes publish as-is.

/// How a routed message reaches Discord.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteMode {
    /// Post to the review channel and wait for a ✅.
    #[default]
    Approval,
    /// Publish straight to the target channel.
    Direct,
}

impl RouteMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "approval" | "review" => Some(RouteMode::Approval),
            "direct" => Some(RouteMode::Direct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub source_chat_id: i64,
    /// When set, only messages in this topic are routed.
    pub topic_id: Option<i64>,
    /// Review channel for approval routes, publish channel for direct routes.
    pub target_channel_id: String,
    pub title: String,
    pub color: u32,
    pub mode: RouteMode,
}

/// Result of resolving a source message against the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    Matched(&'a Route),
    /// The chat is monitored but the message is outside every configured topic.
    OutsideTopic,
    Unmonitored,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Distinct monitored chat ids, in route order.
    pub fn monitored_chats(&self) -> Vec<i64> {
        let mut out = Vec::new();
        for r in &self.routes {
            if !out.contains(&r.source_chat_id) {
                out.push(r.source_chat_id);
            }
        }
        out
    }

    /// First route for the chat whose topic filter accepts `topic_id`.
    pub fn resolve(&self, chat_id: i64, topic_id: Option<i64>) -> RouteMatch<'_> {
        let mut monitored = false;
        for r in self.routes.iter().filter(|r| r.source_chat_id == chat_id) {
            monitored = true;
            match r.topic_id {
                None => return RouteMatch::Matched(r),
                Some(t) if Some(t) == topic_id => return RouteMatch::Matched(r),
                Some(_) => {}
            }
        }
        if monitored {
            RouteMatch::OutsideTopic
        } else {
            RouteMatch::Unmonitored
        }
    }

    /// True when some route targets this Discord channel in approval mode.
    pub fn is_review_channel(&self, channel_id: &str) -> bool {
        self.routes
            .iter()
            .any(|r| r.mode == RouteMode::Approval && r.target_channel_id == channel_id)
    }
}
