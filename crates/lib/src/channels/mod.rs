//! Connectors to the two chat services.
//!
//! Telegram is the source feed (long poll or webhook); Discord is the destination, reached over
//! REST for delivery and over the gateway websocket for reactions and slash commands.

mod discord;
mod discord_gateway;
mod inbound;
mod registry;
mod telegram;

#[cfg(test)]
pub(crate) use inbound::text_message;
pub use discord::DiscordClient;
pub use discord_gateway::{decode_dispatch, DiscordEvent, DiscordGateway, GatewayError};
pub use inbound::{InboundMessage, MediaKind, MediaRef, QuotedMessage, SenderIdentity};
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramMessage, TelegramUpdate};
