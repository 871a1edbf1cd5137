//! The bridge: consumer loop, event dispatch and the HTTP endpoint.
//!
//! All mutable state (pending albums, tracked reviews, open pagers) is owned by [`Bridge`] and
//! touched only from the loop in [`run_loop`]. Network calls run in spawned tasks.

mod dispatch;
mod server;

pub use dispatch::{
    schedule_commands, Bridge, Completion, ScheduleReply, ScheduleRequest, SCHEDULE_COMMAND, SCHEDULE_TODAY_COMMAND,
};
pub use server::{http_router, run_bridge, run_loop, HttpState};
