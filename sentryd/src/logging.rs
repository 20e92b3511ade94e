//! Tracing setup, in the same shape as this workspace's ambient logger:
//! compact event formatting, an uptime timer, and `RUST_LOG` filtering.

use tracing_subscriber::{
    fmt::{self, format, time},
    prelude::*,
    EnvFilter,
};

struct Guard;

impl Drop for Guard {
    fn drop(&mut self) {}
}

pub fn init() -> impl Drop {
    let evt_fmt = format().with_timer(time::Uptime::default()).compact();
    let fmt_layer = fmt::layer().event_format(evt_fmt);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .init();

    Guard
}
