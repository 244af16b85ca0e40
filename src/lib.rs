pub mod api;
pub mod clock;
pub mod command;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod domain;
pub mod state;

use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::DbPool;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::domain::fortune::EntropySeed;
use crate::domain::luck::LuckService;

/// Production wiring: UTC+8 wall clock, OS-seeded randomness, settings from `conf`.
pub fn build_dispatcher(pool: DbPool, conf: &Config) -> Dispatcher {
    let service = LuckService::new(pool, Arc::new(SystemClock), Arc::new(EntropySeed));
    Dispatcher::new(
        service,
        DispatchSettings {
            mode: conf.mode,
            leaderboard_size: conf.leaderboard_size as usize,
            allow_delete: conf.allow_delete,
        },
    )
}
