pub mod auth;
pub mod availability;
pub mod calendar;
pub mod config;
pub mod fallback;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod slots;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
