//! Monitoring hub for a fleet of Kea DHCP servers
//!
//! ## Modules
//!
//! - [`puller`]: timer driven recurring actions with blocking shutdown
//! - [`agentcomm`]: batched command forwarding through the machine agents
//! - [`apps::kea`]: lease statistics and host reservation pullers
//! - [`eventcenter`]: event persistence and live fan-out
//! - [`storage`]: persistence backends (in-memory, SQLite)
//! - [`api`]: Server-Sent Events endpoint

pub mod agentcomm;
pub mod api;
pub mod apps;
pub mod config;
pub mod eventcenter;
pub mod model;
pub mod puller;
pub mod storage;
pub mod util;
