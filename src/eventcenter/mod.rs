//! Event center: persistence and live fan-out of fleet events
//!
//! ## Architecture Overview
//!
//! ```text
//!   StatsPuller   HostsPuller   ...
//!        │             │
//!        └──── add_*_event (EventCenter trait) ────┐
//!                                                  ▼
//!                                   ┌──────────────────────────┐
//!                                   │ writer task (single)     │
//!                                   │ Storage::add_event       │
//!                                   └────────────┬─────────────┘
//!                                                │ persisted events, in order
//!                                   ┌────────────▼─────────────┐
//!                                   │ Broker                   │
//!                                   └───┬──────────┬───────────┘
//!                                       ▼          ▼
//!                                  Subscriber  Subscriber   (bounded, drop on full)
//! ```

pub mod broker;
pub mod center;
pub mod tags;

pub use broker::{Broker, Subscriber};
pub use center::{EventCenter, EventCenterHandle, EventCenterService};
pub use tags::{Related, create_event};
