//! The controller's data-plane services (§4): everything that consumes
//! node frames or timer ticks and funnels its writes through
//! `StoreManager`. Nothing outside this module is permitted to hold a
//! `StoreHandle` directly.

pub mod aggregator;
pub mod effectuation;
pub mod ip_store;
pub mod lifecycle;
pub mod multiplexer;
pub mod persistence_scheduler;
pub mod roster_adapter;
pub mod roster_reconciler;
