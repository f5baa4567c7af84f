//! Outbound event plumbing (mechanics only).
//!
//! The stock engine notifies external collaborators (accounting valuation,
//! notification/messaging, scrap and inventory-adjustment modules) through
//! a publish/subscribe boundary. This crate holds the transport-agnostic
//! mechanics; the domain event payloads live with the code that emits them
//! (see `stockflow-rules::MoveStateChanged`).

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
