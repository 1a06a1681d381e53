pub mod event_bus;
pub mod events;
pub mod log_helpers;
