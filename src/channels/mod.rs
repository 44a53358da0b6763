//! Outbound notification channels.

pub mod textbelt;

pub use textbelt::TextBeltProvider;
