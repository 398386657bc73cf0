pub mod connection;
pub mod notifier;

pub use notifier::{Notifier, Publisher};
