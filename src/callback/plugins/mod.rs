//! Built-in callback plugins

pub mod default;
pub mod null;

pub use default::{DefaultCallback, DefaultCallbackConfig};
pub use null::NullCallback;
