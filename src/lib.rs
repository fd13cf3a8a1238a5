#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod catalog;
pub mod config;
pub mod event;
pub mod framework;
pub mod host;
pub mod il;
pub mod instrument;
pub mod logging;
pub mod patcher;

pub use config::FrameworkConfig;
pub use event::{Deniable, EventArgs, EventBus, Handler};
pub use framework::Framework;
