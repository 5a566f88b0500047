//! Keyboard Dechatter - real-time keyboard chatter filter
//!
//! Worn mechanical switches can fire twice for a single actuation. This
//! crate decides, per physical key and per event, whether a key transition
//! is genuine or a bounce artifact, cheaply enough to sit on the input path
//! of every keystroke. Installing the OS hook and reposting events is left
//! to the caller; the engine only hands back an accept/drop verdict.

pub mod config;
pub mod device;
pub mod engine;
pub mod filter;
pub mod keyboard;
pub mod pool;
pub mod report;
pub mod stats;
pub mod timing;
pub mod utils;

pub use config::Config;
pub use engine::DechatterEngine;
pub use keyboard::{KeyEventType, Verdict};
