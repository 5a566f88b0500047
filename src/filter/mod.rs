//! Chatter filtering: the per-event decision and the fast-path history

mod activity;
mod chatter;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use activity::ActivityProfile;
pub use chatter::{ChatterFilter, Evaluation, Reason};
