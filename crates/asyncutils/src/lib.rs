//! Async utilities that don't belong to any one domain crate.

mod coalesce;

pub use crate::coalesce::{Coalesce, Flight};
