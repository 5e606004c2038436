pub mod daily;
pub mod engine;
pub mod retry;
pub mod store;
pub mod table;

#[cfg(test)]
pub(crate) mod fixture;

pub use engine::{Standing, StandingsEngine};
pub use retry::StoreRetry;
pub use store::PointStore;
pub use table::TableSource;
