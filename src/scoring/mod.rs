pub mod aggregate;
pub mod policy;
pub mod tally;

pub use aggregate::{Aggregate, Aggregator, PredictionDetail};
pub use policy::{ScoringPolicy, DEFAULT_QUANTUM};
pub use tally::{Averages, Tally};
