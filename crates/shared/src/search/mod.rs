pub mod filter;
pub mod query;

pub use filter::FilterSpec;
pub use query::{FlagField, NumericField, Predicate, TextField, compile};
