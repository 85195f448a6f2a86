pub mod audit;
pub mod common;
pub mod conflicts;
pub mod evaluations;
pub mod session;
pub mod sync;
