pub mod comparator;
pub mod engine;
pub mod finding;
pub mod form;
pub mod marker;
pub mod mutator;
pub mod report;
pub mod result_aggregator;
pub mod state;
pub mod store;
pub mod throttle;
