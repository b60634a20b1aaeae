// Application layer - source contracts and refresh orchestration
pub mod clock;
pub mod forecast_store;
pub mod parameter_state;
pub mod sample_source;
pub mod scheduler;
