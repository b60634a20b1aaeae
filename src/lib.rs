// Forecast reconciliation and accuracy engine for the reservoir dashboard
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
