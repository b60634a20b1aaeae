// Presentation layer - read-only consumer API
pub mod app_state;
pub mod csv_export;
pub mod handlers;
