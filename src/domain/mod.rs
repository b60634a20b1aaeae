// Domain layer - pure reconciliation and accuracy logic
pub mod accuracy;
pub mod hourly;
pub mod parameter;
pub mod reconcile;
pub mod telemetry;
pub mod time;
