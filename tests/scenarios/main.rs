//! Scenario-based tests for stackup

mod helpers;

mod deferred_variable;
mod fatal_halt;
mod idempotency;
mod ordering;
mod probe_timing;
mod secrets;
mod soft_failure;
