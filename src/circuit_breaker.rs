use failsafe::backoff::Exponential;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker guarding one external collaborator (geocoder or road router).
pub type CollaboratorBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for collaborator calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures trips the breaker.
/// - **Backoff**: exponential from 10s to 60s before a trial call is let through.
///
/// While open, calls are rejected immediately and callers fall back to their
/// degraded path (region centroids, straight-line segments).
pub fn create_collaborator_circuit_breaker() -> CollaboratorBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
