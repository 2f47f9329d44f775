//! Application services and ports for Quantarun.

#![forbid(unsafe_code)]

mod quantum_executor;
mod quantum_ports;

pub use quantum_executor::QuantumExecutor;
pub use quantum_ports::{LeaseCoordinator, QuantumHandler, QuantumOutcome};
