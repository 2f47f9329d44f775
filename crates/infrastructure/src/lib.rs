//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_quantum_dispatcher;
mod in_memory_lease_coordinator;
mod redis_lease_coordinator;

pub use http_quantum_dispatcher::HttpQuantumDispatcher;
pub use in_memory_lease_coordinator::InMemoryLeaseCoordinator;
pub use redis_lease_coordinator::RedisLeaseCoordinator;
