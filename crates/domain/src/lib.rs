//! Domain entities for lease-guarded task quantum execution.

#![forbid(unsafe_code)]

mod lease;
mod quantum;

pub use lease::Lease;
pub use quantum::{TaskQuantum, TaskQuantumInput};
