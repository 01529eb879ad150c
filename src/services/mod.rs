//! Service-level operations. Each public entry point checks a connection out
//! of the pool, runs its queries and hands the connection back before
//! returning, whatever the outcome.

pub mod attendance;
pub mod employee;
pub mod insurance;
pub mod position;
pub mod salary;
