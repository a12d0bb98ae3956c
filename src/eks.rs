//! EKS update engine.

pub mod addon;
pub mod client;
pub mod gate;
pub mod gateway;
pub mod nodegroup;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod upgrade;
pub mod version;
pub mod waiter;
