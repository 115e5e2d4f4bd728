pub mod client;
pub mod process;
pub mod state;

#[cfg(test)]
pub mod fake;

pub use client::{MeterClient, MeterCommand, MeterProfile};
pub use process::Supervisor;
pub use state::MeterStateCell;
