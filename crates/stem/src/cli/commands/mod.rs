//! CLI commands

mod completions;
mod distributor;
mod run;
mod send;
mod structure;
mod unit;
mod worker;

pub use completions::CompletionsCommand;
pub use distributor::DistributorCommand;
pub use run::RunCommand;
pub use send::SendCommand;
pub use structure::StructureCommand;
pub use unit::UnitCommand;
pub use worker::WorkerCommand;
