//! Stem Core - task dependency resolution and execution
//!
//! This crate provides the task and workspace model, meta verification,
//! dependency trees, the execution strategies, the task master and the
//! envelope wire format shared by local workers and remote units.

pub mod config;
pub mod envelope;
pub mod error;
pub mod master;
pub mod meta;
pub mod output;
pub mod reporter;
pub mod runner;
pub mod task;
pub mod tree;
pub mod workspace;

pub use envelope::{Envelope, Payload};
pub use error::{ConfigError, EnvelopeError, InvocationError, ResolveError, Result, StemError};
pub use master::{TaskMaster, TaskMetaError, TaskResult, TaskStatus};
pub use meta::{verify, Meta, MetaFieldError, MetaType, MetaVerification, SpecEntry, Specification};
pub use output::{Inputs, LazySeq, Output};
pub use reporter::{CollectingReporter, TaskEvent, TaskReporter, TracingReporter};
pub use runner::{
    CooperativeRunner, ExecutionMode, ProcessRunner, Runner, SequentialRunner, TaskRunner,
    ThreadedRunner, WorkerCommand,
};
pub use task::{
    source, task, Dependency, FilterTask, FnTask, MapTask, ProxyTask, ReduceTask, SourceTask, Task,
};
pub use tree::{TaskNode, TaskTree};
pub use workspace::{locate_workspace, TaskPath, Workspace, WorkspaceBuilder, WorkspaceStructure};
