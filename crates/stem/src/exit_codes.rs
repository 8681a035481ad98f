//! Exit codes for the CLI

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// A dependency of the requested task could not be resolved
pub const DEPENDENCIES_ERROR: i32 = 3;

/// The meta did not satisfy a task's specification
pub const META_ERROR: i32 = 4;

/// A task's transform failed
pub const INVOCATION_ERROR: i32 = 5;

/// A unit or distributor answered with a failure
pub const REMOTE_ERROR: i32 = 6;

/// Map a task status to the process exit code
pub fn for_status(status: stem_core::TaskStatus) -> i32 {
    use stem_core::TaskStatus;

    match status {
        TaskStatus::ContainsData => SUCCESS,
        TaskStatus::DependenciesError => DEPENDENCIES_ERROR,
        TaskStatus::MetaError => META_ERROR,
        TaskStatus::InvocationError => INVOCATION_ERROR,
    }
}
