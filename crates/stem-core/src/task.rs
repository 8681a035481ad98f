//! Task types and definitions

use std::fmt;
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use regex::Regex;
use serde_json::Value;

use crate::meta::{Meta, Specification};
use crate::output::{Inputs, Output};
use crate::workspace::{TaskPath, Workspace};

/// A named unit of computation with declared dependencies.
///
/// Tasks are shared as `Arc<dyn Task>` between workspaces, nodes and runners,
/// so implementations must be thread-safe.
pub trait Task: Send + Sync {
    /// Task name; defaults to the snake_case form of the implementing type's name
    fn name(&self) -> String {
        type_task_name(std::any::type_name::<Self>())
    }

    /// Dependencies, either names resolved in the owning workspace or direct references
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Metadata the task requires before it may run
    fn specification(&self) -> Option<&Specification> {
        None
    }

    /// Default settings attached to the task
    fn settings(&self) -> Option<&Meta> {
        None
    }

    /// The workspace this task was registered in, if any
    fn home(&self) -> Option<Arc<Workspace>> {
        None
    }

    /// Produce the task result from its meta and resolved dependency outputs
    fn transform(&self, meta: &Meta, inputs: Inputs) -> anyhow::Result<Output>;
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name()).finish()
    }
}

/// Whether two task handles point at the same task object
pub fn same_task(a: &Arc<dyn Task>, b: &Arc<dyn Task>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// One entry of a task's dependency list
#[derive(Clone)]
pub enum Dependency {
    /// A dotted path resolved in the owning workspace
    Name(String),
    /// A direct task reference
    Task(Arc<dyn Task>),
}

impl Dependency {
    /// The key under which this dependency's output is handed to the transform
    pub fn input_name(&self) -> String {
        match self {
            Dependency::Name(path) => TaskPath::new(path).name().to_string(),
            Dependency::Task(task) => task.name(),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Name(name) => f.debug_tuple("Name").field(name).finish(),
            Dependency::Task(task) => f.debug_tuple("Task").field(&task.name()).finish(),
        }
    }
}

impl From<&str> for Dependency {
    fn from(name: &str) -> Self {
        Dependency::Name(name.to_string())
    }
}

impl From<String> for Dependency {
    fn from(name: String) -> Self {
        Dependency::Name(name)
    }
}

impl From<Arc<dyn Task>> for Dependency {
    fn from(task: Arc<dyn Task>) -> Self {
        Dependency::Task(task)
    }
}

/// Convert a PascalCase identifier to snake_case
pub fn pascal_case_to_snake_case(name: &str) -> String {
    static WORD: OnceLock<Regex> = OnceLock::new();
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();

    let word = WORD.get_or_init(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
    let boundary =
        BOUNDARY.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

    let name = word.replace_all(name, "${1}_${2}");
    boundary.replace_all(&name, "${1}_${2}").to_lowercase()
}

fn type_task_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let short = base.rsplit("::").next().unwrap_or(base);
    pascal_case_to_snake_case(short)
}

type Producer = Box<dyn Fn(&Meta) -> anyhow::Result<Output> + Send + Sync>;
type PlainFn = Box<dyn Fn(&Meta, Inputs) -> anyhow::Result<Output> + Send + Sync>;
type SettingsFn = Box<dyn Fn(&Meta, &Meta, Inputs) -> anyhow::Result<Output> + Send + Sync>;

/// A dependency-free task whose transform delegates to a data producer
pub struct SourceTask {
    name: String,
    producer: Producer,
    specification: Option<Specification>,
    settings: Option<Meta>,
}

impl SourceTask {
    pub fn new<F>(name: impl Into<String>, producer: F) -> Self
    where
        F: Fn(&Meta) -> anyhow::Result<Output> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            producer: Box::new(producer),
            specification: None,
            settings: None,
        }
    }

    pub fn with_specification(mut self, specification: Specification) -> Self {
        self.specification = Some(specification);
        self
    }

    pub fn with_settings(mut self, settings: Meta) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Produce the task data
    pub fn data(&self, meta: &Meta) -> anyhow::Result<Output> {
        (self.producer)(meta)
    }
}

impl Task for SourceTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn specification(&self) -> Option<&Specification> {
        self.specification.as_ref()
    }

    fn settings(&self) -> Option<&Meta> {
        self.settings.as_ref()
    }

    fn transform(&self, meta: &Meta, _inputs: Inputs) -> anyhow::Result<Output> {
        self.data(meta)
    }
}

/// The call shape of a [`FnTask`], fixed when the task is built
pub enum Callable {
    /// `f(meta, inputs)`
    Plain(PlainFn),
    /// `f(settings, meta, inputs)`; settings default to an empty meta
    WithSettings(SettingsFn),
}

/// A task backed by a closure with explicitly named dependencies
pub struct FnTask {
    name: String,
    dependencies: Vec<Dependency>,
    callable: Callable,
    specification: Option<Specification>,
    settings: Option<Meta>,
}

impl FnTask {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Meta, Inputs) -> anyhow::Result<Output> + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::Plain(Box::new(func)))
    }

    /// A task whose closure also receives the task settings
    pub fn with_settings_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Meta, &Meta, Inputs) -> anyhow::Result<Output> + Send + Sync + 'static,
    {
        Self::from_callable(name, Callable::WithSettings(Box::new(func)))
    }

    pub fn from_callable(name: impl Into<String>, callable: Callable) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            callable,
            specification: None,
            settings: None,
        }
    }

    /// Add a dependency
    pub fn depends_on(mut self, dependency: impl Into<Dependency>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_specification(mut self, specification: Specification) -> Self {
        self.specification = Some(specification);
        self
    }

    pub fn with_settings(mut self, settings: Meta) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl Task for FnTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }

    fn specification(&self) -> Option<&Specification> {
        self.specification.as_ref()
    }

    fn settings(&self) -> Option<&Meta> {
        self.settings.as_ref()
    }

    fn transform(&self, meta: &Meta, inputs: Inputs) -> anyhow::Result<Output> {
        match &self.callable {
            Callable::Plain(func) => func(meta, inputs),
            Callable::WithSettings(func) => {
                let empty = Meta::new();
                func(self.settings.as_ref().unwrap_or(&empty), meta, inputs)
            }
        }
    }
}

/// Build a source task from a closure returning a JSON value
pub fn source<F, V>(name: impl Into<String>, func: F) -> Arc<dyn Task>
where
    F: Fn(&Meta) -> anyhow::Result<V> + Send + Sync + 'static,
    V: Into<Value>,
{
    Arc::new(SourceTask::new(name, move |meta| {
        func(meta).map(|v| Output::Value(v.into()))
    }))
}

/// Build a function task from a closure over its meta and inputs
pub fn task<F>(
    name: impl Into<String>,
    dependencies: &[&str],
    func: F,
) -> Arc<dyn Task>
where
    F: Fn(&Meta, Inputs) -> anyhow::Result<Output> + Send + Sync + 'static,
{
    let task = dependencies
        .iter()
        .fold(FnTask::new(name, func), |task, dep| task.depends_on(*dep));
    Arc::new(task)
}

/// Lazily applies a function to every item of its dependency's output
pub struct MapTask {
    name: String,
    dependency: Dependency,
    func: Arc<dyn Fn(Value) -> Value + Send + Sync>,
}

impl MapTask {
    pub fn new<F>(func: F, dependency: impl Into<Dependency>) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let dependency = dependency.into();
        Self {
            name: format!("map_{}", dependency.input_name()),
            dependency,
            func: Arc::new(func),
        }
    }
}

impl Task for MapTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![self.dependency.clone()]
    }

    fn transform(&self, _meta: &Meta, mut inputs: Inputs) -> anyhow::Result<Output> {
        let items = inputs.take(&self.dependency.input_name())?.into_items()?;
        let func = Arc::clone(&self.func);
        Ok(Output::seq(items.map(move |item| func(item))))
    }
}

/// Lazily keeps the items of its dependency's output matching a predicate
pub struct FilterTask {
    name: String,
    dependency: Dependency,
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl FilterTask {
    pub fn new<F>(predicate: F, dependency: impl Into<Dependency>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let dependency = dependency.into();
        Self {
            name: format!("filter_{}", dependency.input_name()),
            dependency,
            predicate: Arc::new(predicate),
        }
    }
}

impl Task for FilterTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![self.dependency.clone()]
    }

    fn transform(&self, _meta: &Meta, mut inputs: Inputs) -> anyhow::Result<Output> {
        let items = inputs.take(&self.dependency.input_name())?.into_items()?;
        let predicate = Arc::clone(&self.predicate);
        Ok(Output::seq(items.filter(move |item| predicate(item))))
    }
}

/// Folds the items of its dependency's output, first item as the seed
pub struct ReduceTask {
    name: String,
    dependency: Dependency,
    func: Arc<dyn Fn(Value, Value) -> Value + Send + Sync>,
}

impl ReduceTask {
    pub fn new<F>(func: F, dependency: impl Into<Dependency>) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        let dependency = dependency.into();
        Self {
            name: format!("reduce_{}", dependency.input_name()),
            dependency,
            func: Arc::new(func),
        }
    }
}

impl Task for ReduceTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        vec![self.dependency.clone()]
    }

    fn transform(&self, _meta: &Meta, mut inputs: Inputs) -> anyhow::Result<Output> {
        let mut items = inputs.take(&self.dependency.input_name())?.into_items()?;
        let seed = items
            .next()
            .ok_or_else(|| anyhow!("reduce of empty sequence with no initial value"))?;
        Ok(Output::Value(items.fold(seed, |acc, item| (self.func)(acc, item))))
    }
}

/// A renamed view of another task; all behaviour is delegated
pub struct ProxyTask {
    name: String,
    inner: Arc<dyn Task>,
}

impl ProxyTask {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Task>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Task> {
        &self.inner
    }
}

impl Task for ProxyTask {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.inner.dependencies()
    }

    fn specification(&self) -> Option<&Specification> {
        self.inner.specification()
    }

    fn settings(&self) -> Option<&Meta> {
        self.inner.settings()
    }

    fn transform(&self, meta: &Meta, inputs: Inputs) -> anyhow::Result<Output> {
        self.inner.transform(meta, inputs)
    }
}
