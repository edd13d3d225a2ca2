use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One unit of work. Implementations are registered under the class name
/// producers put in the payload; `perform` receives the payload's argument
/// list and returns a JSON-serializable result.
#[async_trait]
pub trait Task: Send + Sync {
    async fn perform(&self, args: &[Value]) -> Result<Value>;
}

/// Maps payload class names to task implementations. The worker holds the
/// registry for the life of the process; resolution failures surface as
/// failed jobs, not worker errors.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, task: Arc<dyn Task>) {
        self.tasks.insert(class.into(), task);
    }

    pub fn resolve(&self, class: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(class).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Adapter so closures can be registered without a named type.
pub struct TaskFn<F>(pub F);

#[async_trait]
impl<F> Task for TaskFn<F>
where
    F: Fn(&[Value]) -> Result<Value> + Send + Sync,
{
    async fn perform(&self, args: &[Value]) -> Result<Value> {
        (self.0)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_resolves_registered_tasks() {
        let mut registry = TaskRegistry::new();
        assert!(registry.is_empty());
        registry.register(
            "Echo",
            Arc::new(TaskFn(|args: &[Value]| -> Result<Value> { Ok(json!(args)) })),
        );

        let task = registry.resolve("Echo").expect("registered");
        let result = task.perform(&[json!("hi")]).await.unwrap();
        assert_eq!(result, json!(["hi"]));

        assert!(registry.resolve("Missing").is_none());
        assert_eq!(registry.class_names(), vec!["Echo".to_string()]);
    }
}
