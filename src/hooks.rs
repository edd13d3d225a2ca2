use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::job::{FailureCause, JobPayload};

type StartupHook = Box<dyn Fn() + Send + Sync>;
type JobHook = Box<dyn Fn(&JobPayload) + Send + Sync>;
type FailureHook = Box<dyn Fn(&JobPayload, &FailureCause) + Send + Sync>;

/// Side-effect-only dispatch points around the worker lifecycle. A panicking
/// handler is logged and the loop carries on.
#[derive(Default)]
pub struct Hooks {
    before_first_fork: Option<StartupHook>,
    before_fork: Option<JobHook>,
    after_fork: Option<JobHook>,
    on_failure: Option<FailureHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_first_fork(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_first_fork = Some(Box::new(hook));
        self
    }

    pub fn with_before_fork(
        mut self,
        hook: impl Fn(&JobPayload) + Send + Sync + 'static,
    ) -> Self {
        self.before_fork = Some(Box::new(hook));
        self
    }

    pub fn with_after_fork(mut self, hook: impl Fn(&JobPayload) + Send + Sync + 'static) -> Self {
        self.after_fork = Some(Box::new(hook));
        self
    }

    pub fn with_on_failure(
        mut self,
        hook: impl Fn(&JobPayload, &FailureCause) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn before_first_fork(&self) {
        if let Some(hook) = &self.before_first_fork {
            dispatch("before_first_fork", || hook());
        }
    }

    pub fn before_fork(&self, payload: &JobPayload) {
        if let Some(hook) = &self.before_fork {
            dispatch("before_fork", || hook(payload));
        }
    }

    pub fn after_fork(&self, payload: &JobPayload) {
        if let Some(hook) = &self.after_fork {
            dispatch("after_fork", || hook(payload));
        }
    }

    pub fn on_failure(&self, payload: &JobPayload, cause: &FailureCause) {
        if let Some(hook) = &self.on_failure {
            dispatch("on_failure", || hook(payload, cause));
        }
    }
}

fn dispatch(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        tracing::error!(hook = name, "event hook panicked");
    }
}
