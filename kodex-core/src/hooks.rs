//! Lifecycle interceptors chained by priority. A hook chain threads one
//! value through every registered hook in turn — "the value becomes the
//! input to the next hook" — and the three failure strategies below decide
//! what happens when a hook rejects that value.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct HookError(pub String);

#[derive(Debug, Error)]
#[error("{} hook(s) failed: {}", .0.len(), .0.iter().map(|e| e.0.as_str()).collect::<Vec<_>>().join("; "))]
pub struct AggregatedHookError(pub Vec<HookError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStrategy {
    /// First failure propagates and stops further hooks.
    FailFast,
    /// Every hook runs regardless of earlier failures; a single
    /// aggregated error is raised at the end if any failed.
    CollectErrors,
    /// Failures are logged and skipped; the chain always succeeds.
    SkipFailed,
}

#[async_trait]
pub trait Hook<T>: Send + Sync {
    /// Display name used in logs when a hook is skipped or fails.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    async fn call(&self, value: T) -> Result<T, HookError>;
}

/// An ordered, priority-sorted sequence of hooks for a single extension
/// point (e.g. `beforeUserCreate`), bound to one value type.
pub struct HookChain<T> {
    hooks: Vec<Arc<dyn Hook<T>>>,
    strategy: FailureStrategy,
}

impl<T: Clone + Send + 'static> HookChain<T> {
    pub fn new(strategy: FailureStrategy) -> Self {
        Self {
            hooks: Vec::new(),
            strategy,
        }
    }

    pub fn register(&mut self, hook: Arc<dyn Hook<T>>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    pub async fn run(&self, value: T) -> Result<T, AggregatedHookError> {
        match self.strategy {
            FailureStrategy::FailFast => self.run_fail_fast(value).await,
            FailureStrategy::CollectErrors => self.run_collect_errors(value).await,
            FailureStrategy::SkipFailed => Ok(self.run_skip_failed(value).await),
        }
    }

    async fn run_fail_fast(&self, mut value: T) -> Result<T, AggregatedHookError> {
        for hook in &self.hooks {
            value = hook
                .call(value)
                .await
                .map_err(|err| AggregatedHookError(vec![err]))?;
        }
        Ok(value)
    }

    async fn run_collect_errors(&self, mut value: T) -> Result<T, AggregatedHookError> {
        let mut errors = Vec::new();
        for hook in &self.hooks {
            match hook.call(value.clone()).await {
                Ok(next) => value = next,
                Err(err) => errors.push(err),
            }
        }
        if errors.is_empty() {
            Ok(value)
        } else {
            Err(AggregatedHookError(errors))
        }
    }

    async fn run_skip_failed(&self, mut value: T) -> T {
        for hook in &self.hooks {
            match hook.call(value.clone()).await {
                Ok(next) => value = next,
                Err(err) => warn!(hook = hook.name(), error = %err, "hook failed, skipping"),
            }
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Uppercase;
    #[async_trait]
    impl Hook<String> for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn priority(&self) -> i32 {
            0
        }
        async fn call(&self, value: String) -> Result<String, HookError> {
            Ok(value.to_uppercase())
        }
    }

    struct RejectIfEmpty;
    #[async_trait]
    impl Hook<String> for RejectIfEmpty {
        fn name(&self) -> &str {
            "reject-empty"
        }
        fn priority(&self) -> i32 {
            -10
        }
        async fn call(&self, value: String) -> Result<String, HookError> {
            if value.trim().is_empty() {
                Err(HookError("value is empty".to_string()))
            } else {
                Ok(value)
            }
        }
    }

    #[tokio::test]
    async fn hooks_run_in_priority_order() {
        let mut chain = HookChain::new(FailureStrategy::FailFast);
        chain.register(Arc::new(Uppercase));
        chain.register(Arc::new(RejectIfEmpty));
        let result = chain.run("hello".to_string()).await.unwrap();
        assert_eq!(result, "HELLO");
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_failure() {
        let mut chain = HookChain::new(FailureStrategy::FailFast);
        chain.register(Arc::new(RejectIfEmpty));
        chain.register(Arc::new(Uppercase));
        let result = chain.run("   ".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn skip_failed_always_succeeds_with_last_good_value() {
        let mut chain = HookChain::new(FailureStrategy::SkipFailed);
        chain.register(Arc::new(RejectIfEmpty));
        chain.register(Arc::new(Uppercase));
        let result = chain.run("   ".to_string()).await.unwrap();
        assert_eq!(result, "   ".to_uppercase());
    }

    #[tokio::test]
    async fn collect_errors_runs_every_hook_and_aggregates() {
        struct AlwaysFail;
        #[async_trait]
        impl Hook<String> for AlwaysFail {
            fn name(&self) -> &str {
                "always-fail"
            }
            async fn call(&self, _value: String) -> Result<String, HookError> {
                Err(HookError("nope".to_string()))
            }
        }
        let mut chain = HookChain::new(FailureStrategy::CollectErrors);
        chain.register(Arc::new(AlwaysFail));
        chain.register(Arc::new(AlwaysFail));
        let result = chain.run("x".to_string()).await;
        assert_eq!(result.unwrap_err().0.len(), 2);
    }
}
