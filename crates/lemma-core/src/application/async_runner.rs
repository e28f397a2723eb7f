use tokio::task::JoinHandle;
use tracing::error;

use crate::application::process_manager::ServiceProcessManager;
use crate::application::service_result::ServiceResult;
use crate::error::CoreError;
use crate::types::{ModuleAddress, Parameters};

/// Runs top-level plugins for async hosts.
///
/// Each run gets its own process on tokio's blocking pool, so lock waits
/// never stall the async workers.
#[derive(Debug, Clone)]
pub struct AsyncServiceRunner {
    manager: ServiceProcessManager,
}

impl AsyncServiceRunner {
    /// Runner backed by `manager`
    pub fn new(manager: ServiceProcessManager) -> Self {
        Self { manager }
    }

    /// The backing manager
    pub fn manager(&self) -> &ServiceProcessManager {
        &self.manager
    }

    /// Start the plugin and return a handle to its result
    pub fn spawn_plugin(
        &self,
        plugin_id: impl Into<String>,
        module: ModuleAddress,
        params: Parameters,
    ) -> JoinHandle<Result<ServiceResult, CoreError>> {
        let manager = self.manager.clone();
        let plugin_id = plugin_id.into();
        tokio::task::spawn_blocking(move || manager.execute_plugin(&plugin_id, &module, params, None))
    }

    /// Run the plugin and wait for its result
    pub async fn execute_plugin(
        &self,
        plugin_id: impl Into<String>,
        module: ModuleAddress,
        params: Parameters,
    ) -> Result<ServiceResult, CoreError> {
        self.spawn_plugin(plugin_id, module, params)
            .await
            .map_err(|e| {
                error!("Service task failed to complete: {}", e);
                CoreError::ServiceExecutionError(format!("Service task failed to complete: {}", e))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::context::ServiceContext;
    use crate::config::SchedulerConfig;
    use crate::domain::registry::ModuleRegistry;
    use crate::types::ServiceDescriptor;
    use crate::ServiceExecutor;
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct Echo {
        descriptor: ServiceDescriptor,
    }

    impl ServiceExecutor for Echo {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.descriptor
        }

        fn execute(&self, context: &ServiceContext) -> Result<Option<Value>, CoreError> {
            Ok(context.parameters().get("value").cloned())
        }
    }

    fn runner() -> AsyncServiceRunner {
        let manager = ServiceProcessManager::new(ModuleRegistry::new(), SchedulerConfig::default()).unwrap();
        manager.register_plugin(Arc::new(Echo {
            descriptor: ServiceDescriptor::new("echo", "Echo", "echoing"),
        }));
        AsyncServiceRunner::new(manager)
    }

    #[tokio::test]
    async fn test_execute_plugin() {
        let runner = runner();
        let result = runner
            .execute_plugin(
                "echo",
                ModuleAddress::new("M012"),
                Parameters::new().with("value", 7),
            )
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(result.payload(), Some(&json!(7)));
        assert!(runner.manager().service_processes()[0].was_successful());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_plugins_on_one_module() {
        let runner = runner();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                runner.spawn_plugin(
                    "echo",
                    ModuleAddress::new("M012"),
                    Parameters::new().with("value", i),
                )
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_ok());
        }
        assert_eq!(runner.manager().service_processes().len(), 4);
        assert_eq!(runner.manager().arbiter().locked_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_plugin() {
        let err = runner()
            .execute_plugin("missing", ModuleAddress::new("M"), Parameters::new())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::ServiceNotFound("missing".to_string()));
    }
}
