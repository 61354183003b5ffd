use crate::component::{Component, Finalizer, Initializer};
use crate::error::BoxError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 一对已注册的启动/关闭步骤
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) name: Arc<str>,
    pub(crate) initializer: Arc<dyn Initializer>,
    pub(crate) finalizer: Arc<dyn Finalizer>,
}

/// 注册表：只追加，按注册顺序保存
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<Vec<Registration>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Registration>> {
        // 只有 push 操作，中毒后数据依然完整
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        name: Option<&str>,
        initializer: Arc<dyn Initializer>,
        finalizer: Arc<dyn Finalizer>,
    ) {
        let mut entries = self.lock();
        let name: Arc<str> = match name {
            Some(name) => Arc::from(name),
            None => Arc::from(format!("component-{}", entries.len())),
        };

        debug!("Registering component: {}", name);
        entries.push(Registration {
            name,
            initializer,
            finalizer,
        });
    }

    pub(crate) fn register_component<C>(&self, component: Arc<C>)
    where
        C: Component + 'static,
    {
        let name = component.name().to_string();
        self.register(
            Some(&name),
            Arc::new(StartHalf(component.clone())),
            Arc::new(StopHalf(component)),
        );
    }

    /// 在锁内复制当前注册表
    pub(crate) fn snapshot(&self) -> Vec<Registration> {
        self.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

struct StartHalf<C>(Arc<C>);

#[async_trait]
impl<C: Component> Initializer for StartHalf<C> {
    async fn start(&self) -> Result<(), BoxError> {
        self.0.start().await
    }
}

struct StopHalf<C>(Arc<C>);

#[async_trait]
impl<C: Component> Finalizer for StopHalf<C> {
    async fn stop(&self, token: CancellationToken) -> Result<(), BoxError> {
        self.0.stop(token).await
    }
}
