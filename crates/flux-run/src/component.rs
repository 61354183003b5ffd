use crate::error::BoxError;
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// 组件的启动步骤
///
/// 不会收到取消信号，应该尽快返回。
#[async_trait]
pub trait Initializer: Send + Sync {
    async fn start(&self) -> Result<(), BoxError>;
}

/// 组件的关闭步骤
///
/// `token` 在关闭超时后被取消，实现应该检查它并尽快退出。
/// 忽略 `token` 的实现会在超时后继续运行，其结果被丢弃。
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn stop(&self, token: CancellationToken) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> Initializer for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn start(&self) -> Result<(), BoxError> {
        (self)().await
    }
}

#[async_trait]
impl<F, Fut> Finalizer for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn stop(&self, token: CancellationToken) -> Result<(), BoxError> {
        (self)(token).await
    }
}

/// 同时提供启动和关闭步骤的组件
#[async_trait]
pub trait Component: Send + Sync {
    /// 组件名称，用于日志
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), BoxError>;

    async fn stop(&self, token: CancellationToken) -> Result<(), BoxError>;
}
