use crate::component::{Component, Finalizer, Initializer};
use crate::config::GroupConfig;
use crate::error::{join_outcomes, BoxError, GroupError, JoinedError, Outcome};
use crate::registry::{Registration, Registry};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 组件组：并发启动所有组件，等待外部取消后并发关闭
///
/// ```no_run
/// use flux_run::{BoxError, CancellationToken, Group, GroupConfig};
///
/// # async fn run() {
/// let group = Group::new(GroupConfig::default());
/// group.add(
///     || async { Ok::<(), BoxError>(()) },
///     |_token: CancellationToken| async { Ok::<(), BoxError>(()) },
/// );
///
/// let token = CancellationToken::new();
/// if let Err(e) = group.wait(token).await {
///     eprintln!("{}", e);
/// }
/// # }
/// ```
pub struct Group {
    config: GroupConfig,
    registry: Registry,
}

impl Group {
    pub fn new(config: GroupConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
        }
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// 注册一对启动/关闭函数
    ///
    /// 启动函数在 `wait` 中调用；关闭函数在外部取消之后、
    /// 或任意启动函数失败/超时之后调用。
    pub fn add<I, F>(&self, initializer: I, finalizer: F) -> &Self
    where
        I: Initializer + 'static,
        F: Finalizer + 'static,
    {
        self.registry
            .register(None, Arc::new(initializer), Arc::new(finalizer));
        self
    }

    /// 注册一个组件
    pub fn add_component<C>(&self, component: Arc<C>) -> &Self
    where
        C: Component + 'static,
    {
        self.registry.register_component(component);
        self
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动所有组件并阻塞到结束
    ///
    /// 1. 在启动超时内并发执行所有启动函数
    /// 2. `token` 先被取消：直接关闭，返回关闭结果
    /// 3. 启动超时：关闭，返回启动超时加关闭结果
    /// 4. 有启动函数失败：关闭，返回启动错误加关闭结果
    /// 5. 全部成功：等待 `token` 被取消，然后关闭
    ///
    /// 只有调用时已注册的组件参与本次运行。
    pub async fn wait(&self, token: CancellationToken) -> Outcome {
        let entries = self.registry.snapshot();
        info!("Starting {} components", entries.len());

        let started = Instant::now();
        let (errors_tx, mut errors_rx) = mpsc::channel(entries.len().max(1));
        let tracker = TaskTracker::new();

        for entry in &entries {
            let initializer = entry.initializer.clone();
            let name = entry.name.clone();
            let errors_tx = errors_tx.clone();

            tracker.spawn(async move {
                let result = catch_panic(async move { initializer.start().await }).await;
                if let Err(e) = result {
                    warn!("Component {} failed to start: {}", name, e);
                    // 容量等于组件数，每个任务最多发送一次
                    let _ = errors_tx.try_send(GroupError::Start(e));
                } else {
                    debug!("Component {} started", name);
                }
            });
        }
        drop(errors_tx);
        tracker.close();

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                info!("Cancelled during start, stopping components");
                self.stop(&entries).await
            }

            _ = sleep(self.config.start_timeout) => {
                error!("Start timed out after {:?}", self.config.start_timeout);
                join_outcomes(vec![GroupError::StartTimeout], self.stop(&entries).await)
            }

            _ = tracker.wait() => {
                let mut errors = Vec::new();
                while let Ok(e) = errors_rx.try_recv() {
                    errors.push(e);
                }

                if !errors.is_empty() {
                    error!("{} components failed to start, stopping components", errors.len());
                    return join_outcomes(errors, self.stop(&entries).await);
                }

                info!("All components started in {:?}, waiting for shutdown", started.elapsed());
                token.cancelled().await;

                info!("Shutdown requested, stopping components");
                self.stop(&entries).await
            }
        }
    }

    /// 按注册的逆序并发执行所有关闭函数
    ///
    /// 使用新的取消信号，不受调用方 `token` 影响，只受关闭超时限制。
    async fn stop(&self, entries: &[Registration]) -> Outcome {
        let started = Instant::now();
        let stop_token = CancellationToken::new();
        let _stop_guard = stop_token.clone().drop_guard();

        let (errors_tx, mut errors_rx) = mpsc::channel(entries.len().max(1));
        let tracker = TaskTracker::new();

        for entry in entries.iter().rev() {
            let finalizer: Arc<dyn Finalizer> = entry.finalizer.clone();
            let name = entry.name.clone();
            let errors_tx = errors_tx.clone();
            let token = stop_token.clone();

            debug!("Stopping component {}", name);
            tracker.spawn(async move {
                let result = catch_panic(async move { finalizer.stop(token).await }).await;
                if let Err(e) = result {
                    warn!("Component {} failed to stop: {}", name, e);
                    let _ = errors_tx.try_send(GroupError::Stop(e));
                }
            });
        }
        drop(errors_tx);
        tracker.close();

        let mut errors = Vec::new();

        tokio::select! {
            biased;

            _ = tracker.wait() => {
                info!("All components stopped in {:?}", started.elapsed());
            }

            _ = sleep(self.config.stop_timeout) => {
                error!("Stop timed out after {:?}", self.config.stop_timeout);
                stop_token.cancel();
                errors.push(GroupError::StopTimeout);
            }
        }

        // 只收集已经发送的错误，不再等待仍在运行的关闭函数
        while let Ok(e) = errors_rx.try_recv() {
            errors.push(e);
        }

        match JoinedError::join(errors) {
            Some(joined) => Err(joined),
            None => Ok(()),
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new(GroupConfig::default())
    }
}

/// 把回调中的 panic 转成错误
async fn catch_panic<Fut>(fut: Fut) -> Result<(), BoxError>
where
    Fut: Future<Output = Result<(), BoxError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(panic_message(panic).into()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    fn ok_start() -> impl Fn() -> futures::future::Ready<Result<(), BoxError>> + Send + Sync {
        || futures::future::ready(Ok(()))
    }

    fn ok_stop(
    ) -> impl Fn(CancellationToken) -> futures::future::Ready<Result<(), BoxError>> + Send + Sync
    {
        |_token| futures::future::ready(Ok(()))
    }

    fn cancelled_token() -> CancellationToken {
        let token = CancellationToken::new();
        token.cancel();
        token
    }

    #[tokio::test]
    async fn test_empty_group_with_cancelled_token() {
        let group = Group::default();
        assert!(group.is_empty());
        assert!(group.wait(cancelled_token()).await.is_ok());
    }

    #[tokio::test]
    async fn test_add_is_chainable() {
        let group = Group::default();
        group
            .add(ok_start(), ok_stop())
            .add(ok_start(), ok_stop())
            .add(ok_start(), ok_stop());
        assert_eq!(group.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_run_returns_ok() {
        let group = Group::default();
        group.add(ok_start(), ok_stop()).add(ok_start(), ok_stop());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        assert!(group.wait(token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_called_once_on_start_failure() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = stops.clone();

        let group = Group::default();
        group.add(
            || async { Err::<(), BoxError>("boom".into()) },
            move |_token: CancellationToken| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            },
        );

        let err = group.wait(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalizers_launched_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let group = Group::default();

        for i in 0..4 {
            let order = order.clone();
            group.add(ok_start(), move |_token: CancellationToken| {
                order.lock().unwrap().push(i);
                futures::future::ready(Ok::<(), BoxError>(()))
            });
        }

        assert!(group.wait(cancelled_token()).await.is_ok());
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_token_cancelled_on_timeout() {
        let observed = Arc::new(AtomicUsize::new(0));
        let flag = observed.clone();

        let group = Group::new(GroupConfig::default().with_stop_timeout(Duration::from_millis(50)));
        group.add(ok_start(), move |token: CancellationToken| {
            let flag = flag.clone();
            async move {
                token.cancelled().await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        });

        let err = group.wait(cancelled_token()).await.unwrap_err();
        assert_eq!(err.to_string(), "stop context deadline exceeded");
        assert!(err.has_stop_timeout());

        sleep(Duration::from_millis(1)).await;
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_token_independent_of_caller() {
        let group = Group::default();
        group.add(ok_start(), |token: CancellationToken| async move {
            if token.is_cancelled() {
                Err::<(), BoxError>("stop token already cancelled".into())
            } else {
                Ok(())
            }
        });

        assert!(group.wait(cancelled_token()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_are_reported() {
        let group = Group::default();
        group.add(
            || futures::future::lazy(|_| -> Result<(), BoxError> { panic!("init exploded") }),
            |_token: CancellationToken| {
                futures::future::lazy(|_| -> Result<(), BoxError> { panic!("stop exploded") })
            },
        );

        let err = group.wait(CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "panicked: init exploded\npanicked: stop exploded"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_after_wait_not_seen() {
        let group = Arc::new(Group::default());
        let late_stops = Arc::new(AtomicUsize::new(0));

        group.add(ok_start(), ok_stop());

        let token = CancellationToken::new();
        let waiter = {
            let group = group.clone();
            let token = token.clone();
            tokio::spawn(async move { group.wait(token).await })
        };

        // 让 wait 先拿到快照
        sleep(Duration::from_millis(10)).await;

        let counter = late_stops.clone();
        group.add(ok_start(), move |_token: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok::<(), BoxError>(()))
        });

        token.cancel();
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(late_stops.load(Ordering::SeqCst), 0);
        assert_eq!(group.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_cancelled() {
        let group = Group::default();
        group.add(ok_start(), ok_stop());

        let token = CancellationToken::new();
        let mut wait = tokio_test::task::spawn(group.wait(token.clone()));
        assert_pending!(wait.poll());

        // 初始化完成后仍然阻塞在外部取消上
        sleep(Duration::from_millis(10)).await;
        assert_pending!(wait.poll());

        token.cancel();
        let _ = wait.poll();
        sleep(Duration::from_millis(10)).await;

        let outcome = assert_ready!(wait.poll());
        assert!(outcome.is_ok());
    }

    struct EagerPanic;

    impl Initializer for EagerPanic {
        fn start<'life0, 'async_trait>(
            &'life0 self,
        ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'async_trait>>
        where
            'life0: 'async_trait,
            Self: 'async_trait,
        {
            panic!("eager init panic")
        }
    }

    impl Finalizer for EagerPanic {
        fn stop<'life0, 'async_trait>(
            &'life0 self,
            _token: CancellationToken,
        ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'async_trait>>
        where
            'life0: 'async_trait,
            Self: 'async_trait,
        {
            panic!("eager stop panic")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_panics_are_reported() {
        let group = Group::default();
        group.add(EagerPanic, EagerPanic);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = group.wait(token).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "panicked: eager init panic\npanicked: eager stop panic"
        );
        assert_eq!(err.errors()[0].phase(), crate::error::Phase::Start);
    }

    #[tokio::test]
    async fn test_cancelled_token_beats_zero_start_timeout() {
        let group = Group::new(GroupConfig::default().with_start_timeout(Duration::ZERO));
        group.add(
            || async {
                sleep(Duration::from_secs(1)).await;
                Ok::<(), BoxError>(())
            },
            ok_stop(),
        );

        let outcome = group.wait(cancelled_token()).await;
        assert!(outcome.is_ok());
    }
}
