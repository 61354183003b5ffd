use async_trait::async_trait;
use flux_run::{BoxError, CancellationToken, Component, Group, GroupConfig, SignalHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct Database {
    name: String,
}

#[async_trait]
impl Component for Database {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), BoxError> {
        println!("[{}] 连接已建立", self.name);
        Ok(())
    }

    async fn stop(&self, token: CancellationToken) -> Result<(), BoxError> {
        tokio::select! {
            _ = sleep(Duration::from_millis(200)) => {
                println!("[{}] 连接已关闭", self.name);
                Ok(())
            }
            _ = token.cancelled() => Err(format!("{} close interrupted", self.name).into()),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flux_run=debug".parse().unwrap()))
        .init();

    println!("=== FLUX 组件组启动/关闭示例 ===\n");

    // 1. 加载配置（可选的 TOML 文件）
    let config = match std::env::args().nth(1) {
        Some(path) => GroupConfig::from_toml_file(&path).unwrap_or_else(|e| {
            eprintln!("配置加载失败: {}，使用默认配置", e);
            GroupConfig::default()
        }),
        None => GroupConfig::default().with_stop_timeout(Duration::from_secs(5)),
    };
    println!("1. 启动超时: {:?}，关闭超时: {:?}\n", config.start_timeout, config.stop_timeout);

    // 2. 注册组件
    let group = Group::new(config);
    group
        .add_component(Arc::new(Database {
            name: "postgres".to_string(),
        }))
        .add(
            || async {
                println!("[http] 监听 0.0.0.0:8080");
                Ok::<(), BoxError>(())
            },
            |_token: CancellationToken| async {
                println!("[http] 停止接收请求");
                Ok::<(), BoxError>(())
            },
        );
    println!("2. 已注册 {} 个组件\n", group.len());

    // 3. Ctrl+C / SIGTERM 或 3 秒后关闭
    let handler = SignalHandler::new();
    handler.listen_for_system_signals();
    handler.cancel_after(Duration::from_secs(3));
    println!("3. 按 Ctrl+C 关闭（3 秒后自动关闭）\n");

    match group.wait(handler.token()).await {
        Ok(()) => println!("\n优雅关闭完成 ({:?})", handler.last_signal()),
        Err(e) => {
            eprintln!("\n关闭时出现错误:\n{}", e);
            std::process::exit(1);
        }
    }
}
