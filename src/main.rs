mod app;
mod ask_llm;
mod error;
mod export;
mod extract;
mod logger;
mod model;
mod prompt;
mod quiz;
mod utils;
mod workflow;

use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info};

use app::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    // 第一个参数为配置文件路径，缺省读取 ./config.toml
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let app_config = AppConfig::load(config_path.as_deref())?;

    info!("🚀 开始测验");
    info!(
        "📊 年级 {} | {} | {} | {} 题",
        app_config.quiz.grade, app_config.quiz.subject, app_config.quiz.topic, app_config.quiz.requested_count
    );
    info!("{}", "=".repeat(60));

    if let Err(e) = workflow::run(app_config).await {
        error!("❌ 测验失败: {:#}", e);
        return Err(e);
    }

    info!("\n🎉 测验结束");
    Ok(())
}
