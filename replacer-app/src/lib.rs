pub mod cli;
pub mod errors;
pub mod loader;

use errors::AppError;
use replacer_config::AppConfig;
use tracing::info;

pub use cli::RunOptions;

/// 加载场景并以选中集执行一次替换，打印结果概览。
pub fn run(config: &AppConfig, options: &RunOptions) -> Result<(), AppError> {
    info!(replacement = %options.replacement, "启动组件替换");
    cli::run(config, options)
}
