use std::path::PathBuf;

use replacer_core::document::DocumentError;
use replacer_engine::errors::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("读取场景文件 {path:?} 失败: {source}")]
    ReadScene {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析场景文件 {path:?} 失败: {source}")]
    ParseScene {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("场景文件 {path:?} 结构无效: {source}")]
    InvalidScene {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
    #[error("场景文档结构无效: {0}")]
    InvalidDocument(#[from] DocumentError),
    #[error("写出场景文件 {path:?} 失败: {source}")]
    WriteScene {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("序列化场景失败: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("命令执行失败: {0}")]
    Command(String),
}
