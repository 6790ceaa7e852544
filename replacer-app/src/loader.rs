use std::fs;
use std::path::{Path, PathBuf};

use replacer_core::document::{Document, EntityId};
use replacer_engine::scene::{DemoEntities, Scene};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;

/// 场景快照文件：文档与选中集，以 JSON 保存。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub document: Document,
    #[serde(default)]
    pub selection: Vec<EntityId>,
}

impl SceneSnapshot {
    pub fn capture(scene: &Scene) -> Self {
        Self {
            document: scene.document().clone(),
            selection: scene.selection().to_vec(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path).map_err(|source| AppError::ReadScene {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Self =
            serde_json::from_str(&content).map_err(|source| AppError::ParseScene {
                path: path.to_path_buf(),
                source,
            })?;
        snapshot
            .document
            .validate()
            .map_err(|source| AppError::InvalidScene {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(snapshot)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), AppError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| AppError::WriteScene {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 重建场景；文档结构无效或选中集里引用了不存在的实体时返回错误。
    pub fn into_scene(self) -> Result<Scene, AppError> {
        self.document.validate()?;
        let mut scene = Scene::with_document(self.document);
        for id in self.selection {
            scene.select(id)?;
        }
        Ok(scene)
    }
}

/// 场景来源，便于 CLI 呈现加载信息。
#[derive(Debug, Clone)]
pub enum SceneSource {
    File(PathBuf),
    Demo,
}

#[derive(Debug)]
pub struct LoadedScene {
    pub scene: Scene,
    pub source: SceneSource,
    pub demo_entities: Option<DemoEntities>,
}

/// 指定了场景文件时从文件加载，否则构建内置示例并选中其中全部实体。
pub fn load_scene(path: Option<&Path>) -> Result<LoadedScene, AppError> {
    if let Some(path) = path {
        let scene = SceneSnapshot::from_file(path)?.into_scene()?;
        info!(path = %path.display(), selected = scene.selection_len(), "从文件加载场景");
        return Ok(LoadedScene {
            scene,
            source: SceneSource::File(path.to_path_buf()),
            demo_entities: None,
        });
    }

    let mut scene = Scene::new();
    let demo_entities = scene.populate_demo()?;
    for id in [
        demo_entities.chair,
        demo_entities.turned_chair,
        demo_entities.crate_group,
        demo_entities.poster,
        demo_entities.stool,
        demo_entities.floor,
    ] {
        scene.select(id)?;
    }

    Ok(LoadedScene {
        scene,
        source: SceneSource::Demo,
        demo_entities: Some(demo_entities),
    })
}
