//! 交互式拾取工具：悬停选择替换来源，左键确认后把选中集替换为该定义。
//!
//! 宿主界面通过 [`ToolHost`] 提供拾取、光标、状态栏与绘制能力，
//! 工具本身只维护 `Idle`/`Hovering` 两个状态。

use replacer_core::document::{DefinitionId, EntityId};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::processor::{ReplacementProcessor, ReplacementReport};
use crate::registry::DefinitionRegistry;
use crate::scene::Scene;
use crate::solver::ReplacementSolver;

pub const STATUS_TEXT: &str =
    "Pick component to replace the selected. Press Ctrl to disable Scale to Fit";
pub const OPERATION_NAME: &str = "Replace Components";

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
}

impl ScreenPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// 鼠标事件携带的修饰键。`copy` 对应 Ctrl（macOS 上为 Option）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub copy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Dropper,
    DropperInvalid,
}

pub trait ToolHost {
    /// 返回光标下最上层的实体。
    fn pick(&mut self, position: ScreenPoint) -> Option<EntityId>;
    fn set_cursor(&mut self, cursor: CursorKind);
    fn set_status_text(&mut self, text: &str);
    fn invalidate(&mut self);
    fn draw_text(&mut self, position: ScreenPoint, text: &str);
    fn refresh_inspectors(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ToolState {
    #[default]
    Idle,
    Hovering {
        target: EntityId,
        position: ScreenPoint,
    },
}

#[derive(Debug, Default)]
pub struct ReplaceTool {
    solver: ReplacementSolver,
    state: ToolState,
}

impl ReplaceTool {
    pub fn new(solver: ReplacementSolver) -> Self {
        Self {
            solver,
            state: ToolState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> ToolState {
        self.state
    }

    pub fn hovered(&self) -> Option<EntityId> {
        match self.state {
            ToolState::Hovering { target, .. } => Some(target),
            ToolState::Idle => None,
        }
    }

    pub fn activate(&mut self, host: &mut dyn ToolHost) {
        self.state = ToolState::Idle;
        host.set_status_text(STATUS_TEXT);
        host.invalidate();
    }

    pub fn resume(&mut self, host: &mut dyn ToolHost) {
        host.set_status_text(STATUS_TEXT);
    }

    pub fn deactivate(&mut self, host: &mut dyn ToolHost) {
        self.state = ToolState::Idle;
        host.invalidate();
    }

    /// 重新拾取；只有目标变化时才更新标签位置并刷新视图。
    pub fn on_mouse_move(&mut self, position: ScreenPoint, host: &mut dyn ToolHost) {
        let picked = host.pick(position);
        if picked == self.hovered() {
            return;
        }
        self.state = match picked {
            Some(target) => ToolState::Hovering { target, position },
            None => ToolState::Idle,
        };
        debug!(hovered = ?picked.map(EntityId::get), "悬停目标变化");
        host.invalidate();
    }

    pub fn on_set_cursor(&self, scene: &Scene, host: &mut dyn ToolHost) {
        let valid = self
            .hovered()
            .is_some_and(|target| scene.document().instance(target).is_some());
        host.set_cursor(if valid {
            CursorKind::Dropper
        } else {
            CursorKind::DropperInvalid
        });
    }

    /// 左键抬起：以悬停目标的定义替换选中集，整个替换为一次可撤销操作。
    /// 没有可用目标时返回 [`EngineError::NoTarget`]，文档与选中集保持不变。
    pub fn on_lbutton_up(
        &mut self,
        modifiers: Modifiers,
        scene: &mut Scene,
        host: &mut dyn ToolHost,
    ) -> Result<ReplacementReport, EngineError> {
        let Some(definition) = self.target_definition(scene) else {
            warn!("没有可用的替换来源");
            return Err(EngineError::NoTarget);
        };

        let preserve_scale = modifiers.copy;
        let processor = ReplacementProcessor::new(&self.solver);
        let result = scene.run_operation(OPERATION_NAME, |document, selection| {
            processor.process(document, selection, definition, preserve_scale)
        });

        host.refresh_inspectors();
        self.state = ToolState::Idle;
        host.invalidate();

        let report = result?;
        info!(
            definition = definition.get(),
            replaced = report.replaced_count(),
            preserve_scale,
            "拾取替换完成"
        );
        Ok(report)
    }

    /// 在光标处绘制悬停目标的定义名。
    pub fn draw(&self, scene: &Scene, host: &mut dyn ToolHost) {
        let ToolState::Hovering { position, .. } = self.state else {
            return;
        };
        let Some(definition) = self.target_definition(scene) else {
            return;
        };
        if let Some(definition) = scene.document().definition(definition) {
            host.draw_text(position, &definition.name);
        }
    }

    fn target_definition(&self, scene: &Scene) -> Option<DefinitionId> {
        let target = self.hovered()?;
        DefinitionRegistry::new(scene.document()).resolve(target).ok()
    }
}
