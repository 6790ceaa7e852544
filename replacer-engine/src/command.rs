use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::processor::{ReplacementProcessor, ReplacementReport};
use crate::scene::Scene;
use crate::solver::{ReplacementSolver, SolverSettings};
use crate::tool::OPERATION_NAME;

/// `component_replacer` 的可选参数：保持原有变换，不做缩放适配。
pub const KEEP_SCALE_ARG: &str = "keep_scale";

#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub name: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse;
}

pub struct CommandContext<'a> {
    pub scene: &'a mut Scene,
    /// 最近一次替换命令的结果，供调用方展示明细。
    pub last_report: Option<ReplacementReport>,
}

impl<'a> CommandContext<'a> {
    pub fn new(scene: &'a mut Scene) -> Self {
        Self {
            scene,
            last_report: None,
        }
    }
}

pub struct CommandBus {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self::with_solver_settings(SolverSettings::default())
    }

    pub fn with_solver_settings(settings: SolverSettings) -> Self {
        let mut bus = Self {
            handlers: HashMap::new(),
        };
        bus.register(ReplaceComponentsCommand {
            solver: ReplacementSolver::new(settings),
        });
        bus.register(ClearSelectionCommand);
        bus.register(UndoCommand);
        bus
    }

    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.name(), Box::new(handler));
    }

    pub fn dispatch(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        if let Some(handler) = self.handlers.get(request.name.as_str()) {
            debug!(command = %request.name, args = ?request.args, "分发命令");
            handler.execute(request, context)
        } else {
            CommandResponse::err(format!("未知命令: {}", request.name))
        }
    }

    pub fn available_commands(&self) -> impl Iterator<Item = &&'static str> {
        self.handlers.keys()
    }
}

/// 以指定名称的定义替换当前选中集：`component_replacer <定义名> [keep_scale]`。
struct ReplaceComponentsCommand {
    solver: ReplacementSolver,
}

impl CommandHandler for ReplaceComponentsCommand {
    fn name(&self) -> &'static str {
        "component_replacer"
    }

    fn execute(
        &self,
        request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        let Some(name) = request.args.first() else {
            return CommandResponse::err("缺少替换来源的定义名");
        };
        let Some(definition) = context.scene.document().definition_by_name(name) else {
            return CommandResponse::err(format!("未找到定义: {name}"));
        };
        let preserve_scale = request.args[1..].iter().any(|arg| arg == KEEP_SCALE_ARG);
        if context.scene.selection().is_empty() {
            return CommandResponse::err("当前没有选中任何实体");
        }

        let processor = ReplacementProcessor::new(&self.solver);
        let result = context
            .scene
            .run_operation(OPERATION_NAME, |document, selection| {
                processor.process(document, selection, definition, preserve_scale)
            });
        match result {
            Ok(report) => {
                let message = summarize(name, &report);
                context.last_report = Some(report);
                CommandResponse::ok(message)
            }
            Err(err) => CommandResponse::err(format!("替换失败，已回滚: {err}")),
        }
    }
}

fn summarize(name: &str, report: &ReplacementReport) -> String {
    let mut message = format!(
        "已用 {name} 替换 {} 个实体，跳过 {} 个",
        report.replaced.len(),
        report.skipped.len()
    );
    for (id, reason) in &report.skipped {
        let _ = write!(message, "\n  - 实体 {} 跳过: {reason}", id.get());
    }
    message
}

struct ClearSelectionCommand;

impl CommandHandler for ClearSelectionCommand {
    fn name(&self) -> &'static str {
        "clear_selection"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        context.scene.clear_selection();
        CommandResponse::ok("选中集已清空")
    }
}

struct UndoCommand;

impl CommandHandler for UndoCommand {
    fn name(&self) -> &'static str {
        "undo"
    }

    fn execute(
        &self,
        _request: &CommandRequest,
        context: &mut CommandContext<'_>,
    ) -> CommandResponse {
        match context.scene.undo() {
            Ok(name) => CommandResponse::ok(format!("已撤销: {name}")),
            Err(err) => CommandResponse::err(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use replacer_core::document::InstanceKind;

    use super::*;
    use crate::errors::SkipReason;
    use crate::scene::Scene;
    use crate::solver::PlanarPolicy;

    #[test]
    fn replace_and_undo_commands_work() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().expect("populate demo");
        scene.select(ids.chair).expect("select chair");
        scene.select(ids.poster).expect("select poster");
        scene.select(ids.floor).expect("select floor");

        let bus = CommandBus::new();
        let mut context = CommandContext::new(&mut scene);

        let replace = CommandRequest::new("component_replacer").with_arg("Stool");
        let response = bus.dispatch(&replace, &mut context);
        assert!(response.success, "{:?}", response.message);

        let report = context.last_report.take().expect("替换结果");
        assert_eq!(report.replaced_count(), 1);
        assert_eq!(report.skip_reason(ids.poster), Some(SkipReason::IncompatibleGeometry));
        assert_eq!(report.skip_reason(ids.floor), Some(SkipReason::NotReplaceable));
        assert_eq!(
            context.scene.document().instance(ids.chair).map(|i| i.kind),
            Some(InstanceKind::Component {
                definition: ids.stool_definition
            })
        );

        let response = bus.dispatch(&CommandRequest::new("undo"), &mut context);
        assert!(response.success);
        assert_eq!(
            context.scene.document().instance(ids.chair).map(|i| i.definition_link()),
            context.scene.document().definition_by_name("Chair")
        );

        let response = bus.dispatch(&CommandRequest::new("undo"), &mut context);
        assert!(!response.success);
    }

    #[test]
    fn keep_scale_argument_preserves_transform() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().expect("populate demo");
        scene.select(ids.turned_chair).expect("select chair");
        let before = scene.document().instance(ids.turned_chair).expect("chair").transform;

        let bus = CommandBus::new();
        let mut context = CommandContext::new(&mut scene);
        let request = CommandRequest::new("component_replacer")
            .with_arg("Stool")
            .with_arg(KEEP_SCALE_ARG);
        assert!(bus.dispatch(&request, &mut context).success);
        assert_eq!(
            context.scene.document().instance(ids.turned_chair).map(|i| i.transform),
            Some(before)
        );
    }

    #[test]
    fn solver_settings_flow_into_the_command() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().expect("populate demo");
        scene.select(ids.poster).expect("select poster");
        let before = scene.document().instance(ids.poster).expect("poster").transform;

        let bus = CommandBus::with_solver_settings(SolverSettings {
            planar_policy: PlanarPolicy::KeepPlacement,
            ..SolverSettings::default()
        });
        let mut context = CommandContext::new(&mut scene);
        let request = CommandRequest::new("component_replacer").with_arg("Sign");
        assert!(bus.dispatch(&request, &mut context).success);

        let created = context.last_report.as_ref().expect("替换结果").new_selection[0];
        assert_eq!(
            context.scene.document().instance(created).map(|i| i.transform),
            Some(before)
        );
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().expect("populate demo");
        let bus = CommandBus::new();
        let mut context = CommandContext::new(&mut scene);

        let missing_arg = CommandRequest::new("component_replacer");
        assert!(!bus.dispatch(&missing_arg, &mut context).success);

        let unknown = CommandRequest::new("component_replacer").with_arg("Sofa");
        assert!(!bus.dispatch(&unknown, &mut context).success);

        let empty_selection = CommandRequest::new("component_replacer").with_arg("Stool");
        assert!(!bus.dispatch(&empty_selection, &mut context).success);

        assert!(!bus.dispatch(&CommandRequest::new("explode"), &mut context).success);

        context.scene.select(ids.chair).expect("select chair");
        let response = bus.dispatch(&CommandRequest::new("clear_selection"), &mut context);
        assert!(response.success);
        assert_eq!(context.scene.selection_len(), 0);
        assert_eq!(context.scene.undo_depth(), 0);
    }
}
