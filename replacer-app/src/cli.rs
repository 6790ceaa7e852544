use std::path::PathBuf;

use replacer_config::{AppConfig, PlanarPolicy as ConfiguredPolicy, ReplacerConfig};
use replacer_core::document::{Entity, EntityId, InstanceKind};
use replacer_engine::command::{CommandBus, CommandContext, CommandRequest, KEEP_SCALE_ARG};
use replacer_engine::processor::{ReplacementKind, ReplacementReport};
use replacer_engine::scene::Scene;
use replacer_engine::solver::{PlanarPolicy, SolverSettings};
use tracing::info;

use crate::errors::AppError;
use crate::loader::{SceneSnapshot, SceneSource, load_scene};

/// 命令行参数解析后的运行选项。
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scene: Option<PathBuf>,
    pub replacement: String,
    pub keep_scale: bool,
    pub output: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            scene: None,
            replacement: "Stool".to_string(),
            keep_scale: false,
            output: None,
        }
    }
}

pub fn solver_settings(config: &ReplacerConfig) -> SolverSettings {
    SolverSettings {
        planar_policy: match config.planar_policy {
            ConfiguredPolicy::Fit => PlanarPolicy::Fit,
            ConfiguredPolicy::KeepPlacement => PlanarPolicy::KeepPlacement,
        },
        identity_tolerance: config.identity_tolerance,
    }
}

pub fn run(config: &AppConfig, options: &RunOptions) -> Result<(), AppError> {
    let loaded = load_scene(options.scene.as_deref())?;
    let mut scene = loaded.scene;

    match &loaded.source {
        SceneSource::File(path) => println!("已从文件加载场景：{}", path.display()),
        SceneSource::Demo => println!("已构建内置示例场景"),
    }
    println!("替换前选中集：");
    print_selection(&scene);

    let bus = CommandBus::with_solver_settings(solver_settings(&config.replacer));
    let mut context = CommandContext::new(&mut scene);
    let mut request = CommandRequest::new("component_replacer").with_arg(&options.replacement);
    if options.keep_scale || config.replacer.preserve_scale_by_default {
        request = request.with_arg(KEEP_SCALE_ARG);
    }
    dispatch_cli_command(&bus, &request, &mut context)?;

    if let Some(report) = &context.last_report {
        print_report(report);
        info!(
            replaced = report.replaced.len(),
            skipped = report.skipped.len(),
            "CLI 替换统计"
        );
    }

    let mut commands: Vec<&str> = bus.available_commands().copied().collect();
    commands.sort_unstable();
    println!("支持的命令: {}", commands.join(", "));

    println!("替换后选中集：");
    print_selection(&*context.scene);

    if let Some(path) = &options.output {
        SceneSnapshot::capture(&*context.scene).write_to(path)?;
        println!("场景已写出：{}", path.display());
    }
    Ok(())
}

fn dispatch_cli_command(
    bus: &CommandBus,
    request: &CommandRequest,
    context: &mut CommandContext<'_>,
) -> Result<(), AppError> {
    let response = bus.dispatch(request, context);
    if response.success {
        if let Some(message) = response.message {
            println!("[命令] {message}");
        }
        Ok(())
    } else {
        Err(AppError::Command(
            response.message.unwrap_or_else(|| "未知错误".to_string()),
        ))
    }
}

fn print_report(report: &ReplacementReport) {
    for replaced in &report.replaced {
        let action = match replaced.kind {
            ReplacementKind::Retargeted => "改指定义",
            ReplacementKind::Recreated => "重建为组件",
        };
        println!(
            "  - 实体 {} {action} -> 实体 {}，原定义 {}",
            replaced.source.get(),
            replaced.result.get(),
            replaced.previous_definition.get()
        );
    }
}

fn print_selection(scene: &Scene) {
    if scene.selection().is_empty() {
        println!("  （空）");
        return;
    }
    for id in scene.selection().iter() {
        println!("  - {}", describe_entity(scene, id));
    }
}

fn describe_entity(scene: &Scene, id: EntityId) -> String {
    let document = scene.document();
    match document.entity(id) {
        Some(Entity::Instance(instance)) => {
            let kind = match instance.kind {
                InstanceKind::Component { .. } => "组件",
                InstanceKind::Group { .. } => "群组",
            };
            let name = document
                .definition(instance.definition_link())
                .map_or("?", |definition| definition.name.as_str());
            let size = document
                .instance_bounds(id)
                .map(|bounds| {
                    let dims = bounds.dimensions();
                    format!("{:.3} × {:.3} × {:.3}", dims.x, dims.y, dims.z)
                })
                .unwrap_or_default();
            format!("{} {kind} {name} [{size}]", id.get())
        }
        Some(Entity::Face(face)) => format!("{} 面（{} 个顶点）", id.get(), face.vertices.len()),
        None => format!("{} （已删除）", id.get()),
    }
}
