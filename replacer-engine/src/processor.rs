use replacer_core::document::{
    Container, DefinitionId, Document, Entity, EntityId, InstanceKind, Material,
};
use replacer_core::geometry::{AffineTransform, BoundingBox};
use tracing::{debug, info, warn};

use crate::errors::{EngineError, SkipReason};
use crate::registry::DefinitionRegistry;
use crate::scene::Selection;
use crate::solver::{ReplacementSolver, Solution};

/// 可被替换的实体。组件实例可原地改指定义；群组只能删除后重建。
#[derive(Debug, Clone, PartialEq)]
pub enum Replaceable {
    RetargetableInstance {
        id: EntityId,
        transform: AffineTransform,
    },
    OpaqueGroupInstance {
        id: EntityId,
        transform: AffineTransform,
        parent: Container,
        material: Option<Material>,
    },
}

impl Replaceable {
    /// 散面或不存在的实体返回 `None`。
    pub fn classify(document: &Document, id: EntityId) -> Option<Self> {
        let Entity::Instance(instance) = document.entity(id)? else {
            return None;
        };
        Some(match instance.kind {
            InstanceKind::Component { .. } => Replaceable::RetargetableInstance {
                id,
                transform: instance.transform,
            },
            InstanceKind::Group { .. } => Replaceable::OpaqueGroupInstance {
                id,
                transform: instance.transform,
                parent: instance.parent,
                material: instance.material.clone(),
            },
        })
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        match self {
            Replaceable::RetargetableInstance { id, .. }
            | Replaceable::OpaqueGroupInstance { id, .. } => *id,
        }
    }

    #[inline]
    pub fn transform(&self) -> AffineTransform {
        match self {
            Replaceable::RetargetableInstance { transform, .. }
            | Replaceable::OpaqueGroupInstance { transform, .. } => *transform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementKind {
    /// 原实例保留，只改指定义（可能调整变换）。
    Retargeted,
    /// 原群组被删除，由新的组件实例取代。
    Recreated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplacedEntity {
    pub source: EntityId,
    pub result: EntityId,
    pub previous_definition: DefinitionId,
    pub transform: AffineTransform,
    pub kind: ReplacementKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplacementReport {
    pub replaced: Vec<ReplacedEntity>,
    pub skipped: Vec<(EntityId, SkipReason)>,
    /// 本次新建、并已加入选中集的实例。
    pub new_selection: Vec<EntityId>,
}

impl ReplacementReport {
    #[inline]
    pub fn replaced_count(&self) -> usize {
        self.replaced.len()
    }

    pub fn skip_reason(&self, id: EntityId) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find_map(|(skipped, reason)| (*skipped == id).then_some(*reason))
    }
}

enum Outcome {
    Replaced(ReplacedEntity),
    Skipped(SkipReason),
}

/// 按选中顺序逐个替换。单个实例无法替换时跳过并继续；
/// 文档拒绝写入时返回错误，由外层操作整体回滚。
#[derive(Debug, Clone, Copy)]
pub struct ReplacementProcessor<'s> {
    solver: &'s ReplacementSolver,
}

impl<'s> ReplacementProcessor<'s> {
    pub fn new(solver: &'s ReplacementSolver) -> Self {
        Self { solver }
    }

    pub fn process(
        &self,
        document: &mut Document,
        selection: &mut Selection,
        replacement: DefinitionId,
        preserve_scale: bool,
    ) -> Result<ReplacementReport, EngineError> {
        let replacement_bounds = document
            .definition_bounds(replacement)
            .ok_or(EngineError::DefinitionNotFound(replacement.get()))?;

        // 替换只会改动已处理过的实体，批次开始时一次解析全部定义即可
        let resolved: Vec<(EntityId, Result<DefinitionId, SkipReason>)> = {
            let registry = DefinitionRegistry::indexed(document);
            selection.iter().map(|id| (id, registry.resolve(id))).collect()
        };

        let mut report = ReplacementReport::default();
        for (id, definition) in resolved {
            let outcome =
                self.replace_one(document, id, definition, replacement, &replacement_bounds, preserve_scale)?;
            match outcome {
                Outcome::Replaced(replaced) => {
                    debug!(
                        source = replaced.source.get(),
                        result = replaced.result.get(),
                        kind = ?replaced.kind,
                        "已替换"
                    );
                    if replaced.kind == ReplacementKind::Recreated {
                        report.new_selection.push(replaced.result);
                    }
                    report.replaced.push(replaced);
                }
                Outcome::Skipped(reason) => {
                    debug!(id = id.get(), reason = %reason, "跳过实体");
                    report.skipped.push((id, reason));
                }
            }
        }

        for replaced in &report.replaced {
            if replaced.kind == ReplacementKind::Recreated {
                selection.remove(replaced.source);
            }
        }
        selection.add_all(report.new_selection.iter().copied());

        info!(
            replacement = replacement.get(),
            replaced = report.replaced.len(),
            skipped = report.skipped.len(),
            preserve_scale,
            "替换完成"
        );
        Ok(report)
    }

    fn replace_one(
        &self,
        document: &mut Document,
        id: EntityId,
        definition: Result<DefinitionId, SkipReason>,
        replacement: DefinitionId,
        replacement_bounds: &BoundingBox,
        preserve_scale: bool,
    ) -> Result<Outcome, EngineError> {
        let Some(candidate) = Replaceable::classify(document, id) else {
            return Ok(Outcome::Skipped(SkipReason::NotReplaceable));
        };

        let definition = match definition {
            Ok(definition) => definition,
            Err(reason) => {
                warn!(id = id.get(), reason = %reason, "无法解析实例所属定义");
                return Ok(Outcome::Skipped(reason));
            }
        };
        if definition == replacement {
            return Ok(Outcome::Skipped(SkipReason::SelfReplacement));
        }
        let Some(instance_bounds) = document.definition_bounds(definition) else {
            return Ok(Outcome::Skipped(SkipReason::DefinitionUnresolved));
        };

        let adjustment = match self
            .solver
            .solve(&candidate.transform(), &instance_bounds, replacement_bounds)
        {
            Solution::Skip(reason) => return Ok(Outcome::Skipped(reason)),
            Solution::Identity => None,
            Solution::Adjust(adjustment) => Some(adjustment),
        };
        let adjustment = if preserve_scale { None } else { adjustment };

        let replaced = match candidate {
            Replaceable::RetargetableInstance { id, transform } => {
                if !document.set_component_definition(id, replacement) {
                    return Err(EngineError::HostRejected {
                        operation: "set_definition",
                        id: id.get(),
                    });
                }
                let transform = match adjustment {
                    Some(adjustment) => {
                        let adjusted = adjustment.conjugated * transform;
                        if !document.set_transform(id, adjusted) {
                            return Err(EngineError::HostRejected {
                                operation: "set_transform",
                                id: id.get(),
                            });
                        }
                        adjusted
                    }
                    None => transform,
                };
                ReplacedEntity {
                    source: id,
                    result: id,
                    previous_definition: definition,
                    transform,
                    kind: ReplacementKind::Retargeted,
                }
            }
            Replaceable::OpaqueGroupInstance {
                id,
                transform,
                parent,
                material,
            } => {
                let transform = adjustment.map_or(transform, |adjustment| transform * adjustment.local);
                let created = document
                    .add_component_instance(parent, replacement, transform)
                    .ok_or(EngineError::HostRejected {
                        operation: "add_instance",
                        id: id.get(),
                    })?;
                if material.is_some() {
                    document.set_material(created, material);
                }
                if !document.erase(id) {
                    return Err(EngineError::HostRejected {
                        operation: "erase",
                        id: id.get(),
                    });
                }
                ReplacedEntity {
                    source: id,
                    result: created,
                    previous_definition: definition,
                    transform,
                    kind: ReplacementKind::Recreated,
                }
            }
        };
        Ok(Outcome::Replaced(replaced))
    }
}
