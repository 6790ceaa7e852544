use std::collections::HashMap;

use replacer_core::document::{DefinitionId, Document, EntityId, InstanceKind};

use crate::errors::SkipReason;

/// 把实例解析到其背后的定义。
///
/// 组件实例直接读取引用；群组先检查拥有其实体集合的定义是否登记了它，
/// 否则按文档枚举顺序扫描全部定义，取第一个登记了该群组的定义。
/// 最坏情况为 O(定义数)，`indexed` 会预先建立反向索引，结果与扫描一致。
#[derive(Debug)]
pub struct DefinitionRegistry<'a> {
    document: &'a Document,
    index: Option<HashMap<EntityId, DefinitionId>>,
}

impl<'a> DefinitionRegistry<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self {
            document,
            index: None,
        }
    }

    /// 建立实例→定义的反向索引，同一实例只保留枚举顺序中的第一个定义。
    pub fn indexed(document: &'a Document) -> Self {
        let mut index = HashMap::new();
        for (definition_id, definition) in document.definitions() {
            for instance in definition.instances() {
                index.entry(*instance).or_insert(*definition_id);
            }
        }
        Self {
            document,
            index: Some(index),
        }
    }

    pub fn resolve(&self, id: EntityId) -> Result<DefinitionId, SkipReason> {
        let instance = self.document.instance(id).ok_or(SkipReason::NotReplaceable)?;
        match instance.kind {
            InstanceKind::Component { definition } => self
                .document
                .definition(definition)
                .map(|_| definition)
                .ok_or(SkipReason::DefinitionUnresolved),
            InstanceKind::Group { entities_owner } => {
                let registered = self
                    .document
                    .definition(entities_owner)
                    .is_some_and(|owner| owner.instances().contains(&id));
                if registered {
                    return Ok(entities_owner);
                }
                self.fallback(id).ok_or(SkipReason::DefinitionUnresolved)
            }
        }
    }

    fn fallback(&self, id: EntityId) -> Option<DefinitionId> {
        if let Some(index) = &self.index {
            return index.get(&id).copied();
        }
        self.document
            .definitions()
            .find_map(|(definition_id, definition)| {
                definition.instances().contains(&id).then_some(*definition_id)
            })
    }
}
