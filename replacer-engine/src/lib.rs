pub mod command;
pub mod processor;
pub mod registry;
pub mod solver;
pub mod tool;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("entity with id {0} not found")]
        EntityNotFound(u64),
        #[error("definition with id {0} not found")]
        DefinitionNotFound(u64),
        #[error("no valid replacement target")]
        NoTarget,
        #[error("document rejected `{operation}` for entity {id}")]
        HostRejected { operation: &'static str, id: u64 },
        #[error("nothing to undo")]
        NothingToUndo,
    }

    /// 单个实例被跳过的原因。只记录到报告中，不会中断整批替换。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
    pub enum SkipReason {
        #[error("entity is neither a component instance nor a group")]
        NotReplaceable,
        #[error("no definition references the instance")]
        DefinitionUnresolved,
        #[error("planar and solid geometry cannot replace each other")]
        IncompatibleGeometry,
        #[error("instance already uses the replacement definition")]
        SelfReplacement,
        #[error("instance transform is not invertible")]
        SingularPlacement,
    }
}

pub mod scene {
    use replacer_core::document::{
        Container, DefinitionId, Document, Entity, EntityId, Material, add_box_faces,
    };
    use replacer_core::geometry::{AffineTransform, Axis, ORIGIN, Point3, Vector3};
    use tracing::{debug, warn};

    use crate::errors::EngineError;

    const MAX_UNDO_DEPTH: usize = 64;

    /// 有序且无重复的选中集。
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Selection {
        ids: Vec<EntityId>,
    }

    impl Selection {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn from_ids<I>(ids: I) -> Self
        where
            I: IntoIterator<Item = EntityId>,
        {
            let mut selection = Self::new();
            selection.add_all(ids);
            selection
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.ids.len()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.ids.is_empty()
        }

        #[inline]
        pub fn contains(&self, id: EntityId) -> bool {
            self.ids.contains(&id)
        }

        /// 追加到末尾，已存在时返回 `false`。
        pub fn add(&mut self, id: EntityId) -> bool {
            if self.contains(id) {
                return false;
            }
            self.ids.push(id);
            true
        }

        pub fn add_all<I>(&mut self, ids: I)
        where
            I: IntoIterator<Item = EntityId>,
        {
            for id in ids {
                self.add(id);
            }
        }

        pub fn remove(&mut self, id: EntityId) -> bool {
            let before = self.ids.len();
            self.ids.retain(|existing| *existing != id);
            before != self.ids.len()
        }

        #[inline]
        pub fn clear(&mut self) {
            self.ids.clear();
        }

        #[inline]
        pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
            self.ids.iter().copied()
        }

        #[inline]
        pub fn to_vec(&self) -> Vec<EntityId> {
            self.ids.clone()
        }
    }

    #[derive(Debug, Clone)]
    struct Snapshot {
        name: String,
        document: Document,
        selection: Selection,
    }

    /// 引擎层负责维护 `Document`、选中集与撤销快照。
    #[derive(Debug, Default)]
    pub struct Scene {
        document: Document,
        selection: Selection,
        undo_stack: Vec<Snapshot>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct DemoEntities {
        pub chair: EntityId,
        pub turned_chair: EntityId,
        pub crate_group: EntityId,
        pub poster: EntityId,
        pub stool: EntityId,
        pub floor: EntityId,
        pub stool_definition: DefinitionId,
        pub sign_definition: DefinitionId,
    }

    impl Scene {
        pub fn new() -> Self {
            Self::default()
        }

        /// 使用现有文档初始化场景。
        pub fn with_document(document: Document) -> Self {
            let mut scene = Self::new();
            scene.load_document(document);
            scene
        }

        /// 替换当前文档并清空选中集与撤销栈。
        pub fn load_document(&mut self, document: Document) {
            self.document = document;
            self.selection.clear();
            self.undo_stack.clear();
        }

        #[inline]
        pub fn selection_len(&self) -> usize {
            self.selection.len()
        }

        #[inline]
        pub fn is_selected(&self, id: EntityId) -> bool {
            self.selection.contains(id)
        }

        /// 选中指定实体。若实体不存在则返回错误。
        pub fn select(&mut self, id: EntityId) -> Result<(), EngineError> {
            if !self.document.contains(id) {
                return Err(EngineError::EntityNotFound(id.get()));
            }
            self.selection.add(id);
            Ok(())
        }

        /// 取消选中指定实体，返回之前是否处于选中状态。
        pub fn deselect(&mut self, id: EntityId) -> bool {
            self.selection.remove(id)
        }

        #[inline]
        pub fn clear_selection(&mut self) {
            self.selection.clear();
        }

        #[inline]
        pub fn selection(&self) -> &Selection {
            &self.selection
        }

        #[inline]
        pub fn document(&self) -> &Document {
            &self.document
        }

        #[inline]
        pub fn document_mut(&mut self) -> &mut Document {
            &mut self.document
        }

        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.document.entity(id)
        }

        /// 以单个可撤销操作执行 `operation`：失败时恢复文档与选中集，
        /// 成功时把操作前的快照压入撤销栈。
        pub fn run_operation<T, F>(&mut self, name: &str, operation: F) -> Result<T, EngineError>
        where
            F: FnOnce(&mut Document, &mut Selection) -> Result<T, EngineError>,
        {
            let snapshot = Snapshot {
                name: name.to_string(),
                document: self.document.clone(),
                selection: self.selection.clone(),
            };
            match operation(&mut self.document, &mut self.selection) {
                Ok(value) => {
                    if self.undo_stack.len() == MAX_UNDO_DEPTH {
                        self.undo_stack.remove(0);
                    }
                    self.undo_stack.push(snapshot);
                    debug!(operation = name, "操作已提交");
                    Ok(value)
                }
                Err(err) => {
                    self.document = snapshot.document;
                    self.selection = snapshot.selection;
                    warn!(operation = name, error = %err, "操作失败，已回滚");
                    Err(err)
                }
            }
        }

        /// 撤销最近一次操作，返回其名称。
        pub fn undo(&mut self) -> Result<String, EngineError> {
            let snapshot = self.undo_stack.pop().ok_or(EngineError::NothingToUndo)?;
            self.document = snapshot.document;
            self.selection = snapshot.selection;
            debug!(operation = %snapshot.name, "已撤销");
            Ok(snapshot.name)
        }

        #[inline]
        pub fn undo_depth(&self) -> usize {
            self.undo_stack.len()
        }

        /// 为 CLI / 快速验证填充一组示例定义与实例，返回关键 ID。不修改选中集。
        pub fn populate_demo(&mut self) -> Result<DemoEntities, EngineError> {
            let doc = &mut self.document;

            let chair_definition = doc.add_definition("Chair");
            let stool_definition = doc.add_definition("Stool");
            let sign_definition = doc.add_definition("Sign");
            demo_step(
                add_box_faces(doc, chair_definition, Point3::new(-1.0, -2.0, 0.0), (2.0, 4.0, 6.0)),
                "add_face",
            )?;
            demo_step(add_box_faces(doc, stool_definition, ORIGIN, (1.0, 1.0, 1.0)), "add_face")?;
            demo_step(add_box_faces(doc, sign_definition, ORIGIN, (0.0, 2.0, 1.0)), "add_face")?;

            let place = |x: f64, y: f64| AffineTransform::from_translation(Vector3::new(x, y, 0.0));

            let chair = demo_step(
                doc.add_component_instance(Container::Model, chair_definition, place(10.0, 0.0)),
                "add_instance",
            )?;
            let turned_chair = demo_step(
                doc.add_component_instance(
                    Container::Model,
                    chair_definition,
                    place(20.0, 0.0) * AffineTransform::quarter_turn(Axis::X, Axis::Y),
                ),
                "add_instance",
            )?;
            let stool = demo_step(
                doc.add_component_instance(Container::Model, stool_definition, place(30.0, 0.0)),
                "add_instance",
            )?;

            let (crate_group, crate_contents) =
                demo_step(doc.add_group(Container::Model, place(0.0, 10.0)), "add_group")?;
            demo_step(add_box_faces(doc, crate_contents, ORIGIN, (3.0, 3.0, 3.0)), "add_face")?;
            doc.set_material(crate_group, Some(Material::with_color("Pine", [222, 184, 135])));

            let (poster, poster_contents) =
                demo_step(doc.add_group(Container::Model, place(0.0, 20.0)), "add_group")?;
            demo_step(add_box_faces(doc, poster_contents, ORIGIN, (0.0, 5.0, 3.0)), "add_face")?;

            let floor = demo_step(
                doc.add_face(
                    Container::Model,
                    [
                        Point3::new(-5.0, -5.0, 0.0),
                        Point3::new(40.0, -5.0, 0.0),
                        Point3::new(40.0, 30.0, 0.0),
                        Point3::new(-5.0, 30.0, 0.0),
                    ],
                    None,
                ),
                "add_face",
            )?;

            let ids = DemoEntities {
                chair,
                turned_chair,
                crate_group,
                poster,
                stool,
                floor,
                stool_definition,
                sign_definition,
            };

            debug!(
                chair = ids.chair.get(),
                turned_chair = ids.turned_chair.get(),
                crate_group = ids.crate_group.get(),
                poster = ids.poster.get(),
                stool = ids.stool.get(),
                floor = ids.floor.get(),
                "已创建演示实体"
            );

            Ok(ids)
        }
    }

    fn demo_step<T>(value: Option<T>, operation: &'static str) -> Result<T, EngineError> {
        value.ok_or(EngineError::HostRejected { operation, id: 0 })
    }

}
