pub mod geometry {
    use std::ops::Mul;

    use glam::{DMat4, DVec3};
    use serde::{Deserialize, Serialize};

    /// 世界坐标原点。
    pub const ORIGIN: Point3 = Point3(DVec3::ZERO);

    /// 包围盒的三个轴向，依次对应宽、高、深。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Axis {
        X,
        Y,
        Z,
    }

    impl Axis {
        pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

        #[inline]
        pub fn index(self) -> usize {
            match self {
                Axis::X => 0,
                Axis::Y => 1,
                Axis::Z => 2,
            }
        }

        #[inline]
        pub fn unit(self) -> DVec3 {
            match self {
                Axis::X => DVec3::X,
                Axis::Y => DVec3::Y,
                Axis::Z => DVec3::Z,
            }
        }

        /// 包围盒维度名称，便于日志输出。
        pub fn dimension_name(self) -> &'static str {
            match self {
                Axis::X => "width",
                Axis::Y => "height",
                Axis::Z => "depth",
            }
        }
    }

    /// 三维点，内部以 `glam::DVec3` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn vector_to(self, other: Point3) -> Vector3 {
            Vector3(other.0 - self.0)
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 三维向量，主要用于平移量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    /// 轴对齐包围盒。宽、高、深分别对应 x、y、z 方向的跨度，
    /// 任一维度恰好为 0 时视为在该轴上“扁平”。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct BoundingBox {
        min: Point3,
        max: Point3,
    }

    impl BoundingBox {
        /// 由两个对角点构造，内部会按分量整理出最小/最大角点。
        #[inline]
        pub fn new(a: Point3, b: Point3) -> Self {
            Self {
                min: Point3(a.0.min(b.0)),
                max: Point3(a.0.max(b.0)),
            }
        }

        /// 以最小角点与宽高深构造。
        pub fn from_origin_and_size(origin: Point3, width: f64, height: f64, depth: f64) -> Self {
            let far = origin.0 + DVec3::new(width, height, depth);
            Self::new(origin, Point3(far))
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point3(DVec3::splat(f64::INFINITY)),
                max: Point3(DVec3::splat(f64::NEG_INFINITY)),
            }
        }

        pub fn from_points<I>(points: I) -> Self
        where
            I: IntoIterator<Item = Point3>,
        {
            let mut bounds = Self::empty();
            for point in points {
                bounds.include_point(point);
            }
            bounds
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y() || self.min.z() > self.max.z()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point3(self.min.0.min(point.0));
            self.max = Point3(self.max.0.max(point.0));
        }

        pub fn include_bounds(&mut self, other: &BoundingBox) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 三个方向的跨度；空包围盒返回零向量。
        #[inline]
        pub fn dimensions(&self) -> DVec3 {
            if self.is_empty() {
                DVec3::ZERO
            } else {
                self.max.0 - self.min.0
            }
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.dimensions().x
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.dimensions().y
        }

        #[inline]
        pub fn depth(&self) -> f64 {
            self.dimensions().z
        }

        #[inline]
        pub fn extent(&self, axis: Axis) -> f64 {
            self.dimensions()[axis.index()]
        }

        /// 任一维度恰好为 0 即视为二维（面、线、点都算）。
        #[inline]
        pub fn is_planar(&self) -> bool {
            self.width() == 0.0 || self.height() == 0.0 || self.depth() == 0.0
        }

        /// 按 x、y、z 顺序返回第一个扁平轴。
        pub fn flat_axis(&self) -> Option<Axis> {
            Axis::ALL.into_iter().find(|axis| self.extent(*axis) == 0.0)
        }

        /// 角点编号：bit0 取 x 最大值，bit1 取 y 最大值，bit2 取 z 最大值。
        /// `corner(0)` 即最小角点。
        pub fn corner(&self, index: usize) -> Option<Point3> {
            if index >= 8 || self.is_empty() {
                return None;
            }
            let pick = |bit: usize, lo: f64, hi: f64| if index & bit != 0 { hi } else { lo };
            Some(Point3::new(
                pick(1, self.min.x(), self.max.x()),
                pick(2, self.min.y(), self.max.y()),
                pick(4, self.min.z(), self.max.z()),
            ))
        }

        pub fn corners(&self) -> impl Iterator<Item = Point3> + '_ {
            (0..8).filter_map(move |index| self.corner(index))
        }

        /// 变换全部角点后重新求轴对齐包围盒。
        pub fn transformed(&self, transform: &AffineTransform) -> BoundingBox {
            BoundingBox::from_points(self.corners().map(|corner| transform.transform_point(corner)))
        }
    }

    /// 4x4 仿射变换，列主序，按 `a * b` 先应用 `b` 再应用 `a`。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct AffineTransform(pub DMat4);

    impl AffineTransform {
        pub const IDENTITY: Self = Self(DMat4::IDENTITY);

        #[inline]
        pub fn from_translation(offset: Vector3) -> Self {
            Self(DMat4::from_translation(offset.0))
        }

        #[inline]
        pub fn from_scale(sx: f64, sy: f64, sz: f64) -> Self {
            Self(DMat4::from_scale(DVec3::new(sx, sy, sz)))
        }

        /// 绕第三轴旋转 90°，使 `from` 轴映射到 `to` 轴。
        /// 由精确的轴置换构成（一个分量取反，行列式为 +1），不会引入三角函数误差。
        pub fn quarter_turn(from: Axis, to: Axis) -> Self {
            if from == to {
                return Self::IDENTITY;
            }
            let mut columns = [DVec3::X, DVec3::Y, DVec3::Z];
            columns[from.index()] = to.unit();
            columns[to.index()] = -from.unit();
            Self(DMat4::from_cols(
                columns[0].extend(0.0),
                columns[1].extend(0.0),
                columns[2].extend(0.0),
                DVec3::ZERO.extend(1.0),
            ))
        }

        /// 求逆；奇异或包含非有限值时返回 `None`。
        pub fn inverse(&self) -> Option<Self> {
            let det = self.0.determinant();
            if det == 0.0 || !det.is_finite() {
                return None;
            }
            let inverse = self.0.inverse();
            inverse.is_finite().then_some(Self(inverse))
        }

        #[inline]
        pub fn determinant(&self) -> f64 {
            self.0.determinant()
        }

        #[inline]
        pub fn transform_point(&self, point: Point3) -> Point3 {
            Point3(self.0.transform_point3(point.0))
        }

        #[inline]
        pub fn approx_eq(&self, other: &AffineTransform, tolerance: f64) -> bool {
            self.0.abs_diff_eq(other.0, tolerance)
        }

        #[inline]
        pub fn is_identity(&self, tolerance: f64) -> bool {
            self.approx_eq(&Self::IDENTITY, tolerance)
        }
    }

    impl Default for AffineTransform {
        fn default() -> Self {
            Self::IDENTITY
        }
    }

    impl Mul for AffineTransform {
        type Output = AffineTransform;

        fn mul(self, rhs: AffineTransform) -> AffineTransform {
            AffineTransform(self.0 * rhs.0)
        }
    }

    impl From<DMat4> for AffineTransform {
        fn from(value: DMat4) -> Self {
            Self(value)
        }
    }
}

pub mod document {
    use std::collections::{HashMap, HashSet};

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use crate::geometry::{AffineTransform, BoundingBox, Point3};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DefinitionId(u64);

    impl DefinitionId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 实体所在的集合：模型根集合，或某个定义内部的集合。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum Container {
        Model,
        Definition(DefinitionId),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Material {
        pub name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub color: Option<[u8; 3]>,
    }

    impl Material {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                color: None,
            }
        }

        pub fn with_color(name: impl Into<String>, color: [u8; 3]) -> Self {
            Self {
                name: name.into(),
                color: Some(color),
            }
        }
    }

    /// 散面几何，只参与包围盒计算。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Face {
        pub vertices: Vec<Point3>,
        pub material: Option<Material>,
        pub parent: Container,
    }

    /// 实例与定义之间的关联方式。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum InstanceKind {
        /// 组件实例：直接引用定义，可原地改指。
        Component { definition: DefinitionId },
        /// 群组：几何存放在匿名定义中，该关联不可改写。
        Group { entities_owner: DefinitionId },
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Instance {
        pub kind: InstanceKind,
        pub transform: AffineTransform,
        #[serde(default)]
        pub material: Option<Material>,
        pub parent: Container,
    }

    impl Instance {
        /// 几何来源定义：组件取其引用，群组取拥有其实体集合的定义。
        #[inline]
        pub fn definition_link(&self) -> DefinitionId {
            match self.kind {
                InstanceKind::Component { definition } => definition,
                InstanceKind::Group { entities_owner } => entities_owner,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Entity {
        Face(Face),
        Instance(Instance),
    }

    impl Entity {
        #[inline]
        pub fn parent(&self) -> Container {
            match self {
                Entity::Face(face) => face.parent,
                Entity::Instance(instance) => instance.parent,
            }
        }

        #[inline]
        pub fn as_instance(&self) -> Option<&Instance> {
            match self {
                Entity::Instance(instance) => Some(instance),
                Entity::Face(_) => None,
            }
        }
    }

    /// 外部载入的文档违反场景图结构约束。
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum DocumentError {
        #[error("实体 ID {0} 重复")]
        DuplicateEntity(u64),
        #[error("定义 ID {0} 重复")]
        DuplicateDefinition(u64),
        #[error("实体计数器 {next} 落后于已有实体 ID {max}")]
        StaleEntityCounter { next: u64, max: u64 },
        #[error("定义计数器 {next} 落后于已有定义 ID {max}")]
        StaleDefinitionCounter { next: u64, max: u64 },
        #[error("实体 {entity} 的父集合 {parent:?} 不存在")]
        MissingContainer { entity: u64, parent: Container },
        #[error("集合 {container:?} 登记了不存在的实体 {entity}")]
        MissingEntity { container: Container, entity: u64 },
        #[error("实体 {entity} 的父集合为 {parent:?}，却登记在 {listed:?} 中")]
        ParentMismatch {
            entity: u64,
            parent: Container,
            listed: Container,
        },
        #[error("实体 {entity} 在父集合中登记了 {count} 次")]
        ListingCount { entity: u64, count: usize },
        #[error("实例 {entity} 引用了不存在的定义 {definition}")]
        MissingDefinition { entity: u64, definition: u64 },
        #[error("实例 {entity} 未登记在定义 {definition} 的实例列表中")]
        UnregisteredInstance { entity: u64, definition: u64 },
        #[error("定义 {definition} 的实例列表登记了无效实例 {entity}")]
        InvalidInstanceEntry { definition: u64, entity: u64 },
        #[error("定义 {0} 直接或间接嵌套了自身")]
        NestingCycle(u64),
    }

    /// 共享几何模板。群组使用匿名定义（`is_group = true`）。
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Definition {
        pub name: String,
        pub is_group: bool,
        entities: Vec<EntityId>,
        instances: Vec<EntityId>,
    }

    impl Definition {
        fn new(name: impl Into<String>, is_group: bool) -> Self {
            Self {
                name: name.into(),
                is_group,
                entities: Vec::new(),
                instances: Vec::new(),
            }
        }

        #[inline]
        pub fn entities(&self) -> &[EntityId] {
            &self.entities
        }

        /// 引用该定义的实例列表，按创建顺序排列。
        #[inline]
        pub fn instances(&self) -> &[EntityId] {
            &self.instances
        }
    }

    /// 内存场景图：定义、实例与散面。实体 ID 单调递增、永不复用。
    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub struct Document {
        entities: Vec<(EntityId, Entity)>,
        root: Vec<EntityId>,
        definitions: Vec<(DefinitionId, Definition)>,
        next_entity_id: u64,
        next_definition_id: u64,
    }

    impl Document {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_definition(&mut self, name: impl Into<String>) -> DefinitionId {
            self.push_definition(Definition::new(name, false))
        }

        /// 在指定集合中添加散面；集合不存在时返回 `None`。
        pub fn add_face<I>(
            &mut self,
            container: Container,
            vertices: I,
            material: Option<Material>,
        ) -> Option<EntityId>
        where
            I: IntoIterator<Item = Point3>,
        {
            let face = Face {
                vertices: vertices.into_iter().collect(),
                material,
                parent: container,
            };
            self.push_entity(container, Entity::Face(face))
        }

        /// 在指定集合中放置组件实例。集合或定义不存在、或会造成定义自嵌套时返回 `None`。
        pub fn add_component_instance(
            &mut self,
            container: Container,
            definition: DefinitionId,
            transform: AffineTransform,
        ) -> Option<EntityId> {
            if self.definition(definition).is_none() || self.would_nest(container, definition) {
                return None;
            }
            let instance = Instance {
                kind: InstanceKind::Component { definition },
                transform,
                material: None,
                parent: container,
            };
            let id = self.push_entity(container, Entity::Instance(instance))?;
            self.definition_mut(definition)?.instances.push(id);
            Some(id)
        }

        /// 创建群组及其匿名定义，返回 (群组实体, 匿名定义)。
        pub fn add_group(
            &mut self,
            container: Container,
            transform: AffineTransform,
        ) -> Option<(EntityId, DefinitionId)> {
            if self.container_entities(container).is_none() {
                return None;
            }
            let name = format!("Group#{}", self.next_definition_id + 1);
            let definition = self.push_definition(Definition::new(name, true));
            let instance = Instance {
                kind: InstanceKind::Group {
                    entities_owner: definition,
                },
                transform,
                material: None,
                parent: container,
            };
            let id = self.push_entity(container, Entity::Instance(instance))?;
            self.definition_mut(definition)?.instances.push(id);
            Some((id, definition))
        }

        /// 将组件实例改指到另一个定义，实例本身（ID、变换、材质）保持不变。
        pub fn set_component_definition(&mut self, id: EntityId, definition: DefinitionId) -> bool {
            let Some(instance) = self.instance(id) else {
                return false;
            };
            let InstanceKind::Component { definition: current } = instance.kind else {
                return false;
            };
            let parent = instance.parent;
            if current == definition {
                return true;
            }
            if self.definition(definition).is_none() || self.would_nest(parent, definition) {
                return false;
            }

            if let Some(old) = self.definition_mut(current) {
                old.instances.retain(|existing| *existing != id);
            }
            if let Some(new) = self.definition_mut(definition) {
                new.instances.push(id);
            }
            if let Some(instance) = self.instance_mut(id) {
                instance.kind = InstanceKind::Component { definition };
            }
            true
        }

        pub fn set_transform(&mut self, id: EntityId, transform: AffineTransform) -> bool {
            match self.instance_mut(id) {
                Some(instance) => {
                    instance.transform = transform;
                    true
                }
                None => false,
            }
        }

        pub fn set_material(&mut self, id: EntityId, material: Option<Material>) -> bool {
            match self.entity_mut(id) {
                Some(Entity::Instance(instance)) => instance.material = material,
                Some(Entity::Face(face)) => face.material = material,
                None => return false,
            }
            true
        }

        /// 删除实体并解除其在父集合与定义实例列表中的登记。
        /// 群组的匿名定义会保留下来（无实例引用）。
        pub fn erase(&mut self, id: EntityId) -> bool {
            let Some(index) = self.entities.iter().position(|(entity_id, _)| *entity_id == id) else {
                return false;
            };
            let (_, entity) = self.entities.remove(index);

            match entity.parent() {
                Container::Model => self.root.retain(|existing| *existing != id),
                Container::Definition(owner) => {
                    if let Some(definition) = self.definition_mut(owner) {
                        definition.entities.retain(|existing| *existing != id);
                    }
                }
            }

            if let Entity::Instance(instance) = &entity {
                let link = instance.definition_link();
                if let Some(definition) = self.definition_mut(link) {
                    definition.instances.retain(|existing| *existing != id);
                }
            }
            true
        }

        #[inline]
        pub fn contains(&self, id: EntityId) -> bool {
            self.entity(id).is_some()
        }

        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.entities
                .iter()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
            self.entities
                .iter_mut()
                .find_map(|(entity_id, entity)| (*entity_id == id).then_some(entity))
        }

        #[inline]
        pub fn instance(&self, id: EntityId) -> Option<&Instance> {
            self.entity(id).and_then(Entity::as_instance)
        }

        pub fn instance_mut(&mut self, id: EntityId) -> Option<&mut Instance> {
            match self.entity_mut(id) {
                Some(Entity::Instance(instance)) => Some(instance),
                _ => None,
            }
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.entities.iter()
        }

        pub fn definition(&self, id: DefinitionId) -> Option<&Definition> {
            self.definitions
                .iter()
                .find_map(|(definition_id, definition)| (*definition_id == id).then_some(definition))
        }

        /// 按创建顺序枚举全部定义。
        #[inline]
        pub fn definitions(&self) -> impl Iterator<Item = &(DefinitionId, Definition)> {
            self.definitions.iter()
        }

        pub fn definition_by_name(&self, name: &str) -> Option<DefinitionId> {
            self.definitions
                .iter()
                .find_map(|(id, definition)| (definition.name == name).then_some(*id))
        }

        pub fn container_entities(&self, container: Container) -> Option<&[EntityId]> {
            match container {
                Container::Model => Some(&self.root),
                Container::Definition(id) => self.definition(id).map(Definition::entities),
            }
        }

        /// 定义的局部包围盒，按需由散面与嵌套实例重新计算。
        pub fn definition_bounds(&self, id: DefinitionId) -> Option<BoundingBox> {
            let definition = self.definition(id)?;
            Some(self.collection_bounds(definition.entities()))
        }

        /// 实例在父集合坐标系中的包围盒。
        pub fn instance_bounds(&self, id: EntityId) -> Option<BoundingBox> {
            let instance = self.instance(id)?;
            let local = self.definition_bounds(instance.definition_link())?;
            Some(local.transformed(&instance.transform))
        }

        /// 模型根集合的包围盒，无几何时返回 `None`。
        pub fn bounds(&self) -> Option<BoundingBox> {
            let bounds = self.collection_bounds(&self.root);
            (!bounds.is_empty()).then_some(bounds)
        }

        fn collection_bounds(&self, ids: &[EntityId]) -> BoundingBox {
            let mut bounds = BoundingBox::empty();
            for id in ids {
                match self.entity(*id) {
                    Some(Entity::Face(face)) => {
                        for vertex in &face.vertices {
                            bounds.include_point(*vertex);
                        }
                    }
                    Some(Entity::Instance(instance)) => {
                        if let Some(local) = self.definition_bounds(instance.definition_link()) {
                            bounds.include_bounds(&local.transformed(&instance.transform));
                        }
                    }
                    None => {}
                }
            }
            bounds
        }

        /// 检查反序列化得到的文档：ID 唯一、计数器不落后、集合登记与父级一致、
        /// 实例列表与引用一致、定义之间无嵌套环。
        pub fn validate(&self) -> Result<(), DocumentError> {
            let mut entity_ids = HashSet::new();
            for (id, _) in &self.entities {
                if !entity_ids.insert(*id) {
                    return Err(DocumentError::DuplicateEntity(id.0));
                }
            }
            let mut definition_ids = HashSet::new();
            for (id, _) in &self.definitions {
                if !definition_ids.insert(*id) {
                    return Err(DocumentError::DuplicateDefinition(id.0));
                }
            }
            let max = entity_ids.iter().map(|id| id.0).max().unwrap_or(0);
            if max > self.next_entity_id {
                return Err(DocumentError::StaleEntityCounter {
                    next: self.next_entity_id,
                    max,
                });
            }
            let max = definition_ids.iter().map(|id| id.0).max().unwrap_or(0);
            if max > self.next_definition_id {
                return Err(DocumentError::StaleDefinitionCounter {
                    next: self.next_definition_id,
                    max,
                });
            }

            let mut listings: HashMap<EntityId, usize> = HashMap::new();
            let containers = std::iter::once((Container::Model, self.root.as_slice())).chain(
                self.definitions
                    .iter()
                    .map(|(id, definition)| (Container::Definition(*id), definition.entities())),
            );
            for (container, ids) in containers {
                for id in ids {
                    let entity = self.entity(*id).ok_or(DocumentError::MissingEntity {
                        container,
                        entity: id.0,
                    })?;
                    if entity.parent() != container {
                        return Err(DocumentError::ParentMismatch {
                            entity: id.0,
                            parent: entity.parent(),
                            listed: container,
                        });
                    }
                    *listings.entry(*id).or_default() += 1;
                }
            }

            for (id, entity) in &self.entities {
                if self.container_entities(entity.parent()).is_none() {
                    return Err(DocumentError::MissingContainer {
                        entity: id.0,
                        parent: entity.parent(),
                    });
                }
                let count = listings.get(id).copied().unwrap_or(0);
                if count != 1 {
                    return Err(DocumentError::ListingCount {
                        entity: id.0,
                        count,
                    });
                }
                let Entity::Instance(instance) = entity else {
                    continue;
                };
                let link = instance.definition_link();
                let Some(definition) = self.definition(link) else {
                    return Err(DocumentError::MissingDefinition {
                        entity: id.0,
                        definition: link.0,
                    });
                };
                // 群组只需登记在某个定义中，链接本身允许过期
                let registered = match instance.kind {
                    InstanceKind::Component { .. } => definition.instances.contains(id),
                    InstanceKind::Group { .. } => self
                        .definitions
                        .iter()
                        .any(|(_, candidate)| candidate.instances.contains(id)),
                };
                if !registered {
                    return Err(DocumentError::UnregisteredInstance {
                        entity: id.0,
                        definition: link.0,
                    });
                }
            }

            for (definition_id, definition) in &self.definitions {
                for id in &definition.instances {
                    let valid = match self.instance(*id) {
                        Some(Instance {
                            kind: InstanceKind::Component { definition: linked },
                            ..
                        }) => linked == definition_id,
                        Some(_) => true,
                        None => false,
                    };
                    if !valid {
                        return Err(DocumentError::InvalidInstanceEntry {
                            definition: definition_id.0,
                            entity: id.0,
                        });
                    }
                }
            }

            self.check_nesting()
        }

        /// 沿“定义 → 内部实例所引用的定义”做三色深度优先遍历。
        fn check_nesting(&self) -> Result<(), DocumentError> {
            #[derive(Clone, Copy, PartialEq)]
            enum Mark {
                Visiting,
                Done,
            }

            let mut marks: HashMap<DefinitionId, Mark> = HashMap::new();
            for (start, _) in &self.definitions {
                if marks.contains_key(start) {
                    continue;
                }
                let mut stack = vec![(*start, 0usize)];
                marks.insert(*start, Mark::Visiting);
                while let Some((current, cursor)) = stack.pop() {
                    let nested = self
                        .definition(current)
                        .map(Definition::entities)
                        .unwrap_or_default();
                    let next = nested[cursor.min(nested.len())..]
                        .iter()
                        .position(|id| self.instance(*id).is_some())
                        .map(|offset| cursor + offset);
                    let Some(index) = next else {
                        marks.insert(current, Mark::Done);
                        continue;
                    };
                    stack.push((current, index + 1));
                    let Some(instance) = self.instance(nested[index]) else {
                        continue;
                    };
                    let link = instance.definition_link();
                    match marks.get(&link) {
                        Some(Mark::Visiting) => return Err(DocumentError::NestingCycle(link.0)),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(link, Mark::Visiting);
                            stack.push((link, 0));
                        }
                    }
                }
            }
            Ok(())
        }

        /// 把 `definition` 放进 `container` 是否会形成自嵌套。
        fn would_nest(&self, container: Container, definition: DefinitionId) -> bool {
            match container {
                Container::Model => false,
                Container::Definition(owner) => {
                    owner == definition || self.definition_contains(definition, owner)
                }
            }
        }

        fn definition_contains(&self, outer: DefinitionId, target: DefinitionId) -> bool {
            let Some(definition) = self.definition(outer) else {
                return false;
            };
            definition.entities().iter().any(|id| match self.instance(*id) {
                Some(instance) => {
                    let link = instance.definition_link();
                    link == target || self.definition_contains(link, target)
                }
                None => false,
            })
        }

        fn definition_mut(&mut self, id: DefinitionId) -> Option<&mut Definition> {
            self.definitions
                .iter_mut()
                .find_map(|(definition_id, definition)| (*definition_id == id).then_some(definition))
        }

        fn push_definition(&mut self, definition: Definition) -> DefinitionId {
            self.next_definition_id += 1;
            let id = DefinitionId(self.next_definition_id);
            self.definitions.push((id, definition));
            id
        }

        fn push_entity(&mut self, container: Container, entity: Entity) -> Option<EntityId> {
            if self.container_entities(container).is_none() {
                return None;
            }
            let id = self.next_id();
            match container {
                Container::Model => self.root.push(id),
                Container::Definition(owner) => self.definition_mut(owner)?.entities.push(id),
            }
            self.entities.push((id, entity));
            Some(id)
        }

        fn next_id(&mut self) -> EntityId {
            self.next_entity_id += 1;
            EntityId(self.next_entity_id)
        }
    }

    /// 以最小角点与尺寸添加一个长方体的六个面，供演示与测试搭建定义几何。
    /// 某一维度为 0 时退化为单个矩形面。
    pub fn add_box_faces(
        document: &mut Document,
        definition: DefinitionId,
        origin: Point3,
        size: (f64, f64, f64),
    ) -> Option<()> {
        let bounds = BoundingBox::from_origin_and_size(origin, size.0, size.1, size.2);
        let corners: Vec<Point3> = bounds.corners().collect();
        let container = Container::Definition(definition);
        const QUADS: [[usize; 4]; 6] = [
            [0, 1, 3, 2],
            [4, 5, 7, 6],
            [0, 1, 5, 4],
            [2, 3, 7, 6],
            [0, 2, 6, 4],
            [1, 3, 7, 5],
        ];
        if bounds.is_planar() {
            document.add_face(container, corners, None)?;
            return Some(());
        }
        for quad in QUADS {
            document.add_face(container, quad.iter().map(|index| corners[*index]), None)?;
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::document::*;
    use super::geometry::*;

    fn boxed(document: &mut Document, name: &str, size: (f64, f64, f64)) -> DefinitionId {
        let id = document.add_definition(name);
        add_box_faces(document, id, ORIGIN, size).expect("添加长方体面失败");
        id
    }

    #[test]
    fn bounding_box_dimensions_and_planarity() {
        let solid = BoundingBox::from_origin_and_size(Point3::new(1.0, 2.0, 3.0), 2.0, 4.0, 6.0);
        assert_eq!(solid.width(), 2.0);
        assert_eq!(solid.height(), 4.0);
        assert_eq!(solid.depth(), 6.0);
        assert!(!solid.is_planar());
        assert!(solid.flat_axis().is_none());

        let sheet = BoundingBox::from_origin_and_size(ORIGIN, 0.0, 5.0, 3.0);
        assert!(sheet.is_planar());
        assert_eq!(sheet.flat_axis(), Some(Axis::X));

        let line = BoundingBox::from_origin_and_size(ORIGIN, 0.0, 0.0, 3.0);
        assert!(line.is_planar());
        assert_eq!(line.flat_axis(), Some(Axis::X));

        let empty = BoundingBox::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.width(), 0.0);
        assert!(empty.corner(0).is_none());
    }

    #[test]
    fn corner_zero_is_minimum_and_indices_follow_bits() {
        let bounds = BoundingBox::new(Point3::new(4.0, 5.0, 6.0), Point3::new(1.0, 2.0, 3.0));
        assert_eq!(bounds.corner(0), Some(Point3::new(1.0, 2.0, 3.0)));
        assert_eq!(bounds.corner(1), Some(Point3::new(4.0, 2.0, 3.0)));
        assert_eq!(bounds.corner(2), Some(Point3::new(1.0, 5.0, 3.0)));
        assert_eq!(bounds.corner(4), Some(Point3::new(1.0, 2.0, 6.0)));
        assert_eq!(bounds.corner(7), Some(Point3::new(4.0, 5.0, 6.0)));
        assert!(bounds.corner(8).is_none());
        assert_eq!(bounds.corners().count(), 8);
    }

    #[test]
    fn composition_applies_right_operand_first() {
        let translate = AffineTransform::from_translation(Vector3::new(10.0, 0.0, 0.0));
        let scale = AffineTransform::from_scale(2.0, 2.0, 2.0);
        let point = Point3::new(1.0, 1.0, 1.0);

        let moved_then_scaled = (scale * translate).transform_point(point);
        assert_eq!(moved_then_scaled, Point3::new(22.0, 2.0, 2.0));

        let scaled_then_moved = (translate * scale).transform_point(point);
        assert_eq!(scaled_then_moved, Point3::new(12.0, 2.0, 2.0));
    }

    #[test]
    fn inverse_round_trips_and_rejects_singular() {
        let t = AffineTransform::from_translation(Vector3::new(3.0, -2.0, 7.0))
            * AffineTransform::from_scale(2.0, 0.5, 4.0);
        let inverse = t.inverse().expect("可逆变换应当有逆");
        assert!((t * inverse).is_identity(1e-12));

        let flat = AffineTransform::from_scale(1.0, 0.0, 1.0);
        assert!(flat.inverse().is_none());
    }

    #[test]
    fn quarter_turn_is_exact_rotation() {
        let turn = AffineTransform::quarter_turn(Axis::X, Axis::Y);
        assert_eq!(turn.transform_point(Point3::new(1.0, 0.0, 0.0)), Point3::new(0.0, 1.0, 0.0));
        assert_eq!(turn.transform_point(Point3::new(0.0, 1.0, 0.0)), Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(turn.transform_point(Point3::new(0.0, 0.0, 1.0)), Point3::new(0.0, 0.0, 1.0));
        assert!((turn.determinant() - 1.0).abs() < f64::EPSILON);

        let sheet = BoundingBox::from_origin_and_size(ORIGIN, 0.0, 2.0, 1.0);
        let rotated = sheet.transformed(&AffineTransform::quarter_turn(Axis::X, Axis::Z));
        assert_eq!(rotated.flat_axis(), Some(Axis::Z));
        assert_eq!(rotated.width(), 1.0);
        assert_eq!(rotated.height(), 2.0);

        assert_eq!(AffineTransform::quarter_turn(Axis::Z, Axis::Z), AffineTransform::IDENTITY);
    }

    #[test]
    fn definition_bounds_include_nested_instances() {
        let mut doc = Document::new();
        let leg = boxed(&mut doc, "Leg", (1.0, 1.0, 4.0));
        let table = doc.add_definition("Table");
        let top = Container::Definition(table);
        doc.add_face(
            top,
            [Point3::new(0.0, 0.0, 4.0), Point3::new(10.0, 6.0, 4.0)],
            None,
        )
        .expect("添加桌面失败");
        doc.add_component_instance(
            top,
            leg,
            AffineTransform::from_translation(Vector3::new(9.0, 5.0, 0.0)),
        )
        .expect("放置桌腿失败");

        let bounds = doc.definition_bounds(table).expect("定义应存在");
        assert_eq!(bounds.min(), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(bounds.max(), Point3::new(10.0, 6.0, 4.0));

        let placed = doc
            .add_component_instance(
                Container::Model,
                table,
                AffineTransform::from_scale(2.0, 1.0, 1.0),
            )
            .expect("放置桌子失败");
        let world = doc.instance_bounds(placed).expect("实例包围盒");
        assert_eq!(world.width(), 20.0);
        assert_eq!(doc.bounds().map(|b| b.depth()), Some(4.0));
    }

    #[test]
    fn nesting_a_definition_inside_itself_is_rejected() {
        let mut doc = Document::new();
        let outer = boxed(&mut doc, "Outer", (1.0, 1.0, 1.0));
        let inner = boxed(&mut doc, "Inner", (1.0, 1.0, 1.0));
        assert!(
            doc.add_component_instance(Container::Definition(outer), outer, AffineTransform::IDENTITY)
                .is_none()
        );
        let nested = doc
            .add_component_instance(Container::Definition(outer), inner, AffineTransform::IDENTITY)
            .expect("嵌套合法定义");
        assert!(
            doc.add_component_instance(Container::Definition(inner), outer, AffineTransform::IDENTITY)
                .is_none()
        );
        // 改指同样需要防止自嵌套
        assert!(!doc.set_component_definition(nested, outer));
    }

    #[test]
    fn retargeting_and_erasing_keep_instance_lists_consistent() {
        let mut doc = Document::new();
        let a = boxed(&mut doc, "A", (1.0, 1.0, 1.0));
        let b = boxed(&mut doc, "B", (2.0, 2.0, 2.0));
        let instance = doc
            .add_component_instance(Container::Model, a, AffineTransform::IDENTITY)
            .expect("放置实例");
        assert_eq!(doc.definition(a).map(|d| d.instances().len()), Some(1));

        assert!(doc.set_component_definition(instance, b));
        assert!(doc.definition(a).expect("A").instances().is_empty());
        assert_eq!(doc.definition(b).expect("B").instances(), &[instance]);

        let (group, anonymous) = doc
            .add_group(Container::Model, AffineTransform::IDENTITY)
            .expect("创建群组");
        assert!(doc.definition(anonymous).expect("匿名定义").is_group);
        assert!(!doc.set_component_definition(group, b));

        assert!(doc.erase(group));
        assert!(!doc.contains(group));
        assert!(doc.definition(anonymous).expect("匿名定义保留").instances().is_empty());
        assert_eq!(doc.container_entities(Container::Model), Some(&[instance][..]));
        assert!(!doc.erase(group));
    }

    #[test]
    fn document_survives_json_snapshot() {
        let mut doc = Document::new();
        let chair = boxed(&mut doc, "Chair", (2.0, 4.0, 6.0));
        let id = doc
            .add_component_instance(Container::Model, chair, AffineTransform::IDENTITY)
            .expect("放置实例");
        doc.set_material(id, Some(Material::with_color("Oak", [180, 140, 90])));

        let json = serde_json::to_string(&doc).expect("序列化文档");
        let restored: Document = serde_json::from_str(&json).expect("反序列化文档");
        assert_eq!(restored.definition_by_name("Chair"), Some(chair));
        assert_eq!(
            restored.instance(id).and_then(|i| i.material.clone()),
            Some(Material::with_color("Oak", [180, 140, 90]))
        );
        assert_eq!(restored.definition_bounds(chair), doc.definition_bounds(chair));
    }

    fn placed(document: &mut Document, container: Container, definition: DefinitionId) -> EntityId {
        document
            .add_component_instance(container, definition, AffineTransform::IDENTITY)
            .expect("放置实例")
    }

    #[test]
    fn built_document_passes_validation() {
        let mut doc = Document::new();
        let chair = boxed(&mut doc, "Chair", (1.0, 1.0, 1.0));
        let table = boxed(&mut doc, "Table", (2.0, 1.0, 2.0));
        placed(&mut doc, Container::Definition(table), chair);
        placed(&mut doc, Container::Model, table);
        let (group, contents) = doc
            .add_group(Container::Model, AffineTransform::IDENTITY)
            .expect("创建群组");
        placed(&mut doc, Container::Definition(contents), chair);
        assert_eq!(doc.validate(), Ok(()));

        // 群组链接过期但仍登记在匿名定义中
        doc.instance_mut(group).expect("群组").kind = InstanceKind::Group {
            entities_owner: chair,
        };
        assert_eq!(doc.validate(), Ok(()));

        assert!(doc.erase(group));
        assert_eq!(doc.validate(), Ok(()));
    }

    #[test]
    fn nesting_cycle_is_rejected() {
        let mut doc = Document::new();
        let a = boxed(&mut doc, "A", (1.0, 1.0, 1.0));
        let b = boxed(&mut doc, "B", (1.0, 1.0, 1.0));
        let c = boxed(&mut doc, "C", (1.0, 1.0, 1.0));
        placed(&mut doc, Container::Definition(a), b);
        let inner = placed(&mut doc, Container::Definition(b), c);
        assert_eq!(doc.validate(), Ok(()));

        doc.instance_mut(inner).expect("实例").kind = InstanceKind::Group { entities_owner: a };
        assert!(matches!(doc.validate(), Err(DocumentError::NestingCycle(_))));
    }

    #[test]
    fn self_nesting_is_rejected() {
        let mut doc = Document::new();
        let a = boxed(&mut doc, "A", (1.0, 1.0, 1.0));
        let b = boxed(&mut doc, "B", (1.0, 1.0, 1.0));
        let inner = placed(&mut doc, Container::Definition(a), b);
        doc.instance_mut(inner).expect("实例").kind = InstanceKind::Group { entities_owner: a };
        assert_eq!(doc.validate(), Err(DocumentError::NestingCycle(a.get())));
    }

    #[test]
    fn retargeted_component_must_be_registered() {
        let mut doc = Document::new();
        let chair = boxed(&mut doc, "Chair", (1.0, 1.0, 1.0));
        let stool = boxed(&mut doc, "Stool", (1.0, 1.0, 1.0));
        let id = placed(&mut doc, Container::Model, chair);
        doc.instance_mut(id).expect("实例").kind = InstanceKind::Component { definition: stool };
        assert_eq!(
            doc.validate(),
            Err(DocumentError::UnregisteredInstance {
                entity: id.get(),
                definition: stool.get(),
            })
        );
    }

    #[test]
    fn parent_must_match_listing_container() {
        let mut doc = Document::new();
        let chair = boxed(&mut doc, "Chair", (1.0, 1.0, 1.0));
        let table = doc.add_definition("Table");
        let id = placed(&mut doc, Container::Model, chair);
        doc.instance_mut(id).expect("实例").parent = Container::Definition(table);
        assert_eq!(
            doc.validate(),
            Err(DocumentError::ParentMismatch {
                entity: id.get(),
                parent: Container::Definition(table),
                listed: Container::Model,
            })
        );
    }

    #[test]
    fn counters_and_duplicates_are_checked_after_deserializing() {
        let mut doc = Document::new();
        let chair = boxed(&mut doc, "Chair", (1.0, 1.0, 1.0));
        placed(&mut doc, Container::Model, chair);
        let value = serde_json::to_value(&doc).expect("序列化文档");

        let mut stale = value.clone();
        stale["next_entity_id"] = serde_json::json!(1);
        let stale: Document = serde_json::from_value(stale).expect("反序列化文档");
        assert!(matches!(
            stale.validate(),
            Err(DocumentError::StaleEntityCounter { next: 1, .. })
        ));

        let mut stale = value.clone();
        stale["next_definition_id"] = serde_json::json!(0);
        let stale: Document = serde_json::from_value(stale).expect("反序列化文档");
        assert_eq!(
            stale.validate(),
            Err(DocumentError::StaleDefinitionCounter { next: 0, max: 1 })
        );

        let mut duplicated = value;
        let first = duplicated["entities"][0].clone();
        duplicated["entities"]
            .as_array_mut()
            .expect("实体数组")
            .push(first);
        let duplicated: Document = serde_json::from_value(duplicated).expect("反序列化文档");
        assert_eq!(duplicated.validate(), Err(DocumentError::DuplicateEntity(1)));
    }
}
