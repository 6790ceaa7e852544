//! 替换变换求解。
//!
//! 给定候选实例的变换、其定义的局部包围盒以及替换定义的局部包围盒，
//! 求出一个调整变换，使替换后的实例占据与原实例相同的包围范围。
//!
//! - 三维：逐轴缩放 `S`，先把替换定义的最小角点移到原点（`T1`），缩放后再移到
//!   原定义的最小角点（`T2`），得到局部拟合 `F = T2 · S · T1`。
//! - 二维（任一维度为 0）：两侧都必须是扁平的。扁平轴不一致时先做一次 90° 转向，
//!   再在两个非扁平轴上按同样方式拟合，`F = T2 · S · T1 · Q`。
//!
//! 对外给出的调整量是 `N = t · F · t⁻¹`，作用在实例现有变换左侧。

use glam::DVec3;
use replacer_core::geometry::{AffineTransform, Axis, BoundingBox, ORIGIN};
use tracing::debug;

use crate::errors::SkipReason;

pub const DEFAULT_IDENTITY_TOLERANCE: f64 = 1e-9;

/// 二维替换的完成策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanarPolicy {
    /// 生成与三维分支对应的缩放 + 角点对齐（必要时 90° 转向）变换。
    #[default]
    Fit,
    /// 只替换形状，始终保留原有放置。
    KeepPlacement,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub planar_policy: PlanarPolicy,
    pub identity_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            planar_policy: PlanarPolicy::default(),
            identity_tolerance: DEFAULT_IDENTITY_TOLERANCE,
        }
    }
}

/// 实例放置后的足迹比例：定义跨度 / 放置后跨度。
///
/// 取哪一行由 `basis` 决定：定义本身在 X 向扁平时总取 X 行，
/// 否则依次看放置后的包围盒是否在 Y、Z 向扁平。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootprintRatios {
    pub basis: Axis,
    /// 与替换定义扁平轴不一致，即视为经过转向。
    pub reoriented: bool,
    pub sy: f64,
    pub sx: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarFit {
    pub replacement_flat: Axis,
    pub candidate_flat: Axis,
    /// 局部坐标下扁平轴不一致，拟合前需要 90° 转向。
    pub rotated: bool,
    /// 放置后不再轴对齐（例如绕轴旋转 45°）时为 `None`。
    pub footprint: Option<FootprintRatios>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitKind {
    Volumetric,
    Planar(PlanarFit),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    /// 定义局部坐标下的拟合 `F`。
    pub local: AffineTransform,
    /// 经实例变换共轭到父坐标系的 `N = t · F · t⁻¹`。
    pub conjugated: AffineTransform,
    pub scale: DVec3,
    pub kind: FitKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Solution {
    Skip(SkipReason),
    /// 无需调整变换。
    Identity,
    Adjust(Adjustment),
}

#[derive(Debug, Clone, Default)]
pub struct ReplacementSolver {
    settings: SolverSettings,
}

impl ReplacementSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    #[inline]
    pub fn settings(&self) -> SolverSettings {
        self.settings
    }

    pub fn solve(
        &self,
        transform: &AffineTransform,
        instance_bounds: &BoundingBox,
        replacement_bounds: &BoundingBox,
    ) -> Solution {
        if instance_bounds.is_empty() || replacement_bounds.is_empty() {
            return Solution::Skip(SkipReason::IncompatibleGeometry);
        }

        let fit = if replacement_bounds.is_planar() {
            if !instance_bounds.is_planar() {
                return Solution::Skip(SkipReason::IncompatibleGeometry);
            }
            let Some(analysis) = analyse_planar(transform, instance_bounds, replacement_bounds) else {
                return Solution::Skip(SkipReason::IncompatibleGeometry);
            };
            debug!(
                replacement_flat = analysis.replacement_flat.dimension_name(),
                candidate_flat = analysis.candidate_flat.dimension_name(),
                rotated = analysis.rotated,
                footprint = ?analysis.footprint,
                "二维替换"
            );
            match self.settings.planar_policy {
                PlanarPolicy::KeepPlacement => return Solution::Identity,
                PlanarPolicy::Fit => planar_fit(instance_bounds, replacement_bounds, &analysis)
                    .map(|(local, scale)| (local, scale, FitKind::Planar(analysis))),
            }
        } else {
            if instance_bounds.is_planar() {
                return Solution::Skip(SkipReason::IncompatibleGeometry);
            }
            volumetric_fit(instance_bounds, replacement_bounds)
                .map(|(local, scale)| (local, scale, FitKind::Volumetric))
        };

        let Some((local, scale, kind)) = fit else {
            return Solution::Skip(SkipReason::IncompatibleGeometry);
        };
        if local.is_identity(self.settings.identity_tolerance) {
            return Solution::Identity;
        }
        let Some(inverse) = transform.inverse() else {
            return Solution::Skip(SkipReason::SingularPlacement);
        };

        Solution::Adjust(Adjustment {
            local,
            conjugated: *transform * local * inverse,
            scale,
            kind,
        })
    }
}

fn volumetric_fit(
    instance: &BoundingBox,
    replacement: &BoundingBox,
) -> Option<(AffineTransform, DVec3)> {
    let scale = instance.dimensions() / replacement.dimensions();
    let to_origin = AffineTransform::from_translation(replacement.corner(0)?.vector_to(ORIGIN));
    let to_corner = AffineTransform::from_translation(ORIGIN.vector_to(instance.corner(0)?));
    let local = to_corner * AffineTransform::from_scale(scale.x, scale.y, scale.z) * to_origin;
    Some((local, scale))
}

fn planar_fit(
    instance: &BoundingBox,
    replacement: &BoundingBox,
    analysis: &PlanarFit,
) -> Option<(AffineTransform, DVec3)> {
    let turn = AffineTransform::quarter_turn(analysis.replacement_flat, analysis.candidate_flat);
    let turned = replacement.transformed(&turn);

    let mut scale = DVec3::ONE;
    for axis in Axis::ALL {
        if axis != analysis.candidate_flat {
            scale[axis.index()] = instance.extent(axis) / turned.extent(axis);
        }
    }
    // 线、点这类多轴退化的包围盒无法确定缩放
    if !scale.is_finite() || scale.min_element() <= 0.0 {
        return None;
    }

    let to_origin = AffineTransform::from_translation(turned.corner(0)?.vector_to(ORIGIN));
    let to_corner = AffineTransform::from_translation(ORIGIN.vector_to(instance.corner(0)?));
    let local = to_corner * AffineTransform::from_scale(scale.x, scale.y, scale.z) * to_origin * turn;
    Some((local, scale))
}

fn analyse_planar(
    transform: &AffineTransform,
    instance: &BoundingBox,
    replacement: &BoundingBox,
) -> Option<PlanarFit> {
    let replacement_flat = replacement.flat_axis()?;
    let candidate_flat = instance.flat_axis()?;
    let placed = instance.transformed(transform);
    let footprint = footprint_ratios(instance, &placed, replacement_flat);
    Some(PlanarFit {
        replacement_flat,
        candidate_flat,
        rotated: replacement_flat != candidate_flat,
        footprint,
    })
}

fn footprint_ratios(
    definition: &BoundingBox,
    placed: &BoundingBox,
    replacement_flat: Axis,
) -> Option<FootprintRatios> {
    let basis = if definition.width() == 0.0 {
        Axis::X
    } else if placed.height() == 0.0 {
        Axis::Y
    } else if placed.depth() == 0.0 {
        Axis::Z
    } else {
        return None;
    };
    let (sy, sx) = match basis {
        Axis::X => (
            definition.height() / placed.height(),
            definition.depth() / placed.depth(),
        ),
        Axis::Y => (
            definition.height() / placed.width(),
            definition.depth() / placed.depth(),
        ),
        Axis::Z => (
            definition.height() / placed.height(),
            definition.depth() / placed.width(),
        ),
    };
    (sy.is_finite() && sx.is_finite()).then_some(FootprintRatios {
        basis,
        reoriented: basis != replacement_flat,
        sy,
        sx,
    })
}
