//! Fusion strategies.
//!
//! A strategy combines one sub-slot reported by several inputs into the
//! output sub-slot. Sources arrive in input order and are never empty.

use std::fmt;

use contracts::{ContractError, FusionKind};
use nalgebra::{
    Isometry3, Matrix3, Matrix4, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3,
    Vector4,
};

/// Byte size of a 4x4 `f32` matrix
pub const MATRIX_BYTES: usize = 16 * std::mem::size_of::<f32>();

const LANE: usize = std::mem::size_of::<f32>();

/// Combine present sub-slots into one
pub trait Fusion: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `sources` is non-empty; every slice has the layout's element size, as does `out`.
    fn fuse(&self, sources: &[&[u8]], out: &mut [u8]);
}

/// Strategy for `kind`, checked against the element size it will run on
pub fn fusion_for(kind: FusionKind, element_size: usize) -> Result<Box<dyn Fusion>, ContractError> {
    match kind {
        FusionKind::First => Ok(Box::new(FirstPresent)),
        FusionKind::MeanF32 => {
            if element_size % LANE != 0 {
                return Err(ContractError::config_validation(
                    "sync.fusion",
                    format!("mean_f32 needs an element size divisible by 4, got {element_size}"),
                ));
            }
            Ok(Box::new(MeanF32))
        }
        FusionKind::RigidTransform => {
            if element_size != MATRIX_BYTES {
                return Err(ContractError::config_validation(
                    "sync.fusion",
                    format!(
                        "rigid_transform needs {MATRIX_BYTES}-byte elements, got {element_size}"
                    ),
                ));
            }
            Ok(Box::new(RigidTransform))
        }
    }
}

fn copy_first(sources: &[&[u8]], out: &mut [u8]) {
    let Some(first) = sources.first() else {
        return;
    };
    let n = out.len().min(first.len());
    out[..n].copy_from_slice(&first[..n]);
}

/// Copy of the first present input
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPresent;

impl Fusion for FirstPresent {
    fn name(&self) -> &'static str {
        "first"
    }

    fn fuse(&self, sources: &[&[u8]], out: &mut [u8]) {
        copy_first(sources, out);
    }
}

/// Lane-wise arithmetic mean over native-endian `f32`
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanF32;

impl Fusion for MeanF32 {
    fn name(&self) -> &'static str {
        "mean_f32"
    }

    fn fuse(&self, sources: &[&[u8]], out: &mut [u8]) {
        if sources.len() == 1 {
            copy_first(sources, out);
            return;
        }

        let count = sources.len() as f32;
        for (lane, chunk) in out.chunks_exact_mut(LANE).enumerate() {
            let range = lane * LANE..(lane + 1) * LANE;
            let sum: f32 = sources
                .iter()
                .filter_map(|src| src.get(range.clone()))
                .map(bytemuck::pod_read_unaligned::<f32>)
                .sum();
            chunk.copy_from_slice(bytemuck::bytes_of(&(sum / count)));
        }
    }
}

/// Average of row-major 4x4 rigid transforms.
///
/// Translations are averaged directly; rotations through sign-aligned
/// quaternion averaging, which is accurate for nearby orientations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RigidTransform;

impl RigidTransform {
    fn read(bytes: &[u8]) -> Option<Matrix4<f32>> {
        let values: [f32; 16] = bytemuck::pod_read_unaligned(bytes.get(..MATRIX_BYTES)?);
        Some(Matrix4::from_row_slice(&values))
    }

    fn write(matrix: &Matrix4<f32>, out: &mut [u8]) {
        let mut values = [0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                values[row * 4 + col] = matrix[(row, col)];
            }
        }
        out[..MATRIX_BYTES].copy_from_slice(bytemuck::bytes_of(&values));
    }

    fn rotation(matrix: &Matrix4<f32>) -> UnitQuaternion<f32> {
        let linear: Matrix3<f32> = matrix.fixed_view::<3, 3>(0, 0).into_owned();
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&linear))
    }

    fn translation(matrix: &Matrix4<f32>) -> Vector3<f32> {
        matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }
}

impl Fusion for RigidTransform {
    fn name(&self) -> &'static str {
        "rigid_transform"
    }

    fn fuse(&self, sources: &[&[u8]], out: &mut [u8]) {
        if sources.len() == 1 || out.len() < MATRIX_BYTES {
            copy_first(sources, out);
            return;
        }

        let matrices: Vec<Matrix4<f32>> = sources.iter().filter_map(|s| Self::read(s)).collect();
        let Some(first) = matrices.first() else {
            return;
        };
        let count = matrices.len() as f32;

        let pivot = Self::rotation(first);
        let mut rotation_sum = Vector4::zeros();
        let mut translation_sum = Vector3::zeros();
        for matrix in &matrices {
            let q = Self::rotation(matrix);
            // q and -q are the same rotation
            if q.coords.dot(&pivot.coords) < 0.0 {
                rotation_sum -= q.coords;
            } else {
                rotation_sum += q.coords;
            }
            translation_sum += Self::translation(matrix);
        }

        let rotation = UnitQuaternion::new_normalize(Quaternion::from_vector(rotation_sum / count));
        let translation = Translation3::from(translation_sum / count);
        Self::write(&Isometry3::from_parts(translation, rotation).to_homogeneous(), out);
    }
}
