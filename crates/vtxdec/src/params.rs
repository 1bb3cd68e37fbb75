//! Per-draw decoding parameters.
use glam::{Affine3A, Mat4};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Maximum number of bones (and therefore weights) of a vertex.
pub const MAX_BONES: usize = 8;
/// Maximum number of morph targets of a vertex.
pub const MAX_MORPHS: usize = 8;

/// A 4x3 bone matrix, stored column-major: three basis columns followed by the translation.
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct BoneMatrix(pub [f32; 12]);

impl BoneMatrix {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        0.0, 0.0, 0.0, //
    ]);

    /// Builds a bone matrix from the affine part of `mat`.
    pub fn from_mat4(mat: Mat4) -> Self {
        let [x, y, z, w] = [mat.x_axis, mat.y_axis, mat.z_axis, mat.w_axis];
        Self([
            x.x, x.y, x.z, //
            y.x, y.y, y.z, //
            z.x, z.y, z.z, //
            w.x, w.y, w.z, //
        ])
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_cols_array(&self.0)
    }
}

impl Default for BoneMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Affine3A> for BoneMatrix {
    fn from(value: Affine3A) -> Self {
        Self(value.to_cols_array())
    }
}

/// Scale and offset applied to prescaled texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct UvScale {
    pub u_scale: f32,
    pub v_scale: f32,
    pub u_offset: f32,
    pub v_offset: f32,
}

impl Default for UvScale {
    fn default() -> Self {
        Self {
            u_scale: 1.0,
            v_scale: 1.0,
            u_offset: 0.0,
            v_offset: 0.0,
        }
    }
}

/// State supplied by the caller for a single decode call.
///
/// Compiled decoders read this structure through raw offsets, so its layout is fixed and has no
/// padding.
#[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DecodeParams {
    /// Bone matrices used for skinning.
    pub bones: [BoneMatrix; MAX_BONES],
    /// Blend weight of every morph target.
    pub morph_weights: [f32; MAX_MORPHS],
    /// Texture coordinate scale and offset, used by prescaled texcoords.
    pub uv: UvScale,
}

const_assert_eq!(size_of::<BoneMatrix>(), 48);
const_assert_eq!(size_of::<DecodeParams>(), 48 * MAX_BONES + 4 * MAX_MORPHS + 16);

impl Default for DecodeParams {
    fn default() -> Self {
        let mut morph_weights = [0.0; MAX_MORPHS];
        morph_weights[0] = 1.0;

        Self {
            bones: [BoneMatrix::IDENTITY; MAX_BONES],
            morph_weights,
            uv: UvScale::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn mat4_conversion_keeps_translation() {
        let mat = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_z(0.5),
            Vec3::new(1.0, 2.0, 3.0),
        );

        let bone = BoneMatrix::from_mat4(mat);
        assert_eq!(&bone.0[9..], &[1.0, 2.0, 3.0]);

        let affine = bone.to_affine();
        let p = Vec3::new(0.5, -1.0, 4.0);
        assert!(affine.transform_point3(p).abs_diff_eq(mat.transform_point3(p), 1e-5));
        assert_eq!(BoneMatrix::from(affine), bone);
    }
}
