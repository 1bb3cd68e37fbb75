//! Random inputs for checking compiled decoders against the interpreter.
use nanorand::{Rng, WyRand};
use vtxdec::{
    BoneMatrix, DecodeParams, DecodedFormat, DecodedLayout, Plan, Step,
    step::{Signed, Unsigned},
};

/// How float inputs are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Floats {
    /// Small finite values, and morph weights in `[0, 1]`.
    #[default]
    Finite,
    /// Arbitrary bit patterns, mixed with NaNs, infinities, denormals and signed zeros.
    Special,
}

const SPECIAL: [f32; 9] = [
    f32::NAN,
    -f32::NAN,
    f32::INFINITY,
    f32::NEG_INFINITY,
    f32::MAX,
    1.0e-40,
    -1.0e-40,
    0.0,
    -0.0,
];

fn finite(rng: &mut WyRand) -> f32 {
    rng.generate_range(0..4096u32) as f32 / 1024.0 - 2.0
}

/// A random float.
pub fn float(rng: &mut WyRand, floats: Floats) -> f32 {
    match floats {
        Floats::Finite => finite(rng),
        Floats::Special => match rng.generate_range(0..4u32) {
            0 => SPECIAL[rng.generate_range(0..SPECIAL.len())],
            1 => f32::from_bits(rng.generate()),
            _ => finite(rng),
        },
    }
}

/// Offsets and lengths of the float fields of a single morph target.
fn float_fields(plan: &Plan) -> Vec<(usize, usize)> {
    plan.steps
        .iter()
        .filter_map(|step| match step {
            Step::Weights(w) if w.format == Unsigned::F32 => {
                Some((plan.input.weights, w.count as usize))
            }
            Step::TexCoord(tc) if tc.format == Unsigned::F32 => Some((plan.input.texcoord, 2)),
            Step::Normal(n) if n.format == Signed::F32 => Some((plan.input.normal, 3)),
            Step::Position(p) if p.format == Signed::F32 => Some((plan.input.position, 3)),
            _ => None,
        })
        .map(|(offset, len)| (offset as usize, len))
        .collect()
}

/// Random input for `count` vertices of `plan`. Integer fields hold random bytes and float
/// fields are generated according to `floats`.
pub fn vertices(rng: &mut WyRand, plan: &Plan, count: usize, floats: Floats) -> Vec<u8> {
    let mut verts = vec![0; count * plan.input.stride as usize];
    rng.fill_bytes(&mut verts);

    let vertex_size = plan.input.vertex_size as usize;
    if vertex_size == 0 {
        return verts;
    }

    let fields = float_fields(plan);
    for target in verts.chunks_exact_mut(vertex_size) {
        for &(offset, len) in &fields {
            for i in 0..len {
                let at = offset + 4 * i;
                target[at..at + 4].copy_from_slice(&float(rng, floats).to_le_bytes());
            }
        }
    }

    verts
}

/// Random decoding parameters.
pub fn params(rng: &mut WyRand, floats: Floats) -> DecodeParams {
    let mut params = DecodeParams::default();
    for bone in &mut params.bones {
        *bone = BoneMatrix(std::array::from_fn(|_| float(rng, floats)));
    }

    for weight in &mut params.morph_weights {
        *weight = match floats {
            Floats::Finite => rng.generate_range(0..=256u32) as f32 / 256.0,
            Floats::Special => float(rng, floats),
        };
    }

    params.uv.u_scale = float(rng, floats);
    params.uv.v_scale = float(rng, floats);
    params.uv.u_offset = float(rng, floats);
    params.uv.v_offset = float(rng, floats);
    params
}

fn is_float(format: DecodedFormat) -> bool {
    matches!(
        format,
        DecodedFormat::Float1 | DecodedFormat::Float2 | DecodedFormat::Float3 | DecodedFormat::Float4
    )
}

/// Compares two buffers of vertices decoded into `layout`. Returns the index of the first vertex
/// which differs.
///
/// Bytes must be equal, except that any two NaNs in a float attribute are considered equal:
/// which NaN an operation returns depends on the order of its operands.
pub fn mismatch(layout: &DecodedLayout, expected: &[u8], decoded: &[u8]) -> Option<usize> {
    let stride = layout.stride() as usize;
    if expected.len() != decoded.len() {
        return Some(expected.len().min(decoded.len()) / stride.max(1));
    }

    if stride == 0 {
        return None;
    }

    let same = |a: &[u8], b: &[u8]| {
        layout.attributes().all(|(_, attr)| {
            let range = attr.range();
            let (a, b) = (&a[range.clone()], &b[range]);
            if !is_float(attr.format) {
                return a == b;
            }

            a.chunks_exact(4).zip(b.chunks_exact(4)).all(|(a, b)| {
                let a = f32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                let b = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            })
        })
    };

    expected
        .chunks_exact(stride)
        .zip(decoded.chunks_exact(stride))
        .position(|(a, b)| a != b && !same(a, b))
}
