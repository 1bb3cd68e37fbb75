use crate::{
    CodeGenerator, CompileError, CraneliftGenerator, JitDecoder, NullGenerator,
    verify::{self, Floats},
};
use nanorand::{Rng, WyRand};
use vtxdec::{
    DecodeParams, IndexBounds, Options, Plan, VertexDecoder,
    descriptor::{ColorEncoding, CoordsEncoding, TexCoordEncoding, VertexType, WeightEncoding},
    interp,
    step::Step,
};

/// Whether the host generator emits native code.
const HOST_JIT: bool = cfg!(target_arch = "x86_64");

fn options(bits: u32) -> Options {
    Options {
        expand_all_weights_to_float: bits & 1 != 0,
        expand_8bit_normals_to_float: bits & 2 != 0,
        expand_colors_to_float: bits & 4 != 0,
        skin_in_decode: bits & 8 != 0,
        prescale_uv: bits & 16 != 0,
        double_texcoords: bits & 32 != 0,
    }
}

/// Decodes with both the JIT and the interpreter and checks the outputs are identical.
fn check(jit: &mut impl VertexDecoder, rng: &mut WyRand, plan: &Plan) {
    check_with(jit, rng, plan, Floats::Finite);
}

fn check_with(jit: &mut impl VertexDecoder, rng: &mut WyRand, plan: &Plan, floats: Floats) {
    let lower = rng.generate_range(0..4u32);
    let len = rng.generate_range(1..8u32);
    let bounds = IndexBounds {
        lower,
        upper: lower + len - 1,
    };

    let verts = verify::vertices(rng, plan, bounds.upper as usize + 1, floats);
    let params = verify::params(rng, floats);
    let out_len = bounds.len() * plan.layout.stride() as usize;

    let mut expected = vec![0xAA; out_len];
    interp::decode(plan, &params, &verts, &mut expected, bounds).unwrap();

    let mut decoded = vec![0x55; out_len];
    jit.decode(plan, &params, &verts, &mut decoded, bounds).unwrap();

    assert_eq!(
        verify::mismatch(&plan.layout, &expected, &decoded),
        None,
        "{plan}\nbounds: {bounds:?}\nexpected: {expected:02x?}\ndecoded: {decoded:02x?}"
    );
}

#[test]
fn matches_interpreter_on_random_types() {
    let mut jit = JitDecoder::host().unwrap();
    let mut rng = WyRand::new_seed(0x5EED);

    for _ in 0..400 {
        let vt = VertexType::from_bits(rng.generate::<u32>());
        let plan = Plan::new(vt, options(rng.generate_range(0..64u32)));

        let morph_skin = plan.steps.iter().any(Step::is_morph_skin);
        assert_eq!(jit.get(&plan).is_some(), HOST_JIT && !morph_skin, "{plan}");

        check(&mut jit, &mut rng, &plan);
    }
}

#[test]
fn matches_interpreter_on_special_floats() {
    let mut jit = JitDecoder::host().unwrap();
    let mut rng = WyRand::new_seed(0xF1_0A75);

    let types = [
        VertexType::default()
            .with_weights(WeightEncoding::F32)
            .with_weight_count(3)
            .with_texcoord(TexCoordEncoding::F32)
            .with_normal(CoordsEncoding::F32)
            .with_position(CoordsEncoding::F32),
        VertexType::default()
            .with_weights(WeightEncoding::U16)
            .with_weight_count(8)
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::S16),
        VertexType::default()
            .with_texcoord(TexCoordEncoding::F32)
            .with_color0(ColorEncoding::Rgba8888)
            .with_normal(CoordsEncoding::F32)
            .with_position(CoordsEncoding::F32)
            .with_morph_count(3),
        VertexType::default()
            .with_color0(ColorEncoding::Rgba4444)
            .with_color1(ColorEncoding::Rgb565)
            .with_position(CoordsEncoding::S8)
            .with_morph_count(8),
        VertexType::default()
            .with_texcoord(TexCoordEncoding::F32)
            .with_position(CoordsEncoding::F32)
            .with_through(true),
    ];

    for vt in types {
        for bits in 0..64 {
            let plan = Plan::new(vt, options(bits));
            for _ in 0..4 {
                check_with(&mut jit, &mut rng, &plan, Floats::Special);
            }
        }
    }

    for _ in 0..200 {
        let vt = VertexType::from_bits(rng.generate::<u32>());
        let plan = Plan::new(vt, options(rng.generate_range(0..64u32)));
        check_with(&mut jit, &mut rng, &plan, Floats::Special);
    }
}

#[test]
fn matches_interpreter_on_common_types() {
    let mut jit = JitDecoder::host().unwrap();
    let mut rng = WyRand::new_seed(7);

    let types = [
        VertexType::default().with_position(CoordsEncoding::F32),
        VertexType::default()
            .with_texcoord(TexCoordEncoding::U16)
            .with_color0(ColorEncoding::Rgba8888)
            .with_normal(CoordsEncoding::S8)
            .with_position(CoordsEncoding::S16),
        VertexType::default()
            .with_weights(WeightEncoding::U8)
            .with_weight_count(8)
            .with_normal(CoordsEncoding::F32)
            .with_position(CoordsEncoding::F32),
        VertexType::default()
            .with_texcoord(TexCoordEncoding::U8)
            .with_color0(ColorEncoding::Rgba4444)
            .with_color1(ColorEncoding::Rgb565)
            .with_position(CoordsEncoding::S8)
            .with_morph_count(4),
        VertexType::default()
            .with_texcoord(TexCoordEncoding::U16)
            .with_color0(ColorEncoding::Rgba5551)
            .with_position(CoordsEncoding::S16)
            .with_through(true),
        VertexType::default()
            .with_color0(ColorEncoding::Reserved2)
            .with_normal(CoordsEncoding::S16),
    ];

    for vt in types {
        for bits in 0..64 {
            let plan = Plan::new(vt, options(bits));
            assert_eq!(jit.get(&plan).is_some(), HOST_JIT, "{plan}");
            for _ in 0..4 {
                check(&mut jit, &mut rng, &plan);
            }
        }
    }
}

#[test]
fn morph_with_skin_is_interpreted() {
    let vt = VertexType::default()
        .with_weights(WeightEncoding::U16)
        .with_weight_count(2)
        .with_position(CoordsEncoding::S16)
        .with_morph_count(2);
    let plan = Plan::new(
        vt,
        Options {
            skin_in_decode: true,
            ..Default::default()
        },
    );

    let mut generator = CraneliftGenerator::new().unwrap();
    let Err(CompileError::UnsupportedStep(step)) = generator.compile(&plan) else {
        panic!("morph with skin should not compile");
    };
    assert!(step.is_morph_skin());

    let mut jit = JitDecoder::new(generator);
    let mut rng = WyRand::new_seed(1);
    check(&mut jit, &mut rng, &plan);
    assert_eq!(jit.stats().unavailable, 1);
    assert_eq!(jit.stats().compiled, 0);
}

#[test]
fn null_generator_falls_back() {
    let mut jit = JitDecoder::new(NullGenerator);
    let plan = Plan::new(
        VertexType::default().with_position(CoordsEncoding::S8),
        Options::default(),
    );

    let verts = [64, 0xC0, 0];
    let mut decoded = [0; 12];
    let bounds = IndexBounds { lower: 0, upper: 0 };
    jit.decode(&plan, &DecodeParams::default(), &verts, &mut decoded, bounds)
        .unwrap();

    assert_eq!(&decoded[..4], &0.5f32.to_le_bytes());
    assert_eq!(&decoded[4..8], &(-0.5f32).to_le_bytes());
    assert_eq!(jit.stats().unavailable, 1);
}

#[test]
fn host_generator_matches_architecture() {
    let mut jit = JitDecoder::host().unwrap();
    let plan = Plan::new(
        VertexType::default().with_position(CoordsEncoding::F32),
        Options::default(),
    );

    assert_eq!(jit.get(&plan).is_some(), HOST_JIT);
    assert_eq!(jit.stats().compiled, u64::from(HOST_JIT));
    assert_eq!(jit.stats().unavailable, u64::from(!HOST_JIT));
}

#[cfg(target_arch = "x86_64")]
#[test]
fn decoders_run_while_compiling() {
    let mut generator = CraneliftGenerator::new().unwrap();
    let plan = Plan::new(
        VertexType::default()
            .with_texcoord(TexCoordEncoding::U16)
            .with_color0(ColorEncoding::Rgb565)
            .with_position(CoordsEncoding::F32),
        Options::default(),
    );
    let decoder = generator.compile(&plan).unwrap();

    let mut rng = WyRand::new_seed(3);
    let bounds = IndexBounds { lower: 0, upper: 15 };
    let verts = verify::vertices(&mut rng, &plan, bounds.len(), Floats::Finite);
    let params = verify::params(&mut rng, Floats::Finite);

    let mut expected = vec![0; bounds.len() * plan.layout.stride() as usize];
    interp::decode(&plan, &params, &verts, &mut expected, bounds).unwrap();

    let done = std::sync::atomic::AtomicBool::new(false);
    std::thread::scope(|s| {
        let decoding = s.spawn(|| {
            let mut decoded = vec![0; expected.len()];
            let mut runs = 0u32;
            while runs < 64 || !done.load(std::sync::atomic::Ordering::Relaxed) {
                decoder.decode(&params, &verts, &mut decoded, bounds).unwrap();
                assert_eq!(decoded, expected);
                runs += 1;
            }
        });

        let mut rng = WyRand::new_seed(4);
        for _ in 0..64 {
            let vt = VertexType::from_bits(rng.generate::<u32>());
            let plan = Plan::new(vt, options(rng.generate_range(0..64u32)));
            if plan.steps.iter().any(Step::is_morph_skin) {
                continue;
            }

            generator.compile(&plan).unwrap();
        }

        done.store(true, std::sync::atomic::Ordering::Relaxed);
        decoding.join().unwrap();
    });
}

#[cfg(target_arch = "x86_64")]
#[test]
fn decoders_are_cached_until_reset() {
    let mut jit = JitDecoder::host().unwrap();
    let plan = Plan::new(
        VertexType::default()
            .with_color0(ColorEncoding::Rgb565)
            .with_position(CoordsEncoding::F32),
        Options::default(),
    );

    jit.get(&plan).unwrap();
    jit.get(&plan).unwrap();
    let stats = jit.stats();
    assert_eq!(stats.compiled, 1);
    assert!(stats.code_bytes > 0);

    jit.reset();
    assert_eq!(jit.stats().compiled, 0);

    let decoder = jit.get(&plan).unwrap();
    assert_eq!(decoder.plan(), &plan);
    assert_eq!(jit.stats().compiled, 1);
}

#[test]
fn short_buffers_are_rejected() {
    let mut jit = JitDecoder::host().unwrap();
    let plan = Plan::new(
        VertexType::default().with_position(CoordsEncoding::S16),
        Options::default(),
    );

    let bounds = IndexBounds { lower: 1, upper: 2 };
    let verts = [0; 17];
    let mut decoded = [0; 24];
    assert!(
        jit.decode(&plan, &DecodeParams::default(), &verts, &mut decoded, bounds)
            .is_err()
    );

    let verts = [0; 18];
    let mut decoded = [0; 23];
    assert!(
        jit.decode(&plan, &DecodeParams::default(), &verts, &mut decoded, bounds)
            .is_err()
    );
}
