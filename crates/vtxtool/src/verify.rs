use eyre_pretty::{Result, bail};
use nanorand::{Rng, WyRand};
use vtxdec::{IndexBounds, Options, Plan, VertexDecoder, VertexType, interp};
use vtxjit::{
    JitDecoder,
    verify::{self, Floats},
};

/// Decodes `count` random vertices with both decoders. Returns whether the outputs match.
fn compare(
    jit: &mut JitDecoder,
    rng: &mut WyRand,
    plan: &Plan,
    count: u32,
    floats: Floats,
) -> Result<bool> {
    let bounds = IndexBounds {
        lower: 0,
        upper: count.max(1) - 1,
    };

    let verts = verify::vertices(rng, plan, bounds.len(), floats);
    let params = verify::params(rng, floats);
    let len = bounds.len() * plan.layout.stride() as usize;

    let mut expected = vec![0; len];
    interp::decode(plan, &params, &verts, &mut expected, bounds)?;

    let mut decoded = vec![0; len];
    jit.decode(plan, &params, &verts, &mut decoded, bounds)?;

    match verify::mismatch(&plan.layout, &expected, &decoded) {
        Some(first) => {
            tracing::error!("mismatch at vertex {first}\n{plan}");
            Ok(false)
        }
        None => Ok(true),
    }
}

fn report(jit: &JitDecoder, checked: u32, failed: u32) -> Result<()> {
    let stats = jit.stats();
    println!(
        "checked {checked} plans: {} compiled ({} bytes), {} interpreted, {failed} mismatches",
        stats.compiled, stats.code_bytes, stats.unavailable
    );

    if failed > 0 {
        bail!("jit and interpreter disagree on {failed} plans");
    }

    Ok(())
}

/// Checks a single vertex type over `count` vertices.
pub fn single(
    vertex_type: VertexType,
    options: Options,
    count: u32,
    seed: u64,
    floats: Floats,
) -> Result<()> {
    let mut jit = JitDecoder::host()?;
    let mut rng = WyRand::new_seed(seed);

    let plan = Plan::new(vertex_type, options);
    let failed = u32::from(!compare(&mut jit, &mut rng, &plan, count, floats)?);
    report(&jit, 1, failed)
}

/// Checks `count` random vertex types.
pub fn random(options: Options, count: u32, seed: u64, floats: Floats) -> Result<()> {
    let mut jit = JitDecoder::host()?;
    let mut rng = WyRand::new_seed(seed);

    let mut failed = 0;
    for _ in 0..count {
        let vertex_type = VertexType::from_bits(rng.generate::<u32>());
        let plan = Plan::new(vertex_type, options);
        let vertices = rng.generate_range(1..=16u32);
        if !compare(&mut jit, &mut rng, &plan, vertices, floats)? {
            failed += 1;
        }
    }

    report(&jit, count, failed)
}
