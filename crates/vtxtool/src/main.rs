mod verify;

use clap::{Args as ClapArgs, Parser, Subcommand};
use eyre_pretty::{Context, Result, bail};
use vtxdec::{
    DecodeParams, IndexBounds, InterpreterDecoder, Options, Plan, VertexDecoder, VertexReader,
    VertexType, compute_bounds, descriptor::IndexWidth,
};
use vtxjit::{JitDecoder, verify::Floats};

/// Decoding options.
#[derive(Debug, Clone, Copy, ClapArgs)]
struct OptionArgs {
    /// Decode every weight to float
    #[arg(long)]
    expand_weights: bool,
    /// Decode 8-bit normals to float
    #[arg(long)]
    expand_normals: bool,
    /// Decode colors to float
    #[arg(long)]
    expand_colors: bool,
    /// Apply skinning while decoding
    #[arg(long)]
    skin: bool,
    /// Apply the UV scale and offset while decoding
    #[arg(long)]
    prescale_uv: bool,
    /// Double the range of 16-bit texture coordinates
    #[arg(long)]
    double_texcoords: bool,
}

impl From<OptionArgs> for Options {
    fn from(value: OptionArgs) -> Self {
        Self {
            expand_all_weights_to_float: value.expand_weights,
            expand_8bit_normals_to_float: value.expand_normals,
            expand_colors_to_float: value.expand_colors,
            skin_in_decode: value.skin,
            prescale_uv: value.prescale_uv,
            double_texcoords: value.double_texcoords,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Describe the decoding plan of a vertex type.
    Describe {
        /// Packed vertex type (decimal, 0x or 0b prefixed)
        vertex_type: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Decode vertices and print their attributes.
    Decode {
        /// Packed vertex type (decimal, 0x or 0b prefixed)
        vertex_type: String,
        /// Vertex data, as hex bytes
        data: String,
        #[command(flatten)]
        options: OptionArgs,
        /// Use the interpreter instead of the JIT
        #[arg(long, default_value_t = false)]
        interpret: bool,
    },
    /// Compare the JIT against the interpreter on random vertex data.
    Verify {
        /// Packed vertex type (decimal, 0x or 0b prefixed). Random types are checked if missing
        vertex_type: Option<String>,
        #[command(flatten)]
        options: OptionArgs,
        /// Number of vertices (or vertex types, if none is given) to check
        #[arg(short, long, default_value_t = 64)]
        count: u32,
        /// Seed of the random data
        #[arg(short, long, default_value_t = 0)]
        seed: u64,
        /// Mix NaNs, infinities and denormals into float inputs
        #[arg(long, default_value_t = false)]
        special: bool,
    },
    /// Compute the bounds of an index buffer.
    Bounds {
        /// Width of each index, in bytes (0 for non-indexed draws)
        #[arg(short, long, default_value_t = 2)]
        width: u8,
        /// Number of indices. Defaults to every given index
        #[arg(short, long)]
        count: Option<usize>,
        /// Indices
        indices: Vec<u32>,
    },
}

/// A CLI to inspect and verify packed vertex decoders.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Action to take
    #[command(subcommand)]
    command: Command,
}

fn parse_u32(value: &str) -> Result<u32> {
    let value = value.replace("_", "");
    let value = if let Some(value) = value.strip_prefix("0x") {
        u32::from_str_radix(value, 16)
    } else if let Some(value) = value.strip_prefix("0b") {
        u32::from_str_radix(value, 2)
    } else {
        value.parse()
    };

    value.context("parsing vertex type")
}

fn parse_hex(data: &str) -> Result<Vec<u8>> {
    let digits: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();

    if digits.len() % 2 != 0 {
        bail!("vertex data has an odd number of hex digits");
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).context("parsing vertex data"))
        .collect()
}

fn describe(plan: &Plan) {
    println!("{plan}");
    println!(
        "input: stride {}, weights @ {}, texcoord @ {}, color0 @ {}, color1 @ {}, normal @ {}, position @ {}",
        plan.input.stride,
        plan.input.weights,
        plan.input.texcoord,
        plan.input.color0,
        plan.input.color1,
        plan.input.normal,
        plan.input.position
    );
}

fn decode(plan: &Plan, data: &[u8], interpret: bool) -> Result<()> {
    let stride = plan.input.stride as usize;
    if stride == 0 || data.len() < stride {
        bail!("vertex data holds no complete vertex");
    }

    let count = data.len() / stride;
    let bounds = IndexBounds {
        lower: 0,
        upper: count as u32 - 1,
    };

    let mut decoder: Box<dyn VertexDecoder> = if interpret {
        Box::new(InterpreterDecoder)
    } else {
        Box::new(JitDecoder::host()?)
    };

    let mut decoded = vec![0; count * plan.layout.stride() as usize];
    decoder.decode(plan, &DecodeParams::default(), data, &mut decoded, bounds)?;

    let mut reader = VertexReader::for_plan(&decoded, plan);
    for index in 0..count {
        reader.goto(index);
        println!("vertex {index}:");
        if reader.has_weights() {
            println!("  weights  {:?}", reader.read_weights());
        }
        if reader.has_uv() {
            println!("  uv       {:?}", reader.read_uv());
        }
        if reader.has_color0() {
            println!("  color0   {:?}", reader.read_color0_8888());
        }
        if reader.has_color1() {
            println!("  color1   {:?}", reader.read_color1());
        }
        if reader.has_normal() {
            println!("  normal   {:?}", reader.read_normal());
        }
        if reader.is_through() {
            println!("  position {:?}", reader.read_pos_through_z16());
        } else {
            println!("  position {:?}", reader.read_pos());
        }
    }

    Ok(())
}

fn bounds(width: u8, count: Option<usize>, indices: &[u32]) -> Result<()> {
    let width = IndexWidth::try_from(width)?;
    let count = count.unwrap_or(indices.len());

    let bytes: Vec<u8> = match width {
        IndexWidth::None => Vec::new(),
        IndexWidth::U8 => indices.iter().map(|&i| i as u8).collect(),
        IndexWidth::U16 => indices
            .iter()
            .flat_map(|&i| (i as u16).to_le_bytes())
            .collect(),
        IndexWidth::U32 => indices.iter().flat_map(|&i| i.to_le_bytes()).collect(),
    };

    let bounds = compute_bounds(&bytes, count, width)?;
    println!(
        "lower {}, upper {} ({} vertices)",
        bounds.lower,
        bounds.upper,
        bounds.len()
    );

    Ok(())
}

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("vtxdec=info,vtxjit=info,vtxtool=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();

    let args = Args::parse();
    match args.command {
        Command::Describe {
            vertex_type,
            options,
        } => {
            let vertex_type = VertexType::from_bits(parse_u32(&vertex_type)?);
            describe(&Plan::new(vertex_type, options.into()));
            Ok(())
        }
        Command::Decode {
            vertex_type,
            data,
            options,
            interpret,
        } => {
            let vertex_type = VertexType::from_bits(parse_u32(&vertex_type)?);
            let plan = Plan::new(vertex_type, options.into());
            decode(&plan, &parse_hex(&data)?, interpret)
        }
        Command::Verify {
            vertex_type,
            options,
            count,
            seed,
            special,
        } => {
            let floats = if special {
                Floats::Special
            } else {
                Floats::Finite
            };

            match vertex_type {
                Some(vertex_type) => {
                    let vertex_type = VertexType::from_bits(parse_u32(&vertex_type)?);
                    verify::single(vertex_type, options.into(), count, seed, floats)
                }
                None => verify::random(options.into(), count, seed, floats),
            }
        }
        Command::Bounds {
            width,
            count,
            indices,
        } => bounds(width, count, &indices),
    }
}
