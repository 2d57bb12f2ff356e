use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use trpx::{Mode, Parallelism, Sample, Terse, TrpxError};

/// Compress and decompress raw integral frame data.
#[derive(Parser)]
#[command(name = "trpx", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a raw sample file into a container
    Compress {
        /// Input file of raw samples in native byte order
        input: PathBuf,
        /// Output container file
        output: PathBuf,
        /// Element type of the input samples
        #[arg(long = "type", value_enum, default_value_t = ValueType::Uint16)]
        value_type: ValueType,
        /// Values per frame; the whole file is one frame when omitted
        #[arg(long)]
        frame_size: Option<usize>,
        /// Encoding block size
        #[arg(long, default_value_t = 12)]
        block: usize,
        /// Encoding mode
        #[arg(long, value_enum, default_value_t = CliMode::Auto)]
        mode: CliMode,
        /// Per-frame dimensions, e.g. --dim 512 512
        #[arg(long, num_args = 1..)]
        dim: Vec<usize>,
        /// Fraction of cores for backgrounded encodes (0 = sequential)
        #[arg(long, default_value_t = 0.0)]
        threads: f64,
        /// Verify decompression after compressing
        #[arg(long)]
        test: bool,
        /// Machine-readable stats on stdout
        #[arg(long)]
        json: bool,
    },
    /// Decompress a container back into raw samples
    Decompress {
        input: PathBuf,
        output: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the container prelude of a file
    Info { input: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ValueType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Auto,
    Signed,
    Unsigned,
    Small,
}

impl From<CliMode> for Mode {
    fn from(m: CliMode) -> Mode {
        match m {
            CliMode::Auto => Mode::Auto,
            CliMode::Signed => Mode::Signed,
            CliMode::Unsigned => Mode::Unsigned,
            CliMode::Small => Mode::SmallUnsigned,
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Compress {
            input,
            output,
            value_type,
            frame_size,
            block,
            mode,
            dim,
            threads,
            test,
            json,
        } => compress(
            &input, &output, value_type, frame_size, block, mode.into(), dim, threads, test, json,
        ),
        Command::Decompress { input, output, json } => decompress(&input, &output, json),
        Command::Info { input } => info(&input),
    }
}

#[allow(clippy::too_many_arguments)]
fn compress(
    input: &Path,
    output: &Path,
    value_type: ValueType,
    frame_size: Option<usize>,
    block: usize,
    mode: Mode,
    dim: Vec<usize>,
    threads: f64,
    test: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read(input).map_err(|e| io_context("reading", input, e))?;
    let start = Instant::now();
    let mut terse = Terse::with_parallelism(Parallelism::new(threads))?;
    terse.set_block_size(block)?;
    match value_type {
        ValueType::Int8 => compress_frames::<i8>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Uint8 => compress_frames::<u8>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Int16 => compress_frames::<i16>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Uint16 => compress_frames::<u16>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Int32 => compress_frames::<i32>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Uint32 => compress_frames::<u32>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Int64 => compress_frames::<i64>(&mut terse, &raw, frame_size, mode)?,
        ValueType::Uint64 => compress_frames::<u64>(&mut terse, &raw, frame_size, mode)?,
    }
    if !dim.is_empty() {
        terse.set_dim(dim)?;
    }
    let file = File::create(output).map_err(|e| io_context("creating", output, e))?;
    let mut out = BufWriter::new(file);
    terse.write(&mut out)?;
    out.flush()?;
    let compressed = terse.file_size()?;

    if test {
        let file = File::open(output).map_err(|e| io_context("reading back", output, e))?;
        let mut reread = Terse::read(&mut BufReader::new(file))?;
        let restored = decode_to_bytes(&mut reread)?;
        if restored != raw {
            return Err("roundtrip mismatch".into());
        }
        eprintln!("roundtrip verified");
    }

    let elapsed = start.elapsed();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "input_bytes": raw.len(),
                "compressed_bytes": compressed,
                "frames": terse.number_of_frames(),
                "elapsed_ms": elapsed.as_millis(),
            })
        );
    } else {
        eprintln!(
            "{} -> {} bytes ({:.1}%) in {:.2?}",
            raw.len(),
            compressed,
            compressed as f64 * 100.0 / raw.len().max(1) as f64,
            elapsed
        );
    }
    Ok(())
}

fn compress_frames<T: Sample>(
    terse: &mut Terse,
    raw: &[u8],
    frame_size: Option<usize>,
    mode: Mode,
) -> Result<(), TrpxError> {
    if raw.len() % std::mem::size_of::<T>() != 0 {
        return Err(TrpxError::Header(format!(
            "input length {} is not a multiple of the {}-byte element size",
            raw.len(),
            std::mem::size_of::<T>()
        )));
    }
    let values: Vec<T> = bytemuck::pod_collect_to_vec(raw);
    let frame = frame_size.unwrap_or(values.len().max(1));
    if values.len() % frame != 0 {
        return Err(TrpxError::ShapeMismatch {
            expected: frame,
            got: values.len() % frame,
        });
    }
    for chunk in values.chunks(frame) {
        terse.push_back_owned(chunk.to_vec(), mode)?;
    }
    Ok(())
}

fn decompress(input: &Path, output: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input).map_err(|e| io_context("reading", input, e))?;
    let start = Instant::now();
    let mut terse = Terse::read(&mut BufReader::new(file))?;
    let raw = decode_to_bytes(&mut terse)?;
    std::fs::write(output, &raw).map_err(|e| io_context("writing", output, e))?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "output_bytes": raw.len(),
                "frames": terse.number_of_frames(),
                "elapsed_ms": start.elapsed().as_millis(),
            })
        );
    }
    Ok(())
}

/// Decode every frame into raw bytes of the stored value type.
fn decode_to_bytes(terse: &mut Terse) -> Result<Vec<u8>, TrpxError> {
    fn bytes<T: Sample>(terse: &mut Terse) -> Result<Vec<u8>, TrpxError> {
        let values: Vec<T> = terse.prolix_to_vec()?;
        Ok(bytemuck::cast_slice(&values).to_vec())
    }
    match (terse.is_signed(), terse.bits_per_val()) {
        (false, 1..=8) => bytes::<u8>(terse),
        (false, 9..=16) => bytes::<u16>(terse),
        (false, 17..=32) => bytes::<u32>(terse),
        (false, 33..=64) => bytes::<u64>(terse),
        (true, 1..=8) => bytes::<i8>(terse),
        (true, 9..=16) => bytes::<i16>(terse),
        (true, 17..=32) => bytes::<i32>(terse),
        (true, 33..=64) => bytes::<i64>(terse),
        (_, bits) => Err(TrpxError::Header(format!(
            "unsupported stored bit depth {bits}"
        ))),
    }
}

fn info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input).map_err(|e| io_context("reading", input, e))?;
    let terse = Terse::read(&mut BufReader::new(file))?;
    println!(
        "{}",
        serde_json::json!({
            "prolix_bits": terse.bits_per_val(),
            "signed": terse.is_signed(),
            "block": terse.block_size(),
            "number_of_values": terse.size(),
            "number_of_frames": terse.number_of_frames(),
            "dimensions": terse.dim(),
        })
    );
    Ok(())
}

fn io_context(action: &str, path: &Path, err: std::io::Error) -> String {
    format!("error {} '{}': {}", action, path.display(), err)
}
