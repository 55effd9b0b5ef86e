//! j2kdec CLI - JPEG 2000 / HTJ2K codestream inspection and decoding.

use clap::{Parser, Subcommand, ValueEnum};
use j2kdec_rs::jpeg2000::image::ProgressionOrder;
use j2kdec_rs::jpeg2000::jp2::is_jp2;
use j2kdec_rs::{DecodeOptions, DecodedImage, J2kDecoder, Transform};
use log::{LevelFilter, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Decoder for JPEG 2000 Part 1 and HTJ2K codestreams
#[derive(Parser)]
#[command(name = "j2kdec")]
#[command(version)]
#[command(about = "Inspect and decode JPEG 2000 / HTJ2K images", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kdec info -i image.j2k
    j2kdec decode -i image.jp2 -o image.ppm -f ppm
    j2kdec decode -i image.jph -o pixels.raw -r 2

Set RUST_LOG=debug (or pass -v, -vv) for decoder diagnostics.")]
struct Cli {
    /// Raise the log level (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the main header: image and tile geometry, coding and quantization styles
    #[command(visible_alias = "i")]
    Info {
        /// Input file (.j2k, .j2c, .jph or .jp2)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Decode an image to raw samples or a PGM/PPM file
    #[command(visible_alias = "d")]
    Decode {
        /// Input file (.j2k, .j2c, .jph or .jp2)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,

        /// Number of highest resolution levels to discard
        #[arg(short, long, default_value_t = 0)]
        reduce: u8,

        /// Reject streams that deviate from the standard
        #[arg(long)]
        strict: bool,

        /// Use the fixed-point 9/7 wavelet
        #[arg(long)]
        bitexact: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Planar samples, one byte per sample up to 8 bits, else 16-bit little-endian
    Raw,
    /// Portable GrayMap, single component
    Pgm,
    /// Portable PixMap, three components
    Ppm,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Info { input } => show_info(&input),
        Commands::Decode {
            input,
            output,
            format,
            reduce,
            strict,
            bitexact,
        } => {
            let options = DecodeOptions::default()
                .with_reduction_factor(reduce)
                .with_strict_std_compliance(strict)
                .with_bitexact(bitexact);
            decode_image(&input, &output, format, &options)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn progression_name(order: ProgressionOrder) -> &'static str {
    match order {
        ProgressionOrder::Lrcp => "LRCP",
        ProgressionOrder::Rlcp => "RLCP",
        ProgressionOrder::Rpcl => "RPCL",
        ProgressionOrder::Pcrl => "PCRL",
        ProgressionOrder::Cprl => "CPRL",
    }
}

fn transform_name(transform: Transform) -> &'static str {
    match transform {
        Transform::Dwt53 => "5/3 reversible",
        Transform::Dwt97 | Transform::Dwt97Int => "9/7 irreversible",
    }
}

fn show_info(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!(
        "Format: {}",
        if is_jp2(&data) {
            "JP2 container"
        } else {
            "JPEG 2000 codestream"
        }
    );

    let mut decoder = J2kDecoder::new(&data, DecodeOptions::default());
    let header = decoder.read_header()?;
    let image = &header.image;
    let params = &header.params;

    println!();
    println!("SIZ:");
    println!("  Rsiz:        0x{:04X}", image.rsiz);
    println!(
        "  Image:       {}x{} at ({}, {})",
        image.width.saturating_sub(image.x_origin),
        image.height.saturating_sub(image.y_origin),
        image.x_origin,
        image.y_origin
    );
    println!(
        "  Tiles:       {}x{} at ({}, {}), {} in total",
        image.tile_width,
        image.tile_height,
        image.tile_x_origin,
        image.tile_y_origin,
        header.tile_count()
    );
    for (c, comp) in image.components.iter().enumerate() {
        println!(
            "  Component {}: {} bits {}, subsampling {}x{}",
            c,
            comp.depth,
            if comp.is_signed { "signed" } else { "unsigned" },
            comp.dx,
            comp.dy
        );
    }
    if let Some(cap) = &image.cap {
        // Pcap bits are numbered from the MSB; bit 15 announces Part 15.
        let ht = (cap.pcap >> (31 - 14)) & 1 != 0;
        println!("  HTJ2K:       {}", if ht { "yes" } else { "no" });
    }

    println!("COD:");
    println!("  Progression: {}", progression_name(params.prog_order));
    println!("  Layers:      {}", params.nlayers);
    println!("  MCT:         {}", if params.mct { "yes" } else { "no" });
    if let Some(cod) = params.codsty.first() {
        println!("  DWT levels:  {}", cod.nreslevels.saturating_sub(1));
        println!(
            "  Code-block:  {}x{}",
            1u32 << cod.log2_cblk_width,
            1u32 << cod.log2_cblk_height
        );
        println!("  Block style: 0x{:02X}", cod.cblk_style);
        println!("  Wavelet:     {}", transform_name(cod.transform));
    }
    if !params.poc.is_empty() {
        println!("  POC entries: {}", params.poc.len());
    }

    println!("QCD:");
    if let Some(qcd) = params.qntsty.first() {
        println!(
            "  Style:       {}",
            match qcd.quantsty {
                0 => "none",
                1 => "scalar derived",
                _ => "scalar expounded",
            }
        );
        println!("  Guard bits:  {}", qcd.nguardbits);
    }
    Ok(())
}

fn decode_image(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    options: &DecodeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let image = J2kDecoder::new(&data, *options).decode()?;
    info!(
        "decoded {}x{} image with {} components",
        image.width,
        image.height,
        image.components.len()
    );

    match format {
        OutputFormat::Raw => fs::write(output, raw_bytes(&image))?,
        OutputFormat::Pgm => write_pnm(output, &image, 1)?,
        OutputFormat::Ppm => write_pnm(output, &image, 3)?,
    }

    println!(
        "Decoded {}x{} image ({} components) to {:?}",
        image.width,
        image.height,
        image.components.len(),
        output
    );
    Ok(())
}

fn raw_bytes(image: &DecodedImage) -> Vec<u8> {
    let mut out = Vec::new();
    for comp in &image.components {
        if comp.precision <= 8 {
            out.extend(comp.data.iter().map(|&v| v as u8));
        } else {
            out.extend(comp.data.iter().flat_map(|&v| (v as u16).to_le_bytes()));
        }
    }
    out
}

fn write_pnm(
    path: &Path,
    image: &DecodedImage,
    channels: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let comps = image
        .components
        .get(..channels)
        .ok_or_else(|| format!("{} components needed, image has {}", channels, image.components.len()))?;
    if comps.iter().any(|c| c.precision > 8 || c.is_signed) {
        return Err("PGM/PPM output needs unsigned samples of at most 8 bits".into());
    }
    if comps
        .iter()
        .any(|c| c.width != comps[0].width || c.height != comps[0].height)
    {
        return Err("PPM output needs components of equal size".into());
    }

    let (width, height) = (comps[0].width, comps[0].height);
    let maxval = comps.iter().map(|c| (1u32 << c.precision) - 1).max().unwrap_or(255);
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", if channels == 1 { "P5" } else { "P6" })?;
    writeln!(file, "{} {}", width, height)?;
    writeln!(file, "{}", maxval)?;

    let pixels = (width * height) as usize;
    let mut body = Vec::with_capacity(pixels * channels);
    for i in 0..pixels {
        body.extend(comps.iter().map(|c| c.data[i] as u8));
    }
    file.write_all(&body)?;
    Ok(())
}
