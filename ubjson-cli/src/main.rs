use std::fs;
use std::io::{Read, Write, self};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ubjson::{DecoderConfig, EncoderConfig};

mod convert;

#[derive(Parser)]
#[command(name = "ubj", about = "Convert between JSON and UBJSON")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a JSON document as UBJSON
    Fromjson {
        /// Input file, or - for stdin
        infile: String,
        /// Output file, defaults to stdout
        outfile: Option<PathBuf>,
    },
    /// Decode a UBJSON document to JSON
    Tojson {
        /// Input file, or - for stdin
        infile: String,
        /// Output file, defaults to stdout
        outfile: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Fromjson { infile, outfile } => fromjson(&infile, outfile),
        Commands::Tojson { infile, outfile } => tojson(&infile, outfile),
    }
}

fn fromjson(infile: &str, outfile: Option<PathBuf>) -> Result<()> {
    let input = read_input(infile)?;
    let json: serde_json::Value = serde_json::from_slice(&input).context("Input is not valid JSON")?;
    let value = convert::json_to_value(&json);
    let out = open_output(outfile)?;
    ubjson::encode_to_stream(&value, &EncoderConfig::default(), out).context("Encoding failed")?;
    Ok(())
}

fn tojson(infile: &str, outfile: Option<PathBuf>) -> Result<()> {
    let input = read_input(infile)?;
    let (value, _) = ubjson::decode_from_bytes(&input, &DecoderConfig::default()).context("Decoding failed")?;
    let json = convert::value_to_json(&value);
    let mut out = open_output(outfile)?;
    serde_json::to_writer(&mut out, &json).context("Failed to write JSON")?;
    out.write_all(b"\n").context("Failed to write JSON")?;
    Ok(())
}

fn read_input(infile: &str) -> Result<Vec<u8>> {
    if infile == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer).context("Failed to read stdin")?;
        Ok(buffer)
    } else {
        fs::read(infile).with_context(|| format!("Failed to read {}", infile))
    }
}

fn open_output(outfile: Option<PathBuf>) -> Result<Box<dyn Write>> {
    match outfile {
        Some(path) => {
            let file = fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}
