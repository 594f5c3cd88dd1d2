//! aepconvert - Command-line converter for AEP animation projects.
//!
//! Converts project files between the x86 binary, x64 binary and JSON text
//! encodings.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use aeptools::prelude::*;

/// aepconvert - AEP animation project converter
#[derive(Parser)]
#[command(name = "aepconvert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a single file between formats
    Convert {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,

        /// Input format (x86, x64 or json); detected from the content when omitted
        #[arg(long)]
        input_format: Option<Format>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format (x86, x64 or json)
        #[arg(long)]
        output_format: Format,

        /// Schema catalog JSON file (defaults to the built-in AEP project catalog)
        #[arg(short, long, env = "AEP_SCHEMA")]
        schema: Option<PathBuf>,
    },

    /// Convert every file matching a glob pattern
    Batch {
        /// Input glob pattern, e.g. "effects/*.aep"
        #[arg(short, long)]
        input: String,

        /// Input format (x86, x64 or json); detected per file when omitted
        #[arg(long)]
        input_format: Option<Format>,

        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Output format (x86, x64 or json)
        #[arg(long)]
        output_format: Format,

        /// Schema catalog JSON file (defaults to the built-in AEP project catalog)
        #[arg(short, long, env = "AEP_SCHEMA")]
        schema: Option<PathBuf>,
    },

    /// Show the header and contents of a file
    Info {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,

        /// Input format (x86, x64 or json); detected from the content when omitted
        #[arg(long)]
        input_format: Option<Format>,

        /// Schema catalog JSON file (defaults to the built-in AEP project catalog)
        #[arg(short, long, env = "AEP_SCHEMA")]
        schema: Option<PathBuf>,
    },

    /// Dump the built-in schema catalog as JSON
    Schema {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Convert { input, input_format, output, output_format, schema } => {
            cmd_convert(&input, input_format, &output, output_format, schema.as_deref())?;
        }
        Commands::Batch { input, input_format, output_dir, output_format, schema } => {
            cmd_batch(&input, input_format, &output_dir, output_format, schema.as_deref())?;
        }
        Commands::Info { input, input_format, schema } => {
            cmd_info(&input, input_format, schema.as_deref())?;
        }
        Commands::Schema { output } => {
            cmd_schema(output.as_deref())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_catalog(schema: Option<&Path>) -> Result<SchemaCatalog> {
    match schema {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Failed to read schema catalog {}", path.display()))?;
            let catalog = SchemaCatalog::from_json(&json)
                .with_context(|| format!("Invalid schema catalog {}", path.display()))?;
            debug!(path = %path.display(), kinds = catalog.len(), "loaded schema catalog");
            Ok(catalog)
        }
        None => Ok(project::catalog()?),
    }
}

fn resolve_format(explicit: Option<Format>, data: &[u8], path: &Path) -> Result<Format> {
    match explicit {
        Some(format) => Ok(format),
        None => Format::detect(data)
            .with_context(|| format!("Cannot detect the format of {}; pass --input-format", path.display())),
    }
}

/// Write `bytes` to a sibling temporary file, then rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .with_context(|| format!("Output path {} has no file name", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name.to_string_lossy()));

    let result = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.with_context(|| format!("Failed to write {}", path.display()))
}

fn convert_file(
    input: &Path,
    input_format: Option<Format>,
    output: &Path,
    output_format: Format,
    catalog: &SchemaCatalog,
) -> Result<()> {
    let data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let from = resolve_format(input_format, &data, input)?;

    let bytes = convert(&data, from, output_format, catalog)
        .with_context(|| format!("Failed to convert {} from {} to {}", input.display(), from, output_format))?;
    write_atomic(output, &bytes)
}

fn cmd_convert(
    input: &Path,
    input_format: Option<Format>,
    output: &Path,
    output_format: Format,
    schema: Option<&Path>,
) -> Result<()> {
    let catalog = load_catalog(schema)?;

    let start = Instant::now();
    convert_file(input, input_format, output, output_format, &catalog)?;
    info!(input = %input.display(), output = %output.display(), elapsed = ?start.elapsed(), "converted");

    println!("{} -> {} ({})", input.display(), output.display(), output_format);
    Ok(())
}

/// Output path for `input` in `output_dir`, keeping the stem.
fn batch_output_path(input: &Path, output_dir: &Path, format: Format) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .with_context(|| format!("Input path {} has no file name", input.display()))?;
    Ok(output_dir.join(format!("{}.{}", stem.to_string_lossy(), format.extension())))
}

/// Pair every input with its output path, refusing two inputs that map to one output.
fn plan_batch(inputs: &[PathBuf], output_dir: &Path, format: Format) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::with_capacity(inputs.len());
    let mut jobs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = batch_output_path(input, output_dir, format)?;
        if let Some(previous) = claimed.insert(output.clone(), input) {
            anyhow::bail!(
                "{} and {} would both be written to {}",
                previous.display(),
                input.display(),
                output.display()
            );
        }
        jobs.push((input.clone(), output));
    }
    Ok(jobs)
}

fn cmd_batch(
    pattern: &str,
    input_format: Option<Format>,
    output_dir: &Path,
    output_format: Format,
    schema: Option<&Path>,
) -> Result<()> {
    let catalog = load_catalog(schema)?;

    let inputs: Vec<PathBuf> = glob::glob(pattern)
        .with_context(|| format!("Invalid glob pattern '{}'", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .collect();

    if inputs.is_empty() {
        anyhow::bail!("No files match '{}'", pattern);
    }

    let jobs = plan_batch(&inputs, output_dir, output_format)?;

    println!("Converting {} files to {} in {}...", jobs.len(), output_format, output_dir.display());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let failures: Vec<(PathBuf, anyhow::Error)> = jobs
        .par_iter()
        .filter_map(|(input, output)| {
            let result = convert_file(input, input_format, output, output_format, &catalog);
            pb.inc(1);
            result.err().map(|e| (input.clone(), e))
        })
        .collect();

    pb.finish_with_message("Done");

    for (path, e) in &failures {
        error!("{}: {:#}", path.display(), e);
    }
    println!(
        "Converted {} files in {:?} ({} errors)",
        inputs.len() - failures.len(),
        start.elapsed(),
        failures.len()
    );

    if !failures.is_empty() {
        anyhow::bail!("{} of {} files failed to convert", failures.len(), inputs.len());
    }
    Ok(())
}

fn cmd_info(input: &Path, input_format: Option<Format>, schema: Option<&Path>) -> Result<()> {
    let catalog = load_catalog(schema)?;
    let data = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let format = resolve_format(input_format, &data, input)?;

    println!("File:    {}", input.display());
    println!("Format:  {}", format);

    if format.is_binary() {
        let header = read_header(&data).context("Failed to read header")?;
        let root_kind = catalog
            .by_id(header.root_kind())
            .map(|schema| schema.name.clone())
            .unwrap_or_else(|_| "?".to_string());
        println!("Version: {}", header.version());
        println!("Pointer: {} bytes", header.pointer_width_bytes());
        println!("Root:    {} (kind {}) at {:#x}", root_kind, header.root_kind(), header.root_offset());
        println!("Size:    {} bytes", header.file_size());
    }

    let document =
        read_document(&data, format, &catalog).with_context(|| format!("Failed to read {}", input.display()))?;
    println!("Nodes:   {}", document.len());

    if document.root_node().kind == project::PROJECT {
        println!("Project: {}", project::summarize(&document)?);
        for reference in project::unresolved_asset_references(&document)? {
            warn!("{}", reference);
        }
    }

    Ok(())
}

fn cmd_schema(output: Option<&Path>) -> Result<()> {
    let json = project::catalog()?.to_json()?;
    match output {
        Some(path) => {
            write_atomic(path, json.as_bytes())?;
            println!("Schema catalog written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_project() -> Document {
        let mut builder = project::ProjectBuilder::new();
        builder.texture("spark", 64, 64);
        let main = builder.composition("main", 640, 480);
        builder
            .layer(main, &project::LayerSpec::new("0-spark", project::BlendMode::Additive))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_convert_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = project::catalog().unwrap();
        let x86 = write_document(&sample_project(), Format::X86, &catalog).unwrap();

        let input = dir.path().join("effect.aep");
        let json = dir.path().join("effect.json");
        let back = dir.path().join("back.aep");
        fs::write(&input, &x86).unwrap();

        convert_file(&input, None, &json, Format::Json, &catalog).unwrap();
        convert_file(&json, Some(Format::Json), &back, Format::X86, &catalog).unwrap();

        assert_eq!(fs::read(&back).unwrap(), x86);
        assert!(fs::read_to_string(&json).unwrap().contains("\"aep-text\""));
    }

    #[test]
    fn test_failed_conversion_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = project::catalog().unwrap();
        let mut x86 = write_document(&sample_project(), Format::X86, &catalog).unwrap();
        x86.truncate(x86.len() - 1);

        let input = dir.path().join("broken.aep");
        let output = dir.path().join("broken.json");
        fs::write(&input, &x86).unwrap();

        assert!(convert_file(&input, Some(Format::X86), &output, Format::Json, &catalog).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_undetectable_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("notes.txt");
        fs::write(&input, b"not a project").unwrap();

        let err = convert_file(&input, None, &dir.path().join("out.json"), Format::Json, &project::catalog().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("--input-format"));
    }

    #[test]
    fn test_batch_output_path() {
        let path = batch_output_path(Path::new("in/effect.json"), Path::new("out"), Format::X64).unwrap();
        assert_eq!(path, Path::new("out").join("effect.aep"));
    }

    #[test]
    fn test_batch_converts_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = project::catalog().unwrap();
        let x86 = write_document(&sample_project(), Format::X86, &catalog).unwrap();
        fs::write(dir.path().join("one.aep"), &x86).unwrap();
        fs::write(dir.path().join("two.aep"), &x86).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let out = dir.path().join("out");
        let pattern = format!("{}/*.aep", dir.path().display());
        cmd_batch(&pattern, None, &out, Format::Json, None).unwrap();

        for name in ["one.json", "two.json"] {
            let json = fs::read(out.join(name)).unwrap();
            let back = convert(&json, Format::Json, Format::X86, &catalog).unwrap();
            assert_eq!(back, x86);
        }
        assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
    }

    #[test]
    fn test_batch_rejects_colliding_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = project::catalog().unwrap();
        let document = sample_project();
        fs::write(dir.path().join("fx.aep"), write_document(&document, Format::X86, &catalog).unwrap()).unwrap();
        fs::write(dir.path().join("fx.json"), write_document(&document, Format::Json, &catalog).unwrap()).unwrap();

        let out = dir.path().join("out");
        let pattern = format!("{}/fx.*", dir.path().display());
        let err = cmd_batch(&pattern, None, &out, Format::X64, None).unwrap_err().to_string();

        assert!(err.contains("fx.aep") && err.contains("fx.json"), "{}", err);
        assert!(!out.exists());
    }

    #[test]
    fn test_cli_parses_formats() {
        let cli = Cli::try_parse_from([
            "aepconvert",
            "convert",
            "-i",
            "a.aep",
            "--input-format",
            "x86",
            "-o",
            "a.json",
            "--output-format",
            "JSON",
        ])
        .unwrap();
        match cli.command {
            Commands::Convert { input_format, output_format, .. } => {
                assert_eq!(input_format, Some(Format::X86));
                assert_eq!(output_format, Format::Json);
            }
            _ => panic!("expected convert"),
        }
        assert!(Cli::try_parse_from(["aepconvert", "schema", "--bogus"]).is_err());
    }
}
