use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use gapfill::{
    detect_gaps, prepare_with_diagnostics, Expansion, FillDiagnostics, Frame, InsertMode,
    NullInsertOptions, Resolution, ThresholdResolver, Value,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gap-aware null insertion for series frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert null rows into gaps and optionally apply no-value fallbacks
    Fill(FillArgs),
    /// List gaps wider than the resolved threshold
    Gaps(GapsArgs),
}

#[derive(Parser, Debug)]
struct FillArgs {
    /// Frame JSON files (one frame or an array of frames each)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatOpt::Json)]
    format: FormatOpt,

    /// Options JSON; flags given on the command line take precedence
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Reference field name (defaults to the first time field)
    #[arg(long)]
    ref_field: Option<String>,

    /// Value used for synthesized reference rows
    #[arg(long, value_enum)]
    insert_mode: Option<InsertModeOpt>,

    /// Insert at most one row per gap
    #[arg(long, action = ArgAction::SetTrue)]
    single_shot: bool,

    /// Visible range start; pads rows before the first sample
    #[arg(long, allow_hyphen_values = true)]
    pseudo_min: Option<f64>,

    /// Visible range end; pads one row after the last sample
    #[arg(long, allow_hyphen_values = true)]
    pseudo_max: Option<f64>,

    /// Replace nulls with each field's numeric noValue after filling
    #[arg(long, action = ArgAction::SetTrue)]
    substitute: bool,

    /// Optional JSON path for per-frame diagnostics
    #[arg(long, value_hint = ValueHint::FilePath)]
    diagnostics: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct GapsArgs {
    /// Frame JSON files
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Reference field name (defaults to the first time field)
    #[arg(long)]
    ref_field: Option<String>,

    /// Threshold to use instead of the frame's configuration
    #[arg(long)]
    threshold: Option<f64>,

    /// Print gap boundaries as RFC 3339 timestamps (reference in epoch ms)
    #[arg(long, action = ArgAction::SetTrue)]
    epoch_ms: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum InsertModeOpt {
    Threshold,
    Midpoint,
    Plusone,
}

impl From<InsertModeOpt> for InsertMode {
    fn from(value: InsertModeOpt) -> Self {
        match value {
            InsertModeOpt::Threshold => InsertMode::Threshold,
            InsertModeOpt::Midpoint => InsertMode::Midpoint,
            InsertModeOpt::Plusone => InsertMode::PlusOne,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum FormatOpt {
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Fill(args) => args.verbose,
        Command::Gaps(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Fill(args) => handle_fill(args),
        Command::Gaps(args) => handle_gaps(args),
    }
}

fn build_options(args: &FillArgs) -> Result<NullInsertOptions> {
    let mut options = match args.config.as_ref() {
        Some(path) => load_options(path)?,
        None => NullInsertOptions::default(),
    };
    if let Some(name) = args.ref_field.as_ref() {
        options.ref_field_name = Some(name.clone());
    }
    if let Some(mode) = args.insert_mode {
        options.insert_mode = mode.into();
    }
    if args.single_shot {
        options.expansion = Expansion::SingleShot;
    }
    if args.pseudo_min.is_some() {
        options.pseudo_min = args.pseudo_min;
    }
    if args.pseudo_max.is_some() {
        options.pseudo_max = args.pseudo_max;
    }
    if args.substitute {
        options.substitute_no_value = true;
    }
    if let (Some(min), Some(max)) = (options.pseudo_min, options.pseudo_max) {
        if min > max {
            return Err(anyhow!("--pseudo-min {} is above --pseudo-max {}", min, max));
        }
    }
    if options.insert_mode == InsertMode::Midpoint && options.expansion == Expansion::Thorough {
        warn!(
            "midpoint insert mode repeats the same value in gaps wider than two thresholds; \
             consider --single-shot"
        );
    }
    Ok(options)
}

fn load_options(path: &Path) -> Result<NullInsertOptions> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read options {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid options JSON", path.display()))
}

fn load_frames(path: &Path) -> Result<Vec<Frame>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Frame::many_from_json(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn handle_fill(args: FillArgs) -> Result<()> {
    let options = build_options(&args)?;
    debug!("options: {:?}", options);

    let t_fill = Instant::now();
    let results: Vec<Vec<(Frame, FillDiagnostics)>> = args
        .inputs
        .par_iter()
        .map(|path| -> Result<Vec<(Frame, FillDiagnostics)>> {
            let frames = load_frames(path)?;
            Ok(frames
                .iter()
                .map(|frame| {
                    let (out, diag) = prepare_with_diagnostics(frame, &options);
                    (out.into_owned(), diag)
                })
                .collect())
        })
        .collect::<Result<Vec<_>>>()?;

    let (frames, diagnostics): (Vec<Frame>, Vec<FillDiagnostics>) =
        results.into_iter().flatten().unzip();
    let applied = diagnostics.iter().filter(|d| d.applied).count();
    info!(
        "Filled {} of {} frames in {:.1} ms",
        applied,
        frames.len(),
        t_fill.elapsed().as_secs_f64() * 1000.0
    );
    for (frame, diag) in frames.iter().zip(diagnostics.iter()) {
        if let Some(reason) = diag.skipped_reason {
            debug!("frame {}: unchanged ({})", frame.label(), reason);
        }
    }

    match args.format {
        FormatOpt::Json => write_json(&frames, &args.output)?,
        FormatOpt::Csv => write_csv(&frames, &args.output)?,
    }
    if args.output.as_os_str() != "-" {
        info!("Wrote frames: {}", args.output.display());
    }

    if let Some(path) = args.diagnostics.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &diagnostics)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote diagnostics: {}", path.display());
    }
    Ok(())
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(io::BufWriter::new(file)))
    }
}

fn write_json(frames: &[Frame], path: &Path) -> Result<()> {
    let mut out = open_output(path)?;
    serde_json::to_writer_pretty(&mut out, frames)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn write_csv(frames: &[Frame], path: &Path) -> Result<()> {
    let out = open_output(path)?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);
    write_frame_rows(frames, &mut writer)
}

fn write_frame_rows<W: Write>(frames: &[Frame], writer: &mut csv::Writer<W>) -> Result<()> {
    for frame in frames {
        writer.write_record(frame.fields.iter().map(|f| f.name.as_str()))?;
        for row in 0..frame.length {
            writer.write_record(frame.fields.iter().map(|f| format_cell(&f.values[row])))?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Number(v) => format!("{}", v),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
    }
}

fn handle_gaps(args: GapsArgs) -> Result<()> {
    if let Some(t) = args.threshold {
        if !(t.is_finite() && t > 0.0) {
            return Err(anyhow!("--threshold must be a positive number"));
        }
    }

    let stdout = io::stdout();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(stdout.lock());
    writer.write_record(["frame", "start", "end", "span", "missing"])?;

    let resolver = ThresholdResolver::new(args.ref_field.as_deref());
    let mut total = 0usize;
    for path in &args.inputs {
        for frame in load_frames(path)? {
            let (threshold, reference) = match gap_inputs(&resolver, &frame, args.threshold) {
                Some(found) => found,
                None => {
                    warn!("{}: frame {} has no usable threshold", path.display(), frame.label());
                    continue;
                }
            };
            for gap in detect_gaps(&reference, threshold) {
                total += 1;
                writer.write_record([
                    frame.label().to_string(),
                    format_boundary(gap.start, args.epoch_ms),
                    format_boundary(gap.end, args.epoch_ms),
                    format!("{}", gap.span()),
                    gap.missing.to_string(),
                ])?;
            }
        }
    }
    writer.flush()?;
    info!("Found {} gaps", total);
    Ok(())
}

/// Threshold and numeric reference axis for `frame`, honouring an explicit
/// threshold even when the frame carries no configuration.
fn gap_inputs(
    resolver: &ThresholdResolver<'_>,
    frame: &Frame,
    threshold: Option<f64>,
) -> Option<(f64, Vec<f64>)> {
    match threshold {
        Some(t) => {
            let idx = resolver.find_reference(frame)?;
            let reference = frame.fields[idx].numeric_values()?;
            Some((t, reference))
        }
        None => match resolver.resolve(frame) {
            Resolution::Apply(resolved) => Some((resolved.threshold, resolved.reference)),
            Resolution::Skip(reason) => {
                debug!("frame {}: {}", frame.label(), reason);
                None
            }
        },
    }
}

fn format_boundary(value: f64, epoch_ms: bool) -> String {
    if epoch_ms {
        if let Some(ts) = DateTime::<Utc>::from_timestamp_millis(value as i64) {
            return ts.to_rfc3339_opts(SecondsFormat::Millis, true);
        }
    }
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_args(argv: &[&str]) -> FillArgs {
        let mut full = vec!["gapfill", "fill"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Fill(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_flags_map_onto_options() {
        let args = fill_args(&[
            "frame.json",
            "--insert-mode",
            "plusone",
            "--single-shot",
            "--pseudo-min",
            "-5",
            "--pseudo-max",
            "20",
            "--substitute",
        ]);
        let options = build_options(&args).unwrap();
        assert_eq!(options.insert_mode, InsertMode::PlusOne);
        assert_eq!(options.expansion, Expansion::SingleShot);
        assert_eq!(options.pseudo_min, Some(-5.0));
        assert_eq!(options.pseudo_max, Some(20.0));
        assert!(options.substitute_no_value);
        assert_eq!(args.format, FormatOpt::Json);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let args = fill_args(&["frame.json", "--pseudo-min", "10", "--pseudo-max", "1"]);
        assert!(build_options(&args).is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = std::env::temp_dir().join(format!("gapfill_cli_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("options.json");
        fs::write(&path, r#"{"insert_mode": "midpoint", "ref_field_name": "ts"}"#).unwrap();

        let args = fill_args(&[
            "frame.json",
            "--config",
            path.to_str().unwrap(),
            "--insert-mode",
            "threshold",
        ]);
        let options = build_options(&args).unwrap();
        assert_eq!(options.insert_mode, InsertMode::Threshold);
        assert_eq!(options.ref_field_name.as_deref(), Some("ts"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_csv_rows() {
        let frame = Frame::new(vec![
            gapfill::Field::time("time", &[1.0, 2.0]),
            gapfill::Field::numbers("v", &[Some(0.5), None]),
        ])
        .unwrap();
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        write_frame_rows(&[frame], &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text, "time,v\n1,0.5\n2,\n");
    }

    #[test]
    fn test_format_boundary() {
        assert_eq!(format_boundary(2.5, false), "2.5");
        assert_eq!(format_boundary(0.0, true), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_explicit_threshold_ignores_config() {
        let frame = Frame::new(vec![gapfill::Field::time("time", &[0.0, 10.0])]).unwrap();
        let resolver = ThresholdResolver::default();
        assert!(gap_inputs(&resolver, &frame, None).is_none());
        let (t, reference) = gap_inputs(&resolver, &frame, Some(2.0)).unwrap();
        assert_eq!(t, 2.0);
        assert_eq!(reference, vec![0.0, 10.0]);
    }
}
