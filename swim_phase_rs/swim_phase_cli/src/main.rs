use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Serialize;
use swim_phase::records::SkippedLine;
use swim_phase::series::{clean_records_with_report, CleaningReport};
use swim_phase::style::PrecomputedLabels;
use swim_phase::{
    analyze, parse_records, AnalysisReport, AnalysisStatus, Params, ParsedRecords,
    StrokeClassifier, StrokeStyle, VideoContext,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Swim video phase segmentation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment one or more keypoint files into phases, kicks and splits
    Analyze(AnalyzeArgs),
    /// Report parse and cleaning diagnostics for keypoint files
    Inspect(InspectArgs),
    /// Print the default parameters as JSON
    Defaults,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Keypoint text files, one line per frame
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Report path for a single input (`-` for stdout); defaults to
    /// `<stem>.analysis.json` next to each input
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Parameters JSON; missing fields keep their defaults
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Video frame width in pixels
    #[arg(long, default_value_t = 1920.0)]
    width: f64,

    /// Video frame rate
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Total frame count of the video, if known
    #[arg(long)]
    frame_count: Option<i64>,

    /// Pixel row of the water surface; the report fails without it
    #[arg(long)]
    waterline: Option<f64>,

    /// Force the stroke style instead of classifying
    #[arg(long, value_enum)]
    style: Option<StyleOpt>,

    /// Classifier labels (0-3 or style names, whitespace or comma separated),
    /// one per frame of the outbound leg
    #[arg(long, value_hint = ValueHint::FilePath)]
    style_labels: Option<PathBuf>,

    /// Write every phase region to this CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    phases_csv: Option<PathBuf>,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Parameters JSON used for the cleaning pass
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StyleOpt {
    Backstroke,
    Breaststroke,
    Freestyle,
    Butterfly,
}

impl From<StyleOpt> for StrokeStyle {
    fn from(value: StyleOpt) -> Self {
        match value {
            StyleOpt::Backstroke => StrokeStyle::Backstroke,
            StyleOpt::Breaststroke => StrokeStyle::Breaststroke,
            StyleOpt::Freestyle => StrokeStyle::Freestyle,
            StyleOpt::Butterfly => StrokeStyle::Butterfly,
        }
    }
}

#[derive(Clone, Copy, Serialize)]
struct ParseSummary {
    records: usize,
    no_detection_frames: usize,
    skipped_lines: usize,
}

impl From<&ParsedRecords> for ParseSummary {
    fn from(parsed: &ParsedRecords) -> Self {
        Self {
            records: parsed.records.len(),
            no_detection_frames: parsed.no_detection_frames,
            skipped_lines: parsed.skipped.len(),
        }
    }
}

#[derive(Serialize)]
struct ReportEnvelope<'a> {
    input: String,
    generated_at: String,
    tool_version: &'static str,
    video: &'a VideoContext,
    params: &'a Params,
    parse: ParseSummary,
    report: &'a AnalysisReport,
}

#[derive(Serialize)]
struct InspectEnvelope<'a> {
    input: String,
    lines: usize,
    parse: ParseSummary,
    skipped: &'a [SkippedLine],
    cleaning: &'a CleaningReport,
}

struct Analyzed {
    input: PathBuf,
    parse: ParseSummary,
    report: AnalysisReport,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Command::Analyze(args) if args.verbose => "debug",
        Command::Inspect(args) if args.verbose => "debug",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Defaults => handle_defaults(),
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    if args.output.is_some() && args.inputs.len() > 1 {
        return Err(anyhow!(
            "--output only applies to a single input; reports for {} inputs are written next to each file",
            args.inputs.len()
        ));
    }

    let mut params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(style) = args.style {
        params.style_override = Some(style.into());
    }
    params.validate().context("invalid analysis parameters")?;

    let classifier = match args.style_labels.as_ref() {
        Some(path) => Some(load_labels(path)?),
        None => None,
    };
    let video = VideoContext {
        width_px: args.width,
        fps: args.fps,
        frame_count: args.frame_count,
        waterline_y: args.waterline,
    };

    let t_analyze = Instant::now();
    let results = args
        .inputs
        .par_iter()
        .map(|path| -> Result<Analyzed> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = parse_records(&text);
            let report = analyze(
                &parsed.records,
                &video,
                &params,
                classifier.as_ref().map(|c| c as &dyn StrokeClassifier),
            )
            .with_context(|| format!("failed to analyze {}", path.display()))?;
            Ok(Analyzed {
                input: path.clone(),
                parse: ParseSummary::from(&parsed),
                report,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if args.profile || args.verbose {
        info!(
            "Analyze stage: {:.1} ms ({} inputs)",
            t_analyze.elapsed().as_secs_f64() * 1000.0,
            results.len()
        );
    }

    let generated_at = Utc::now().to_rfc3339();
    for result in &results {
        let envelope = ReportEnvelope {
            input: result.input.display().to_string(),
            generated_at: generated_at.clone(),
            tool_version: env!("CARGO_PKG_VERSION"),
            video: &video,
            params: &params,
            parse: result.parse,
            report: &result.report,
        };
        let target = args
            .output
            .clone()
            .unwrap_or_else(|| report_path_for(&result.input));
        write_report(&envelope, &target)?;
        match result.report.status {
            AnalysisStatus::Complete => info!(
                "{}: complete ({} submersions)",
                result.input.display(),
                result.report.submersions.len()
            ),
            AnalysisStatus::Partial => warn!(
                "{}: partial at {} ({} issues)",
                result.input.display(),
                result.report.reached,
                result.report.issues.len()
            ),
            AnalysisStatus::Failed => warn!(
                "{}: failed: {}",
                result.input.display(),
                result.report.failure_reason.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if let Some(path) = args.phases_csv.as_ref() {
        let t_csv = Instant::now();
        let rows = write_phases_csv(&results, args.fps, path)?;
        if args.profile || args.verbose {
            info!(
                "CSV stage: {:.1} ms ({} rows)",
                t_csv.elapsed().as_secs_f64() * 1000.0,
                rows
            );
        }
        info!("Wrote phase CSV: {}", path.display());
    }

    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for path in &args.inputs {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
        let parsed = parse_records(&text);
        let (_, cleaning) = clean_records_with_report(&parsed.records, &params.cleaning);

        if args.json {
            let envelope = InspectEnvelope {
                input: path.display().to_string(),
                lines,
                parse: ParseSummary::from(&parsed),
                skipped: &parsed.skipped,
                cleaning: &cleaning,
            };
            serde_json::to_writer_pretty(&mut out, &envelope)?;
            writeln!(out)?;
        } else {
            write_inspect_text(&mut out, path, lines, &parsed, &cleaning)?;
        }
    }
    Ok(())
}

fn handle_defaults() -> Result<()> {
    let params = Params::default();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &params)?;
    writeln!(out)?;
    Ok(())
}

fn write_inspect_text<W: Write>(
    out: &mut W,
    path: &Path,
    lines: usize,
    parsed: &ParsedRecords,
    cleaning: &CleaningReport,
) -> Result<()> {
    writeln!(out, "{}", path.display())?;
    writeln!(out, "  lines:          {}", lines)?;
    writeln!(out, "  records:        {}", parsed.records.len())?;
    writeln!(out, "  no detection:   {}", parsed.no_detection_frames)?;
    writeln!(out, "  skipped lines:  {}", parsed.skipped.len())?;
    for skipped in parsed.skipped.iter().take(10) {
        writeln!(out, "    line {}: {}", skipped.line, skipped.reason)?;
    }
    if parsed.skipped.len() > 10 {
        writeln!(out, "    ... {} more", parsed.skipped.len() - 10)?;
    }
    if let (Some(first), Some(last)) = (parsed.records.first(), parsed.records.last()) {
        writeln!(out, "  frames:         {} - {}", first.frame_id, last.frame_id)?;
    }
    let masked: Vec<String> = cleaning
        .masked_outliers
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(column, count)| format!("{column}={count}"))
        .collect();
    if masked.is_empty() {
        writeln!(out, "  outliers:       none")?;
    } else {
        writeln!(out, "  outliers:       {}", masked.join(", "))?;
    }
    if cleaning.unusable_columns.is_empty() {
        writeln!(out, "  unusable:       none")?;
    } else {
        writeln!(out, "  unusable:       {}", cleaning.unusable_columns.join(", "))?;
    }
    Ok(())
}

fn load_params(path: &Path) -> Result<Params> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse params {}", path.display()))?;
    Ok(params)
}

fn load_labels(path: &Path) -> Result<PrecomputedLabels> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_labels(&text).with_context(|| format!("failed to parse labels {}", path.display()))
}

fn parse_labels(text: &str) -> Result<PrecomputedLabels> {
    let labels = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let style: StrokeStyle = token.parse()?;
            Ok(style.label())
        })
        .collect::<Result<Vec<u8>>>()?;
    if labels.is_empty() {
        return Err(anyhow!("label file holds no labels"));
    }
    Ok(PrecomputedLabels(labels))
}

fn report_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    input.with_file_name(format!("{stem}.analysis.json"))
}

fn write_report(envelope: &ReportEnvelope<'_>, path: &Path) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, envelope)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, envelope)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote report: {}", path.display());
    Ok(())
}

fn write_phases_csv(results: &[Analyzed], fps: f64, path: &Path) -> Result<usize> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_phase_rows(results, fps, &mut writer)
}

fn write_phase_rows<W: Write>(
    results: &[Analyzed],
    fps: f64,
    writer: &mut csv::Writer<W>,
) -> Result<usize> {
    writer.write_record(["input", "leg", "kind", "start", "end", "duration_ms"])?;
    let mut rows = 0;
    for result in results {
        let input = result.input.display().to_string();
        for (leg, timeline) in &result.report.phases {
            for region in &timeline.regions {
                let duration = region
                    .duration_ms(fps)
                    .map(|ms| format!("{ms:.1}"))
                    .unwrap_or_default();
                writer.write_record([
                    input.clone(),
                    leg.to_string(),
                    region.kind.to_string(),
                    region.start.to_string(),
                    region.end.to_string(),
                    duration,
                ])?;
                rows += 1;
            }
        }
    }
    writer.flush()?;
    Ok(rows)
}
