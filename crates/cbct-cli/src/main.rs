use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use cbct::geometry::infer_downscale_factor_from_image;
use cbct::pipeline::{
    run_evaluation, run_reconstruction, EvaluateConfig, EvaluationOptions, RawDtype,
    ReconstructConfig,
};
use cbct::recon::Algorithm;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Cone-beam CT reconstruction from posed projection images.
#[derive(Debug, Parser)]
#[command(author, version, about = "Cone-beam CT reconstruction and evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconstruct a volume from a transforms document and its images.
    Reconstruct(ReconstructArgs),
    /// Compare a reconstructed volume against a reference.
    Evaluate(EvaluateArgs),
    /// Print the integer downscale factor bringing an image near a target size.
    InferDownscale(InferDownscaleArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AlgorithmArg {
    Sirt,
    Cgls,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(a: AlgorithmArg) -> Self {
        match a {
            AlgorithmArg::Sirt => Algorithm::Sirt,
            AlgorithmArg::Cgls => Algorithm::Cgls,
        }
    }
}

#[derive(Debug, Args)]
struct ReconstructArgs {
    /// Directory with one transforms*.json, or the JSON file itself.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output directory.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Optional JSON ReconstructConfig; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// World-to-voxel length scale (default: resolution / 2).
    #[arg(long)]
    lscale: Option<f64>,
    #[arg(long)]
    downscale: Option<f64>,
    /// Voxels per side of the reconstruction cube.
    #[arg(long)]
    resolution: Option<usize>,
    #[arg(long)]
    imin: Option<usize>,
    #[arg(long)]
    imax: Option<usize>,
    #[arg(long)]
    istep: Option<usize>,
    #[arg(long, value_enum)]
    algorithm: Option<AlgorithmArg>,
    #[arg(long)]
    steps_per_check: Option<usize>,
    #[arg(long)]
    max_checks: Option<usize>,
    /// Relative improvement floor of the stopping rule.
    #[arg(long)]
    floor: Option<f64>,
    /// Do not rewrite slice.png after every check.
    #[arg(long)]
    no_snapshots: bool,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    /// Candidate volume (.raw, .npy, .yaml, .json).
    obj: PathBuf,
    /// Reference volume; outputs are written next to it.
    reference: PathBuf,
    #[arg(long, default_value_t = 200)]
    eval_resolution: usize,
    #[arg(long)]
    obj_resolution: Option<usize>,
    #[arg(long)]
    obj_dtype: Option<RawDtype>,
    #[arg(long)]
    ref_resolution: Option<usize>,
    #[arg(long)]
    ref_dtype: Option<RawDtype>,
    /// Skip slices_eval.png.
    #[arg(long)]
    no_slices: bool,
}

#[derive(Debug, Args)]
struct InferDownscaleArgs {
    image: PathBuf,
    #[arg(long, default_value_t = 250)]
    target_size: u32,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn reconstruct_config(args: &ReconstructArgs) -> Result<ReconstructConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_json_file::<ReconstructConfig>(path)?,
        None => ReconstructConfig::default(),
    };
    if let Some(v) = &args.input {
        cfg.input = v.clone();
    }
    if let Some(v) = &args.output {
        cfg.output = v.clone();
    }
    if args.lscale.is_some() {
        cfg.length_scale = args.lscale;
    }
    if let Some(v) = args.downscale {
        cfg.downscale = v;
    }
    if let Some(v) = args.resolution {
        cfg.resolution = v;
    }
    if let Some(v) = args.imin {
        cfg.selection.imin = v;
    }
    if let Some(v) = args.imax {
        cfg.selection.imax = v;
    }
    if let Some(v) = args.istep {
        cfg.selection.istep = v;
    }
    if let Some(v) = args.algorithm {
        cfg.solve.algorithm = v.into();
    }
    if let Some(v) = args.steps_per_check {
        cfg.solve.steps_per_check = v;
    }
    if let Some(v) = args.max_checks {
        cfg.solve.max_checks = v;
    }
    if let Some(v) = args.floor {
        cfg.solve.relative_improvement_floor = v;
    }
    if args.no_snapshots {
        cfg.snapshots = false;
    }
    anyhow::ensure!(
        !cfg.input.as_os_str().is_empty(),
        "no input given (use --input or --config)"
    );
    anyhow::ensure!(
        !cfg.output.as_os_str().is_empty(),
        "no output directory given (use --output or --config)"
    );
    Ok(cfg)
}

fn evaluate_config(args: &EvaluateArgs) -> EvaluateConfig {
    EvaluateConfig {
        candidate_resolution: args.obj_resolution,
        candidate_dtype: args.obj_dtype,
        reference_resolution: args.ref_resolution,
        reference_dtype: args.ref_dtype,
        options: EvaluationOptions {
            resolution: args.eval_resolution,
            ..EvaluationOptions::default()
        },
        write_slices: !args.no_slices,
        ..EvaluateConfig::new(&args.obj, &args.reference)
    }
}

fn run(cli: Cli) -> Result<String> {
    match cli.command {
        Command::Reconstruct(args) => {
            let report = run_reconstruction(&reconstruct_config(&args)?)?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::Evaluate(args) => {
            let report = run_evaluation(&evaluate_config(&args))?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::InferDownscale(args) => {
            let factor = infer_downscale_factor_from_image(&args.image, args.target_size)?;
            Ok(factor.to_string())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    log::debug!("{cli:?}");
    let out = run(cli)?;
    println!("{out}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cbct").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn reconstruct_flags_override_defaults() {
        let cli = parse(&[
            "reconstruct",
            "--input",
            "scan",
            "--output",
            "out",
            "--resolution",
            "64",
            "--istep",
            "3",
            "--algorithm",
            "cgls",
            "--floor",
            "0.01",
            "--no-snapshots",
        ]);
        let Command::Reconstruct(args) = cli.command else {
            panic!("expected reconstruct");
        };
        let cfg = reconstruct_config(&args).unwrap();
        assert_eq!(cfg.input, PathBuf::from("scan"));
        assert_eq!(cfg.resolution, 64);
        assert_eq!(cfg.effective_length_scale(), 32.0);
        assert_eq!(cfg.selection.istep, 3);
        assert_eq!(cfg.solve.algorithm, Algorithm::Cgls);
        assert_eq!(cfg.solve.relative_improvement_floor, 0.01);
        assert_eq!(cfg.solve.max_checks, 50);
        assert!(!cfg.snapshots);
    }

    #[test]
    fn reconstruct_reads_config_file_and_requires_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_path = dir.path().join("cfg.json");
        fs::write(
            &cfg_path,
            r#"{"input": "scan", "output": "out", "downscale": 4.0, "solve": {"max_checks": 3}}"#,
        )
        .unwrap();
        let cli = parse(&["reconstruct", "--config", cfg_path.to_str().unwrap(), "--max-checks", "9"]);
        let Command::Reconstruct(args) = cli.command else {
            panic!("expected reconstruct");
        };
        let cfg = reconstruct_config(&args).unwrap();
        assert_eq!(cfg.downscale, 4.0);
        assert_eq!(cfg.solve.max_checks, 9);

        let Command::Reconstruct(args) = parse(&["reconstruct", "--output", "out"]).command else {
            panic!("expected reconstruct");
        };
        assert!(reconstruct_config(&args).is_err());
    }

    #[test]
    fn evaluate_writes_metrics_next_to_reference() {
        let dir = tempfile::tempdir().unwrap();
        let spheres = "type: object_collection\nobjects:\n  - type: sphere\n    center: [0.5, 0.5, 0.5]\n    radius: 0.3\n";
        let obj = dir.path().join("obj.yaml");
        let reference = dir.path().join("ref.yaml");
        fs::write(&obj, spheres).unwrap();
        fs::write(&reference, spheres).unwrap();

        let cli = parse(&[
            "evaluate",
            obj.to_str().unwrap(),
            reference.to_str().unwrap(),
            "--eval-resolution",
            "10",
            "--no-slices",
        ]);
        let json = run(cli).unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["volumetric_loss"], 0.0);
        assert!(dir.path().join("eval_loss.json").is_file());
        assert!(!dir.path().join("slices_eval.png").exists());
    }

    #[test]
    fn raw_dtype_flag_parses() {
        let cli = parse(&["evaluate", "a.raw", "b.npy", "--obj-resolution", "64", "--obj-dtype", "uint16"]);
        let Command::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert_eq!(args.obj_dtype, Some(RawDtype::U16));
        let cfg = evaluate_config(&args);
        assert_eq!(cfg.candidate_resolution, Some(64));
        assert_eq!(cfg.options.resolution, 200);
    }

    #[test]
    fn infer_downscale_prints_factor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        GrayImage::from_pixel(800, 600, Luma([0])).save(&path).unwrap();
        let out = run(parse(&["infer-downscale", path.to_str().unwrap()])).unwrap();
        assert_eq!(out, "3");
    }
}
