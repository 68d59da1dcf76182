use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use pwv_analyzer::config::{AnalysisConfig, Args};
use pwv_analyzer::data_loading::{find_replay_files, parse_device_message, read_replay_file};
use pwv_analyzer::output::{write_session_csv, SessionExport};
use pwv_analyzer::session::{SessionController, SessionError, SessionResult, TransportCommand};
use pwv_analyzer::SubjectProfile;
use std::io::BufRead;
use std::path::{Path, PathBuf};

fn profile_from_args(args: &Args) -> Result<SubjectProfile> {
    let profile = SubjectProfile {
        height_cm: args.height,
        age_years: args.age,
        systolic_mmhg: args.systolic,
        diastolic_mmhg: args.diastolic,
        name: args.name.clone(),
        observation: args.observation.clone(),
    };
    profile.validate()?;
    Ok(profile)
}

fn send_command(command: &TransportCommand) -> Result<()> {
    let json = serde_json::to_string(command).context("Failed to encode device command")?;
    info!("Device command: {}", json);
    println!("{}", json);
    Ok(())
}

fn print_result(label: &str, result: &SessionResult, export: &SessionExport) {
    println!(
        "\nSession {} ({} samples at {} Hz)",
        label, result.sample_count, result.sample_rate_hz
    );
    println!(
        "  Peaks: {} brachial, {} tibial, {} matched",
        result.proximal_peak_count,
        result.distal_peak_count,
        result.matches.len()
    );
    println!("  Path length: {:.3} m", result.path_length_m);

    match result.vop_median {
        Some(vop) => println!(
            "  VOP: {:.2} m/s (median of {})",
            vop,
            result.vop_samples.len()
        ),
        None => println!("  VOP: not available"),
    }

    if result.heart_rate_bpm > 0.0 {
        println!("  Heart rate: {:.0} bpm", result.heart_rate_bpm);
    } else {
        println!("  Heart rate: not available");
    }
    if let Some(bpm) = result.spectral_heart_rate_bpm {
        println!("  Spectral heart rate: {:.0} bpm", bpm);
    }

    match result.cavi {
        Some(cavi) => println!("  CAVI: {:.2}", cavi),
        None => println!("  CAVI: not available"),
    }

    let reference = &export.reference;
    if let (Some(group), Some(interpretation), Some(deviation)) = (
        reference.age_group,
        reference.interpretation,
        reference.deviation_percent,
    ) {
        println!("  Age group {}: {} ({:+.1}%)", group, interpretation, deviation);
    }
}

fn report(
    args: &Args,
    config: &AnalysisConfig,
    label: &str,
    profile: &SubjectProfile,
    result: &SessionResult,
) -> Result<()> {
    let export = SessionExport::new(label, profile, result);
    print_result(label, result, &export);

    if args.json {
        println!("{}", export.to_json()?);
    }
    if let Some(prefix) = &args.csv_output {
        write_session_csv(prefix, &export, config.max_velocity_m_s)?;
    }
    Ok(())
}

fn replay_file(
    path: &Path,
    args: &Args,
    session: &mut SessionController,
    profile: &SubjectProfile,
) -> Result<()> {
    let samples = read_replay_file(path, &args.marker)?;
    if samples.is_empty() {
        warn!("No samples found in {}", path.display());
        return Ok(());
    }

    session.reset();
    session.load_replay(profile.clone(), samples)?;
    let result = session.process()?.clone();

    let label = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("replay");
    report(args, session.config(), label, profile, &result)
}

fn run_replay(
    input: &Path,
    args: &Args,
    config: AnalysisConfig,
    profile: &SubjectProfile,
) -> Result<()> {
    let files: Vec<PathBuf> = if input.is_dir() {
        find_replay_files(input)
    } else {
        vec![input.to_path_buf()]
    };
    if files.is_empty() {
        bail!("No .txt log files found in {}", input.display());
    }
    println!("Replaying {} log file(s)", files.len());

    let mut session = SessionController::new(config);
    for path in &files {
        if let Err(e) = replay_file(path, args, &mut session, profile) {
            warn!("Skipping {}: {:#}", path.display(), e);
        }
    }
    Ok(())
}

fn run_stream(args: &Args, config: AnalysisConfig, profile: &SubjectProfile) -> Result<()> {
    let mut session = SessionController::new(config);
    send_command(&session.start_acquisition(profile.clone(), args.duration)?)?;

    let stdin = std::io::stdin();
    let mut skipped = 0usize;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read device stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(reading) = parse_device_message(&line) else {
            skipped += 1;
            continue;
        };

        match session.push_sample(reading.to_sample()) {
            Ok(()) => {}
            Err(SessionError::OutOfOrder(e)) => warn!("Dropping sample: {}", e),
            Err(e) => return Err(e.into()),
        }

        if session.duration_elapsed() {
            break;
        }
    }
    if skipped > 0 {
        debug!("Skipped {} malformed device messages", skipped);
    }

    send_command(&session.stop_acquisition()?)?;
    let result = session.process()?.clone();
    report(args, session.config(), "stream", profile, &result)
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::default(),
    }
    .with_overrides(&args);
    debug!("Analysis config: {:?}", config);

    let profile = profile_from_args(&args)?;

    if args.stream {
        run_stream(&args, config, &profile)
    } else {
        let Some(input) = &args.input_path else {
            bail!("An input file or directory is required unless --stream is given");
        };
        run_replay(input, &args, config, &profile)
    }
}
