use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use speaker_calibration::calibration::{CalibrationGrid, NoiseCalibration, ToneCalibration};
use speaker_calibration::config::{AppConfig, DEFAULT_CONFIG_PATH};
use speaker_calibration::device::{loopback_pair, LoopbackConfig, Playable, Recordable};
use speaker_calibration::error::{log_calibration_error, CalibrationError};
use speaker_calibration::export::{load_json, save_json, write_mono};
use speaker_calibration::synthesis::{EqFilter, NoiseSpec, ToneSpec};
use speaker_calibration::{CalibrationSession, ProgressEvent, ProgressSink};

#[derive(Parser, Debug)]
#[command(
    name = "calibrate_cli",
    about = "Loudspeaker SPL calibration: noise curve, pure-tone grid and stimulus synthesis"
)]
struct Cli {
    /// Configuration file (defaults to ./calibration_config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Estimate the EQ filter, fit the noise curve and verify it
    Noise {
        /// Run against the simulated loopback rig instead of audio hardware
        #[arg(long)]
        simulate: bool,
        /// Reuse a stored EQ filter (JSON) instead of probing
        #[arg(long)]
        eq: Option<PathBuf>,
        #[arg(long, default_value = "noise_calibration.json")]
        output: PathBuf,
    },
    /// Measure the pure-tone grid and verify it
    Tone {
        #[arg(long)]
        simulate: bool,
        #[arg(long, default_value = "tone_calibration.json")]
        output: PathBuf,
    },
    /// Amplitude for a target level from a stored tone calibration or grid
    Query {
        #[arg(long)]
        grid: PathBuf,
        #[arg(long)]
        frequency: f64,
        #[arg(long)]
        target_db: f64,
    },
    /// Write a single stimulus to a WAV file
    Synth {
        #[arg(value_enum)]
        kind: StimulusKind,
        #[arg(long, default_value_t = 1.0)]
        duration: f64,
        #[arg(long, default_value_t = 0.5)]
        amplitude: f64,
        /// Tone frequency in Hz
        #[arg(long, default_value_t = 1000.0)]
        frequency: f64,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print (or write) the default configuration
    DefaultConfig {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StimulusKind {
    Noise,
    Tone,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    match cli.command {
        Commands::Noise {
            simulate,
            eq,
            output,
        } => {
            let config = AppConfig::load_from_file(&config_path);
            let eq = eq
                .map(|path| load_json::<EqFilter, _>(&path))
                .transpose()
                .context("loading EQ filter")?;
            if simulate {
                let (speaker, mic) = loopback_pair(simulated_rig(&config));
                run_noise(speaker, mic, config, eq, &output)
            } else {
                let (speaker, mic) = open_hardware()?;
                run_noise(speaker, mic, config, eq, &output)
            }
        }
        Commands::Tone { simulate, output } => {
            let config = AppConfig::load_from_file(&config_path);
            if simulate {
                let (speaker, mic) = loopback_pair(simulated_rig(&config));
                run_tone(speaker, mic, config, &output)
            } else {
                let (speaker, mic) = open_hardware()?;
                run_tone(speaker, mic, config, &output)
            }
        }
        Commands::Query {
            grid,
            frequency,
            target_db,
        } => run_query(&grid, frequency, target_db),
        Commands::Synth {
            kind,
            duration,
            amplitude,
            frequency,
            output,
        } => {
            let config = AppConfig::load_from_file(&config_path);
            run_synth(&config, kind, duration, amplitude, frequency, &output)
        }
        Commands::DefaultConfig { output } => {
            let config = AppConfig::default();
            match output {
                Some(path) => config
                    .save_to_file(&path)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
            Ok(ExitCode::from(0))
        }
    }
}

fn simulated_rig(config: &AppConfig) -> LoopbackConfig {
    LoopbackConfig {
        playback_rate: config.synthesis.sample_rate,
        capture_rate: config.synthesis.sample_rate,
        mic_factor: config.level.mic_factor,
        seed: config.synthesis.seed,
        // Gentle high-frequency tilt so the EQ has something to correct
        coloration: vec![0.15, 0.7, 0.15],
        ..LoopbackConfig::default()
    }
}

#[cfg(feature = "hardware")]
fn open_hardware() -> Result<(
    speaker_calibration::device::CpalSpeaker,
    speaker_calibration::device::CpalMicrophone,
)> {
    use speaker_calibration::device::{CpalMicrophone, CpalSpeaker};
    use speaker_calibration::error::log_device_error;
    let speaker = CpalSpeaker::open_default()
        .inspect_err(|err| log_device_error(err, "opening default output device"))
        .context("opening default output device")?;
    let mic = CpalMicrophone::open_default()
        .inspect_err(|err| log_device_error(err, "opening default input device"))
        .context("opening default input device")?;
    Ok((speaker, mic))
}

#[cfg(not(feature = "hardware"))]
fn open_hardware() -> Result<(
    speaker_calibration::device::LoopbackSpeaker,
    speaker_calibration::device::LoopbackMicrophone,
)> {
    anyhow::bail!("built without the `hardware` feature; pass --simulate or rebuild with --features hardware")
}

fn progress_printer() -> ProgressSink {
    ProgressSink::from_fn(|event| match event {
        ProgressEvent::StageStarted { stage, total } => {
            println!("== {} ({} steps)", stage.display_name(), total)
        }
        ProgressEvent::SweepPointMeasured {
            index,
            total,
            frequency,
            amplitude,
            db_spl,
            ..
        } => match frequency {
            Some(f) => println!(
                "  [{}/{}] {:>8.1} Hz  amp {:.4}  {:.2} dB SPL",
                index + 1,
                total,
                f,
                amplitude,
                db_spl
            ),
            None => println!(
                "  [{}/{}] amp {:.4}  {:.2} dB SPL",
                index + 1,
                total,
                amplitude,
                db_spl
            ),
        },
        ProgressEvent::TestPointMeasured {
            target_db,
            measured_db,
            frequency,
            ..
        } => println!(
            "  target {:.1} dB SPL{} -> {}",
            target_db,
            frequency.map(|f| format!(" @ {:.1} Hz", f)).unwrap_or_default(),
            measured_db
                .map(|db| format!("{:.2} dB SPL", db))
                .unwrap_or_else(|| "missing".to_string())
        ),
        _ => {}
    })
}

fn report_failure(err: CalibrationError, context: &str, output: &Path) -> Result<ExitCode> {
    log_calibration_error(&err, context);
    if let Some(completed) = err.completed_stages() {
        save_json(output, completed)?;
        eprintln!("Finished stages ({}) written to {}", completed.summary(), output.display());
    }
    let partial = err.partial_results();
    if !partial.is_empty() {
        eprintln!("{} points measured before the failure:", partial.len());
        for point in partial {
            eprintln!("  {}", serde_json::to_string(point)?);
        }
    }
    eprintln!("{}", err);
    Ok(ExitCode::from(3))
}

fn run_noise<P: Playable, R: Recordable>(
    player: P,
    recorder: R,
    config: AppConfig,
    eq: Option<EqFilter>,
    output: &Path,
) -> Result<ExitCode> {
    let mut session = CalibrationSession::new(player, recorder, config)
        .context("setting up calibration session")?
        .with_progress(progress_printer());
    let result: NoiseCalibration = match session.run_noise_protocol(eq) {
        Ok(result) => result,
        Err(err) => return report_failure(err, "noise protocol", output),
    };
    session.disconnect().context("disconnecting playback device")?;

    println!(
        "Curve: dB SPL = {:.3} * log10(amplitude) + {:.2}  (r^2 {:.4})",
        result.fit.curve.slope, result.fit.curve.intercept, result.fit.r_squared
    );
    emit_report(output, &result)?;
    Ok(ExitCode::from(0))
}

fn run_tone<P: Playable, R: Recordable>(
    player: P,
    recorder: R,
    config: AppConfig,
    output: &Path,
) -> Result<ExitCode> {
    let mut session = CalibrationSession::new(player, recorder, config)
        .context("setting up calibration session")?
        .with_progress(progress_printer());
    let result: ToneCalibration = match session.run_tone_protocol() {
        Ok(result) => result,
        Err(err) => return report_failure(err, "tone protocol", output),
    };
    session.disconnect().context("disconnecting playback device")?;

    println!(
        "Grid: {} x {}, {} missing",
        result.run.grid.frequencies().len(),
        result.run.grid.amplitudes().len(),
        result.run.grid.missing()
    );
    emit_report(output, &result)?;
    Ok(ExitCode::from(0))
}

fn run_query(path: &Path, frequency: f64, target_db: f64) -> Result<ExitCode> {
    // Accept either a full tone calibration report or a bare grid
    let grid: CalibrationGrid = match load_json::<ToneCalibration, _>(path) {
        Ok(result) => result.run.grid,
        Err(_) => load_json(path).with_context(|| format!("loading grid from {}", path.display()))?,
    };
    match grid.query(frequency, target_db) {
        Some(amplitude) => {
            println!("{:.6}", amplitude);
            Ok(ExitCode::from(0))
        }
        None => {
            eprintln!(
                "{:.1} dB SPL at {:.1} Hz is outside the measured grid",
                target_db, frequency
            );
            Ok(ExitCode::from(2))
        }
    }
}

fn run_synth(
    config: &AppConfig,
    kind: StimulusKind,
    duration: f64,
    amplitude: f64,
    frequency: f64,
    output: &Path,
) -> Result<ExitCode> {
    let synthesis = &config.synthesis;
    let mut synthesizer = synthesis.synthesizer();
    let sound = match kind {
        StimulusKind::Noise => {
            let band = synthesis.band(synthesis.sample_rate)?;
            synthesizer.white_noise(
                &NoiseSpec {
                    duration,
                    sample_rate: synthesis.sample_rate,
                    amplitude,
                    ramp_time: synthesis.ramp_time,
                },
                band.as_ref(),
                None,
            )?
        }
        StimulusKind::Tone => synthesizer.pure_tone(&ToneSpec {
            duration,
            sample_rate: synthesis.sample_rate,
            frequency,
            phase: 0.0,
            amplitude,
            ramp_time: synthesis.ramp_time,
        })?,
    };
    write_mono(output, &sound)?;
    println!(
        "Wrote {:.3} s ({} samples) to {}",
        sound.duration(),
        sound.len(),
        output.display()
    );
    Ok(ExitCode::from(0))
}

fn emit_report<T: Serialize>(output: &Path, report: &T) -> Result<()> {
    save_json(output, report)?;
    println!("Report written to {}", output.display());
    Ok(())
}
