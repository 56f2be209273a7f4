/// Analysis Bench — SensorLab linear-systems inspection CLI.
///
/// Builds the weighted combined system from a parameter snapshot and reports
/// on it, or runs the signal engine and prints channel spectra.
///
/// Usage:
///   analysis-bench stability [COMMON]
///   analysis-bench sweep [--points N] [--csv FILE] [COMMON]
///   analysis-bench poles [COMMON]
///   analysis-bench spectrum [--peaks K] [--channel NAME] [COMMON]
///
/// COMMON: [--set CHANNEL.FIELD=VALUE]... [--snapshot PATH|default]
///         [--weights W,W,W,W] [--method zoh|tustin] [--sample-rate HZ] [--verbose]

use num_complex::Complex64;

use sensorlab_dsp::ChannelId;
use sensorlab_dsp::analysis::{AnalysisOutcome, AnalysisReport, analyze};
use sensorlab_dsp::config::{AnalysisConfig, EngineConfig};
use sensorlab_dsp::discretize::Discretization;
use sensorlab_dsp::engine::SignalEngine;
use sensorlab_dsp::model::TransferFunction;
use sensorlab_dsp::params::{NUM_CHANNELS, ParameterBank};
use sensorlab_dsp::snapshot::{self, ParameterSnapshot};
use sensorlab_dsp::spectrum::{DEFAULT_PEAK_COUNT, SpectralEngine, extract_peaks};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_max_level(if has_flag(&args, "--verbose") {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    match args[1].as_str() {
        "stability" => cmd_stability(&args[2..]),
        "sweep" => cmd_sweep(&args[2..]),
        "poles" => cmd_poles(&args[2..]),
        "spectrum" => cmd_spectrum(&args[2..]),
        "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown subcommand: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("Analysis Bench — SensorLab combined-system inspection");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  stability   Pole magnitudes and the stability verdict");
    eprintln!("  sweep       Frequency response over the analysis band");
    eprintln!("  poles       Per-channel and combined poles and zeros");
    eprintln!("  spectrum    Engine buffers through the spectral engine");
    eprintln!();
    eprintln!("Common options:");
    eprintln!("  --set CHANNEL.FIELD=VALUE   Override one parameter (repeatable)");
    eprintln!("  --snapshot PATH|default     Start from a saved parameter snapshot");
    eprintln!("  --weights W,W,W,W           Output weights (orientation,force,strain,emg)");
    eprintln!("  --method zoh|tustin         Discretization method (default: zoh)");
    eprintln!("  --sample-rate HZ            Sample rate (default: 100)");
    eprintln!("  --verbose                   Debug logging on stderr");
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn parse_flag(args: &[String], flag: &str, default: f64) -> f64 {
    for i in 0..args.len().saturating_sub(1) {
        if args[i] == flag {
            return args[i + 1]
                .parse()
                .unwrap_or_else(|_| fail(&format!("invalid value for {flag}: '{}'", args[i + 1])));
        }
    }
    default
}

fn parse_flag_str<'a>(args: &'a [String], flag: &str, default: &'a str) -> &'a str {
    for i in 0..args.len().saturating_sub(1) {
        if args[i] == flag {
            return &args[i + 1];
        }
    }
    default
}

/// Every value given for a repeatable flag, in order.
fn flag_values<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].as_str())
        .collect()
}

fn fail(message: &str) -> ! {
    eprintln!("analysis-bench: {message}");
    std::process::exit(1);
}

// ─── Common setup ───────────────────────────────────────────────────────────

fn load_parameters(args: &[String]) -> ParameterSnapshot {
    let mut params = match parse_flag_str(args, "--snapshot", "") {
        "" => ParameterSnapshot::default(),
        "default" => snapshot::load_default(),
        path => snapshot::try_load(std::path::Path::new(path))
            .unwrap_or_else(|e| fail(&format!("cannot read snapshot {path}: {e}"))),
    };
    for assignment in flag_values(args, "--set") {
        if let Err(e) = params.assign(assignment) {
            fail(&format!("--set {assignment}: {e}"));
        }
    }
    params
}

fn analysis_config(args: &[String]) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.sample_rate_hz = parse_flag(args, "--sample-rate", config.sample_rate_hz);
    if !config.sample_rate_hz.is_finite() || config.sample_rate_hz <= 0.0 {
        fail("--sample-rate must be positive");
    }
    config.discretization = parse_flag_str(args, "--method", "zoh")
        .parse::<Discretization>()
        .unwrap_or_else(|e| fail(&e));
    config.response_points =
        parse_flag(args, "--points", config.response_points as f64).max(2.0) as usize;

    let weights = parse_flag_str(args, "--weights", "");
    if !weights.is_empty() {
        let parsed: Vec<f64> = weights
            .split(',')
            .map(|w| {
                w.trim()
                    .parse::<f64>()
                    .unwrap_or_else(|_| fail(&format!("invalid weight '{w}'")))
            })
            .collect();
        if parsed.len() != NUM_CHANNELS {
            fail(&format!("--weights needs {NUM_CHANNELS} values, got {}", parsed.len()));
        }
        config.weights.copy_from_slice(&parsed);
    }
    config
}

fn run_analysis(args: &[String]) -> Option<Box<AnalysisReport>> {
    let params = load_parameters(args);
    let config = analysis_config(args);
    match analyze(&params, &config, &|| false) {
        Ok(AnalysisOutcome::Ready(report)) => Some(report),
        Ok(AnalysisOutcome::NoSystem) => {
            println!("No system: every channel weight (or the whole output) is zero.");
            None
        }
        Err(e) => fail(&format!("analysis failed: {e}")),
    }
}

fn fmt_complex(z: Complex64) -> String {
    let sign = if z.im < 0.0 { '-' } else { '+' };
    format!("{:>10.6} {sign} {:>9.6}j", z.re, z.im.abs())
}

// ─── Stability ──────────────────────────────────────────────────────────────

fn cmd_stability(args: &[String]) {
    let Some(report) = run_analysis(args) else { return };
    let stab = &report.stability;

    println!("States:            {}", report.state_count());
    println!("Stable:            {}", if stab.stable { "yes" } else { "NO" });
    println!("Max |pole|:        {:.9}", stab.max_magnitude);
    println!("Reason:            {}", stab.reason);
    println!(
        "Root finding:      {} ({} iterations)",
        if report.roots_converged() { "converged" } else { "NOT converged" },
        report.pole_solution.iterations
    );
    println!("TF vs SS max gap:  {:.2e} dB", report.cross_validation_db);
}

// ─── Frequency response ─────────────────────────────────────────────────────

fn cmd_sweep(args: &[String]) {
    let csv_path = parse_flag_str(args, "--csv", "");
    let Some(report) = run_analysis(args) else { return };

    println!("{:>10}  {:>10}  {:>10}", "Freq (Hz)", "Mag (dB)", "Phase (°)");
    println!("{}", "-".repeat(36));

    let mut csv_lines = Vec::new();
    csv_lines.push("freq_hz,magnitude_db,phase_deg".to_string());
    for pt in &report.response {
        println!("{:>10.3}  {:>10.3}  {:>10.2}", pt.freq_hz, pt.magnitude_db, pt.phase_deg);
        csv_lines.push(format!("{:.6},{:.6},{:.4}", pt.freq_hz, pt.magnitude_db, pt.phase_deg));
    }

    if !csv_path.is_empty() {
        if let Err(e) = std::fs::write(csv_path, csv_lines.join("\n") + "\n") {
            fail(&format!("failed to write {csv_path}: {e}"));
        }
        println!("\nCSV written to {csv_path}");
    }
}

// ─── Poles and zeros ────────────────────────────────────────────────────────

fn print_roots(label: &str, roots: &[Complex64]) {
    if roots.is_empty() {
        println!("  {label:<16} (none)");
        return;
    }
    for (k, z) in roots.iter().enumerate() {
        let head = if k == 0 { label } else { "" };
        println!("  {head:<16} {}   |z| = {:.6}", fmt_complex(*z), z.norm());
    }
}

fn cmd_poles(args: &[String]) {
    let params = load_parameters(args);
    let config = analysis_config(args);

    for channel in ChannelId::ALL {
        let mut tf = TransferFunction::for_channel(channel, &params);
        if let Err(e) = tf.populate_digital(config.sample_rate_hz, config.discretization) {
            println!("{channel}: digital model unavailable ({e})");
        }
        println!("{channel} (weight {})", config.weights[channel.index()]);
        print_roots("analog poles", tf.analog_poles());
        print_roots("analog zeros", tf.analog_zeros());
        if tf.is_digital_populated() {
            print_roots("digital poles", tf.digital_poles());
            print_roots("digital zeros", tf.digital_zeros());
        }
        println!();
    }

    let Some(report) = run_analysis(args) else { return };
    println!("combined ({} states, {})", report.state_count(), config.discretization);
    print_roots("poles", report.poles());
    print_roots("zeros", report.zeros());
}

// ─── Spectrum ───────────────────────────────────────────────────────────────

fn cmd_spectrum(args: &[String]) {
    let params = load_parameters(args);
    let peak_count = parse_flag(args, "--peaks", DEFAULT_PEAK_COUNT as f64).max(0.0) as usize;
    let only = match parse_flag_str(args, "--channel", "") {
        "" => None,
        name => Some(
            ChannelId::from_name(name)
                .unwrap_or_else(|| fail(&format!("unknown channel '{name}'"))),
        ),
    };

    let engine_config = EngineConfig {
        sample_rate_hz: parse_flag(args, "--sample-rate", EngineConfig::default().sample_rate_hz),
        ..EngineConfig::default()
    };
    if let Err(e) = engine_config.validate() {
        fail(&format!("invalid engine settings: {e}"));
    }
    let bank = ParameterBank::new();
    bank.apply(&params);
    let engine = SignalEngine::new(bank, engine_config);
    engine.start();

    let mut spectra = SpectralEngine::new();
    let sample_rate = engine.config().sample_rate_hz;
    for channel in ChannelId::ALL.into_iter().filter(|c| only.is_none_or(|o| o == *c)) {
        let block = spectra.compute(&engine.samples(channel), sample_rate, channel, 0.0);
        println!(
            "{channel}: N = {}, bin = {:.4} Hz, peak {:.3} Hz ({:.4e})",
            block.fft_len(),
            block.bin_width(),
            block.peak_freq,
            block.peak_magnitude
        );
        match extract_peaks(&block, peak_count) {
            Some(peaks) => {
                for (f, m) in peaks.freqs.iter().zip(&peaks.magnitudes) {
                    println!("  {f:>10.3} Hz  {m:>12.4e}");
                }
            }
            None => println!("  no spectral peaks"),
        }
    }
}
