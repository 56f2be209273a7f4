/// Channel Renderer — writes SensorLab channel buffers to WAV files.
///
/// Runs the signal engine once with the requested parameters and dumps each
/// channel's window as 24-bit mono PCM, normalized by the channel's physical
/// limit so full scale means "at the clamp".

use sensorlab_dsp::ChannelId;
use sensorlab_dsp::config::EngineConfig;
use sensorlab_dsp::engine::SignalEngine;
use sensorlab_dsp::params::ParameterBank;
use sensorlab_dsp::snapshot::{self, ParameterSnapshot};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut channels: Vec<ChannelId> = Vec::new();
    let mut config = EngineConfig::default();
    let mut output_dir = String::from(".");
    let mut output_file: Option<String> = None;
    let mut snapshot_source: Option<String> = None;
    let mut assignments: Vec<String> = Vec::new();
    let mut dump_params = false;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--channel" | "-c" => {
                let value = next_value(&args, &mut i);
                for name in value.split(',') {
                    let name = name.trim();
                    if name.eq_ignore_ascii_case("all") {
                        channels.extend(ChannelId::ALL);
                    } else {
                        match ChannelId::from_name(name) {
                            Some(c) => channels.push(c),
                            None => fail(&format!("unknown channel '{name}'")),
                        }
                    }
                }
            }
            "--sample-rate" | "-r" => {
                config.sample_rate_hz = parse_number(next_value(&args, &mut i), "sample rate");
            }
            "--seconds" | "-s" => {
                config.buffer_seconds = parse_number(next_value(&args, &mut i), "seconds");
            }
            "--set" => {
                assignments.push(next_value(&args, &mut i).to_string());
            }
            "--snapshot" => {
                snapshot_source = Some(next_value(&args, &mut i).to_string());
            }
            "--output" | "-o" => {
                output_file = Some(next_value(&args, &mut i).to_string());
            }
            "--output-dir" => {
                output_dir = next_value(&args, &mut i).to_string();
            }
            "--dump-params" => dump_params = true,
            "--verbose" => verbose = true,
            "--help" | "-h" => {
                print_usage();
                return;
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    if channels.is_empty() {
        channels.extend(ChannelId::ALL);
    }
    channels.sort();
    channels.dedup();

    if output_file.is_some() && channels.len() > 1 {
        fail("--output needs exactly one channel; use --output-dir for several");
    }
    if let Err(e) = config.validate() {
        fail(&format!("invalid engine settings: {e}"));
    }
    if config.sample_rate_hz.fract() != 0.0 || config.sample_rate_hz > u32::MAX as f64 {
        fail("WAV output needs a whole-number sample rate");
    }

    let mut params = match snapshot_source.as_deref() {
        None => ParameterSnapshot::default(),
        Some("default") => snapshot::load_default(),
        Some(path) => snapshot::try_load(std::path::Path::new(path))
            .unwrap_or_else(|e| fail(&format!("cannot read snapshot {path}: {e}"))),
    };
    for assignment in &assignments {
        if let Err(e) = params.assign(assignment) {
            fail(&format!("--set {assignment}: {e}"));
        }
    }

    if dump_params {
        match serde_json::to_string_pretty(&params) {
            Ok(text) => println!("{text}"),
            Err(e) => fail(&format!("cannot serialize parameters: {e}")),
        }
    }

    let bank = ParameterBank::new();
    bank.apply(&params);
    let engine = SignalEngine::new(bank, config);
    engine.start();

    if output_file.is_none() {
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            fail(&format!("cannot create {output_dir}: {e}"));
        }
    }

    let sample_rate = engine.config().sample_rate_hz as u32;
    for &channel in &channels {
        let samples = engine.samples(channel);
        let limit = channel.physical_limit();
        let normalized: Vec<f64> = samples.iter().map(|&v| v / limit).collect();

        let path = match &output_file {
            Some(f) => f.clone(),
            None => format!("{output_dir}/{channel}.wav"),
        };
        if let Err(e) = write_wav(&path, &normalized, sample_rate) {
            fail(&format!("failed to write {path}: {e}"));
        }

        let (lo, hi) = samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        println!(
            "{:<12} {:>6} samples  min {:>10.4}  max {:>10.4}  latest {:>10.4}  -> {path}",
            channel.name(),
            samples.len(),
            lo,
            hi,
            engine.latest(channel),
        );
        tracing::debug!(%channel, limit, "rendered");
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize) -> &'a str {
    *i += 1;
    match args.get(*i) {
        Some(v) => v.as_str(),
        None => fail(&format!("{} needs a value", args[*i - 1])),
    }
}

fn parse_number(value: &str, what: &str) -> f64 {
    value
        .trim()
        .parse()
        .unwrap_or_else(|_| fail(&format!("invalid {what}: '{value}'")))
}

fn fail(message: &str) -> ! {
    eprintln!("channel-renderer: {message}");
    std::process::exit(1);
}

fn write_wav(path: &str, samples: &[f64], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 24,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let scale = (1 << 23) as f64 - 1.0;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * scale).round() as i32)?;
    }
    writer.finalize()
}

fn print_usage() {
    eprintln!(
        r#"Channel Renderer — SensorLab channel buffers to WAV

USAGE:
    channel-renderer [OPTIONS]

OPTIONS:
    -c, --channel <NAME[,NAME,...]>   orientation, force, strain, emg or all (default: all)
    -r, --sample-rate <HZ>            Sample rate, whole Hz (default: 100)
    -s, --seconds <SECS>              Window length (default: 5.0)
        --set <CHANNEL.FIELD=VALUE>   Override one parameter (repeatable)
        --snapshot <PATH|default>     Start from a saved parameter snapshot
    -o, --output <PATH>               Output WAV file (single channel only)
        --output-dir <DIR>            Output directory, one <channel>.wav each (default: .)
        --dump-params                 Print the effective parameters as JSON
        --verbose                     Debug logging on stderr
    -h, --help                        Print this help

Samples are divided by the channel's physical limit (180 deg, 15 V, 1 V, 10 mV)
before quantizing to 24-bit PCM.

EXAMPLES:
    channel-renderer -c force --set force.mode=static -o force.wav
    channel-renderer --set orientation.damping_ratio=0.1 --output-dir out/
    channel-renderer -c emg --set emg.activation=0.5 --seconds 10 -o emg.wav"#
    );
}
