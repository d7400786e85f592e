//! Gap scan tool - profiles onset detection across a whole track.
//!
//! Unlike detect_gap this never stops early: every chunk is separated and
//! analyzed, and each chunk's noise floor, detection threshold and outcome
//! are printed, followed by every candidate scored under both confidence
//! policies. Useful when tuning thresholds against a song where detection
//! picks the wrong onset.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use gapfix::audio_analysis::{estimate_noise_floor, RmsSeries};
use gapfix::config::parse_policy;
use gapfix::onset::{detect_onset, detection_threshold};
use gapfix::{
    ConfidencePolicy, DemucsSeparator, DetectionConfig, ModelManager, PassthroughSeparator,
    TrackAudio, VocalSeparator,
};

fn print_usage() {
    println!("Profile vocal onset detection across a whole track");
    println!();
    println!("Usage: gap_scan <AUDIO> [OPTIONS]");
    println!();
    println!("Scans every chunk without stopping at the first hit and prints the");
    println!("noise floor, detection threshold and outcome per chunk, plus every");
    println!("candidate scored under both confidence policies.");
    println!();
    println!("Options:");
    println!("  --stem              Input is already an isolated vocal stem (skip separation)");
    println!("  --model <PATH>      Demucs ONNX model file (default: cached download)");
    println!("  --policy <NAME>     Policy for the per-chunk confidence column");
    println!("  --snr <MULT>        SNR threshold in sigma multiples (default: 6.0)");
    println!("  --threshold <RMS>   Absolute RMS threshold (default: 0.02)");
    println!("  --chunk <MS>        Separation chunk length (default: 12000)");
    println!("  --overlap <MS>      Chunk overlap (default: 6000)");
    println!("  --dump-stem <WAV>   Write the separated vocal stem to a WAV file");
    println!("  --help              Show this help message");
}

fn download_progress_printer() -> Box<dyn Fn(f32) + Send> {
    let last_progress = AtomicU32::new(0);
    Box::new(move |p: f32| {
        let pct = (p * 100.0) as u32;
        // Print progress every 5%
        if pct > last_progress.load(Ordering::Relaxed) && pct % 5 == 0 {
            println!("[{:3}%] downloading model", pct);
            last_progress.store(pct, Ordering::Relaxed);
        }
    })
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let mut input: Option<String> = None;
    let mut use_stem = false;
    let mut model: Option<String> = None;
    let mut dump_stem: Option<String> = None;
    let mut config = DetectionConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--stem" => use_stem = true,
            "--model" => {
                if i + 1 < args.len() {
                    model = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--policy" => {
                if i + 1 < args.len() {
                    config.policy = parse_policy(&args[i + 1]).unwrap_or_else(|e| {
                        eprintln!("Error: {}", e);
                        process::exit(1);
                    });
                    i += 1;
                }
            }
            "--snr" => {
                if i + 1 < args.len() {
                    config.snr_multiplier = args[i + 1].parse().unwrap_or(config.snr_multiplier);
                    i += 1;
                }
            }
            "--threshold" => {
                if i + 1 < args.len() {
                    config.abs_threshold = args[i + 1].parse().unwrap_or(config.abs_threshold);
                    i += 1;
                }
            }
            "--chunk" => {
                if i + 1 < args.len() {
                    config.chunk_ms = args[i + 1].parse().unwrap_or(config.chunk_ms);
                    i += 1;
                }
            }
            "--overlap" => {
                if i + 1 < args.len() {
                    config.overlap_ms = args[i + 1].parse().unwrap_or(config.overlap_ms);
                    i += 1;
                }
            }
            "--dump-stem" => {
                if i + 1 < args.len() {
                    dump_stem = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            arg => {
                if arg.starts_with("--") {
                    eprintln!("Unknown option: {}", arg);
                    process::exit(1);
                }
                if input.is_none() {
                    input = Some(arg.to_string());
                }
            }
        }
        i += 1;
    }

    let input = input.unwrap_or_else(|| {
        eprintln!("Error: no audio file specified");
        print_usage();
        process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let mut separator: Box<dyn VocalSeparator> = if use_stem {
        Box::new(PassthroughSeparator)
    } else {
        let model_path = match model {
            Some(path) => PathBuf::from(path),
            None => {
                let manager = ModelManager::new().unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                });
                let progress = if manager.is_available() {
                    None
                } else {
                    println!("Model not cached, downloading...");
                    Some(download_progress_printer())
                };
                manager.ensure(progress).unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                })
            }
        };
        let demucs = DemucsSeparator::load(&model_path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        });
        Box::new(demucs)
    };

    let track = TrackAudio::load(Path::new(&input)).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });

    println!("Gap Scan");
    println!("========");
    println!("Audio:     {}", input);
    println!(
        "Track:     {:.1} s at {} Hz, {} channel(s)",
        track.duration_ms() as f64 / 1000.0,
        track.sample_rate(),
        track.channels()
    );
    println!("Separator: {}", separator.name());
    println!(
        "Chunks:    {} ms with {} ms overlap",
        config.chunk_ms, config.overlap_ms
    );
    println!();

    let params = config.onset_params();
    let frame = config.frame_samples(track.sample_rate());
    let hop = config.hop_samples(track.sample_rate());
    let floor_frames = config.noise_floor_frames();
    let duration = track.duration_ms();

    println!("Chunk  Start      Floor     Sigma     Threshold  Max RMS   Onset");
    println!("-----  ---------  --------  --------  ---------  --------  -----");

    let mut candidates = Vec::new();
    let mut index = 0u32;
    let mut start_ms = 0u64;
    while start_ms < duration {
        index += 1;
        let end_ms = (start_ms + config.chunk_ms).min(duration);
        let chunk = track.chunk(start_ms, end_ms);
        let stem = separator.separate_vocals(&chunk).unwrap_or_else(|e| {
            eprintln!("Separation failed: {}", e);
            process::exit(1);
        });
        let series = RmsSeries::compute(&stem, frame, hop, chunk.sample_rate, chunk.start_ms);
        let floor = estimate_noise_floor(&series.values, floor_frames);
        let threshold = detection_threshold(&floor, &params);
        let max_rms = series.values.iter().cloned().fold(0.0f32, f32::max);
        let onset = detect_onset(&series, &floor, &params, config.policy);

        let onset_col = match &onset {
            Some(c) => format!("{} ms (conf {:.2})", c.time_ms, c.confidence),
            None => "-".to_string(),
        };
        println!(
            "{:>5}  {:>6} ms  {:.6}  {:.6}  {:.6}   {:.6}  {}",
            index, start_ms, floor.floor, floor.sigma, threshold, max_rms, onset_col
        );

        if let Some(c) = onset {
            candidates.push(c);
        }
        start_ms += config.chunk_hop_ms();
    }

    if candidates.is_empty() {
        println!();
        println!("No onsets detected anywhere in the track.");
    } else {
        println!();
        println!("Candidates (one line per chunk that saw the onset):");
        println!("  Time       RMS     Sustain   SNR       Rise    Weighted  Sigmoid");
        for c in &candidates {
            let weighted =
                ConfidencePolicy::WeightedFactors.score(c.rms, c.sustain_ms, c.snr_db, c.rise);
            let sigmoid =
                ConfidencePolicy::SnrSigmoid.score(c.rms, c.sustain_ms, c.snr_db, c.rise);
            println!(
                "  {:>6} ms  {:.4}  {:>5.0} ms  {:>5.1} dB  {:.4}  {:.2}      {:.2}",
                c.time_ms, c.rms, c.sustain_ms, c.snr_db, c.rise, weighted, sigmoid
            );
        }
    }

    if let Some(dump_path) = dump_stem {
        println!();
        println!("Writing vocal stem to {} ...", dump_path);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: track.sample_rate(),
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&dump_path, spec).unwrap_or_else(|e| {
            eprintln!("Error creating WAV: {}", e);
            process::exit(1);
        });
        // Non-overlapping pass so the stem lines up with the track.
        let mut start_ms = 0u64;
        while start_ms < duration {
            let end_ms = (start_ms + config.chunk_ms).min(duration);
            let chunk = track.chunk(start_ms, end_ms);
            let stem = separator.separate_vocals(&chunk).unwrap_or_else(|e| {
                eprintln!("Separation failed: {}", e);
                process::exit(1);
            });
            for sample in stem {
                writer.write_sample(sample).unwrap_or_else(|e| {
                    eprintln!("Error writing WAV: {}", e);
                    process::exit(1);
                });
            }
            start_ms += config.chunk_ms;
        }
        writer.finalize().unwrap_or_else(|e| {
            eprintln!("Error finalizing WAV: {}", e);
            process::exit(1);
        });
        println!("✓ Stem written");
    }
}
