//! Gap detection tool - finds the vocal onset of an UltraStar song.
//!
//! Takes a song .txt (using its #MP3/#AUDIO tag as the track and its #GAP
//! as the expected position) or a bare audio file, isolates the vocals
//! with Demucs and reports the detected gap. With --write the #GAP header
//! of the song file is updated in place; nothing else in the file changes.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use gapfix::{
    Defaults, DemucsSeparator, DetectionConfig, DetectionOutcome, GapDetector, ModelManager,
    PassthroughSeparator, SongFile, TrackAudio, VocalSeparator,
};

fn print_usage() {
    println!("Detect the vocal gap of an UltraStar song");
    println!();
    println!("Usage: detect_gap <SONG.txt|AUDIO> [OPTIONS]");
    println!();
    println!("Input:");
    println!("  A song .txt supplies the audio path (#MP3/#AUDIO) and the current");
    println!("  #GAP as the expected position. A bare audio file is scanned from");
    println!("  the start unless --expected is given.");
    println!();
    println!("Options:");
    println!("  --expected <MS>       Expected gap position, overrides the stored #GAP");
    println!("  --write               Write the detected gap back to the #GAP header");
    println!("  --stem                Input is already an isolated vocal stem (skip separation)");
    println!("  --model <PATH>        Demucs ONNX model file (default: cached download)");
    println!("  --policy <NAME>       Confidence policy: weighted or sigmoid");
    println!("  --snr <MULT>          SNR threshold in sigma multiples (default: 6.0)");
    println!("  --threshold <RMS>     Absolute RMS threshold (default: 0.02)");
    println!("  --min-silence <MS>    Silence required before an onset (default: 300)");
    println!("  --min-voiced <MS>     Sustained sound required after an onset (default: 500)");
    println!("  --hysteresis <MS>     Backward refinement range (default: 120)");
    println!("  --chunk <MS>          Separation chunk length (default: 12000)");
    println!("  --overlap <MS>        Chunk overlap (default: 6000)");
    println!("  --radius <MS>         Initial search radius around the expected gap (default: 5000)");
    println!("  --radius-step <MS>    Radius growth per iteration (default: 5000)");
    println!("  --max-iterations <N>  Maximum radius expansions (default: 5)");
    println!("  --save-defaults       Save the given options as defaults");
    println!("  --show-defaults       Show the effective defaults and exit");
    println!("  --help                Show this help message");
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
    let mut expected_override: Option<u64> = None;
    let mut use_stem = false;
    let mut write_back = false;
    let mut save_defaults = false;
    let mut show_defaults = false;
    let mut cli = Defaults::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--expected" => {
                if i + 1 < args.len() {
                    expected_override = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--write" => write_back = true,
            "--stem" => use_stem = true,
            "--model" => {
                if i + 1 < args.len() {
                    cli.model = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--policy" => {
                if i + 1 < args.len() {
                    cli.policy = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--snr" => {
                if i + 1 < args.len() {
                    cli.snr_multiplier = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--threshold" => {
                if i + 1 < args.len() {
                    cli.abs_threshold = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--min-silence" => {
                if i + 1 < args.len() {
                    cli.min_silence_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--min-voiced" => {
                if i + 1 < args.len() {
                    cli.min_voiced_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--hysteresis" => {
                if i + 1 < args.len() {
                    cli.hysteresis_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--chunk" => {
                if i + 1 < args.len() {
                    cli.chunk_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--overlap" => {
                if i + 1 < args.len() {
                    cli.overlap_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--radius" => {
                if i + 1 < args.len() {
                    cli.initial_radius_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--radius-step" => {
                if i + 1 < args.len() {
                    cli.radius_increment_ms = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--max-iterations" => {
                if i + 1 < args.len() {
                    cli.max_iterations = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--save-defaults" => save_defaults = true,
            "--show-defaults" => show_defaults = true,
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

    let mut defaults = Defaults::load().unwrap_or_else(|e| {
        eprintln!("Error loading defaults: {}", e);
        process::exit(1);
    });
    defaults.merge(&cli);

    if show_defaults {
        defaults.print("Effective settings");
        process::exit(0);
    }
    if save_defaults {
        if let Err(e) = defaults.save() {
            eprintln!("Error saving defaults: {}", e);
            process::exit(1);
        }
        match Defaults::get_config_path() {
            Ok(path) => println!("✓ Saved defaults to {}", path.display()),
            Err(_) => println!("✓ Saved defaults"),
        }
        if input.is_none() {
            process::exit(0);
        }
    }

    let input = input.unwrap_or_else(|| {
        eprintln!("Error: no input file specified");
        print_usage();
        process::exit(1);
    });

    let mut config = DetectionConfig::default();
    if let Err(e) = defaults.apply_to(&mut config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let input_path = Path::new(&input);
    let is_song_txt = input_path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);

    let mut song: Option<SongFile> = None;
    let audio_path: PathBuf;
    let mut expected_ms = expected_override;

    if is_song_txt {
        let loaded = SongFile::load(input_path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        });
        audio_path = loaded.audio_path().unwrap_or_else(|| {
            eprintln!("Error: song file has no #MP3 or #AUDIO tag");
            process::exit(1);
        });
        if expected_ms.is_none() {
            expected_ms = loaded.gap_hint_ms();
        }
        song = Some(loaded);
    } else {
        audio_path = input_path.to_path_buf();
    }

    println!("Gap Detection");
    println!("=============");
    if let Some(s) = &song {
        if let (Some(artist), Some(title)) = (s.artist(), s.title()) {
            println!("Song:     {} - {}", artist, title);
        }
    }
    println!("Audio:    {}", audio_path.display());
    match expected_ms {
        Some(ms) => println!("Expected: {} ms", ms),
        None => println!("Expected: none (linear scan)"),
    }
    println!("Policy:   {}", config.policy.display_name());
    println!();

    let mut separator: Box<dyn VocalSeparator> = if use_stem {
        Box::new(PassthroughSeparator)
    } else {
        let model_path = match &defaults.model {
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

    let track = TrackAudio::load(&audio_path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });
    println!(
        "Track: {:.1} s at {} Hz, {} channel(s)",
        track.duration_ms() as f64 / 1000.0,
        track.sample_rate(),
        track.channels()
    );

    let detector = GapDetector::new(config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });
    let result = detector
        .detect(&track, separator.as_mut(), expected_ms, &|| false)
        .unwrap_or_else(|e| {
            eprintln!("Detection failed: {}", e);
            process::exit(1);
        });

    println!();
    match &result.outcome {
        DetectionOutcome::Found(onset) => {
            println!(
                "Detected gap: {} ms (confidence {:.2})",
                onset.time_ms, onset.confidence
            );
            println!("  RMS at onset: {:.4}", onset.rms);
            println!("  Sustained:    {:.0} ms", onset.sustain_ms);
            println!("  SNR:          {:.1} dB", onset.snr_db);
            println!("  Rise rate:    {:.4}", onset.rise);
        }
        DetectionOutcome::NotFound => println!("No vocal onset detected."),
        DetectionOutcome::Cancelled => println!("Detection cancelled."),
    }

    if result.candidates.len() > 1 {
        println!();
        println!("All candidates:");
        for (idx, c) in result.candidates.iter().enumerate() {
            let marker = if Some(c.time_ms) == result.gap_ms() {
                "  <- accepted"
            } else {
                ""
            };
            println!(
                "  {}. {:>8} ms  conf {:.2}  snr {:>5.1} dB{}",
                idx + 1,
                c.time_ms,
                c.confidence,
                c.snr_db,
                marker
            );
        }
    }

    println!();
    println!(
        "Separations: {}, iterations: {}",
        result.separations, result.iterations
    );

    if let Some(gap) = result.gap_ms() {
        if let Some(song) = song.as_mut() {
            if write_back {
                song.set_gap(gap);
                if let Err(e) = song.save() {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
                println!("✓ Updated #GAP in {}", song.path().display());
            } else {
                match song.gap_ms() {
                    Some(old) => println!(
                        "Stored #GAP is {:.0} ms; run with --write to update it to {} ms.",
                        old, gap
                    ),
                    None => println!("Run with --write to set #GAP to {} ms.", gap),
                }
            }
        }
    }
}
