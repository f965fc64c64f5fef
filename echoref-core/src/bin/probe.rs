fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("echoref_core=info,echoref_probe=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("probe failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use echoref_core::{
        audio::{
            device::{list_output_devices, OutputDeviceInfo},
            samples_to_frame, SAMPLES_PER_FRAME,
        },
        channel_source, load_config, DiagnosticsSnapshot, EchoRefError, Frame, NullSink,
        PlaybackSink, PlayoutSession, SessionConfig, SessionStatus, WavSink, FRAME_DURATION,
        SAMPLE_RATE,
    };
    use serde::Serialize;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Args {
        seconds: u64,
        stall_after: Option<u64>,
        stall_frames: u64,
        tone_hz: f32,
        played_wav: Option<PathBuf>,
        reference_wav: Option<PathBuf>,
        config: Option<PathBuf>,
        device: bool,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Report {
        seconds: u64,
        frames_fed: u64,
        stall_after: Option<u64>,
        stall_frames: u64,
        final_status: SessionStatus,
        elapsed_ms: f64,
        expected_ticks: u64,
        tick_drift_frames: i64,
        reference_frames: u64,
        diagnostics: DiagnosticsSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        output_devices: Option<Vec<OutputDeviceInfo>>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            seconds: 3,
            stall_after: None,
            stall_frames: 5,
            tone_hz: 440.0,
            played_wav: None,
            reference_wav: None,
            config: None,
            device: false,
        };

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            let mut value = |name: &str| it.next().ok_or_else(|| format!("missing value for {name}"));
            match arg.as_str() {
                "--seconds" => {
                    args.seconds = value("--seconds")?
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --seconds".to_string())?
                        .clamp(1, 600);
                }
                "--stall-after" => {
                    args.stall_after = Some(
                        value("--stall-after")?
                            .parse::<u64>()
                            .map_err(|_| "invalid value for --stall-after".to_string())?,
                    );
                }
                "--stall-frames" => {
                    args.stall_frames = value("--stall-frames")?
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --stall-frames".to_string())?;
                }
                "--tone" => {
                    args.tone_hz = value("--tone")?
                        .parse::<f32>()
                        .map_err(|_| "invalid value for --tone".to_string())?
                        .clamp(20.0, 7_000.0);
                }
                "--played-wav" => args.played_wav = Some(PathBuf::from(value("--played-wav")?)),
                "--reference-wav" => {
                    args.reference_wav = Some(PathBuf::from(value("--reference-wav")?));
                }
                "--config" => args.config = Some(PathBuf::from(value("--config")?)),
                "--device" => args.device = true,
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p echoref-core --bin echoref-probe -- \\
  [--seconds <n>] [--stall-after <frame> [--stall-frames <n>]] [--tone <hz>] \\
  [--played-wav <file>] [--reference-wav <file>] [--config <file.json>] [--device]"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }
        if args.device && args.played_wav.is_some() {
            return Err("--device and --played-wav are mutually exclusive".into());
        }
        Ok(args)
    }

    fn tone_frame(tone_hz: f32, index: u64) -> Frame {
        let mut samples = [0i16; SAMPLES_PER_FRAME];
        let base = index * SAMPLES_PER_FRAME as u64;
        for (i, sample) in samples.iter_mut().enumerate() {
            let t = (base + i as u64) as f32 / SAMPLE_RATE as f32;
            *sample = ((t * tone_hz * std::f32::consts::TAU).sin() * 8_000.0) as i16;
        }
        let mut frame = [0u8; echoref_core::BLOCK_SIZE];
        samples_to_frame(&samples, &mut frame);
        frame
    }

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => load_config(path),
        None => SessionConfig::default(),
    };

    let output_devices = args.device.then(list_output_devices);
    let played_wav = args.played_wav.clone();
    let use_device = args.device;
    let preferred_device = config.preferred_output_device.clone();
    let make_sink = move || -> echoref_core::Result<Box<dyn PlaybackSink>> {
        if let Some(path) = played_wav {
            return Ok(Box::new(WavSink::create(path)?));
        }
        if use_device {
            #[cfg(feature = "audio-cpal")]
            {
                use echoref_core::CpalSink;
                let sink = match preferred_device.as_deref() {
                    Some(name) => CpalSink::open_with_preference(Some(name))?,
                    None => CpalSink::open_default()?,
                };
                return Ok(Box::new(sink));
            }
            #[cfg(not(feature = "audio-cpal"))]
            {
                let _ = preferred_device;
                return Err(EchoRefError::UnsupportedOperation(
                    "built without the audio-cpal feature",
                ));
            }
        }
        Ok(Box::new(NullSink))
    };

    let (feed, source) = channel_source();
    let mut session = PlayoutSession::open(config, source, make_sink).map_err(|e| e.to_string())?;
    let started = Instant::now();

    // ── Paced synthetic far end ───────────────────────────────────────────────
    let total_frames = args.seconds * 1_000 / FRAME_DURATION.as_millis() as u64;
    let stall_after = args.stall_after;
    let stall_frames = args.stall_frames;
    let tone_hz = args.tone_hz;
    let feeder = thread::Builder::new()
        .name("probe-feed".into())
        .spawn(move || {
            let mut fed = 0u64;
            let mut next = Instant::now();
            while fed < total_frames {
                if stall_after == Some(fed) && stall_frames > 0 {
                    // Hold the stream, then deliver the backlog in one burst.
                    thread::sleep(FRAME_DURATION * stall_frames as u32);
                    for _ in 0..stall_frames.min(total_frames - fed) {
                        if feed.push(tone_frame(tone_hz, fed).to_vec()).is_err() {
                            return fed;
                        }
                        fed += 1;
                    }
                    next = Instant::now();
                    continue;
                }
                if feed.push(tone_frame(tone_hz, fed).to_vec()).is_err() {
                    return fed;
                }
                fed += 1;
                next += FRAME_DURATION;
                if let Some(wait) = next.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
            fed
        })
        .map_err(|e| e.to_string())?;

    // ── Drain the echo reference alongside playback ───────────────────────────
    let mut reference_wav = match &args.reference_wav {
        Some(path) => Some(WavSink::create(path).map_err(|e| e.to_string())?),
        None => None,
    };
    let run_for = Duration::from_secs(args.seconds) + Duration::from_millis(200);
    let mut frame = [0u8; echoref_core::BLOCK_SIZE];
    let mut reference_frames = 0u64;
    while started.elapsed() < run_for {
        match session.read_frame_timeout(&mut frame, Duration::from_millis(20)) {
            Ok(true) => {
                reference_frames += 1;
                if let Some(wav) = reference_wav.as_mut() {
                    wav.append(&frame).map_err(|e| e.to_string())?;
                }
            }
            Ok(false) => {}
            Err(EchoRefError::Closed) => break,
            Err(e) => return Err(e.to_string()),
        }
    }

    // Wall-clock time the scheduler has been ticking.
    let elapsed = started
        .elapsed()
        .saturating_sub(session.config().start_delay());
    let final_status = session.status();
    session.close().map_err(|e| e.to_string())?;
    let frames_fed = feeder
        .join()
        .map_err(|_| "feeder thread panicked".to_string())?;
    if let Some(wav) = reference_wav {
        wav.finalize().map_err(|e| e.to_string())?;
    }

    let diagnostics = session.diagnostics();
    let expected_ticks = (elapsed.as_nanos() / FRAME_DURATION.as_nanos()) as u64 + 1;
    let report = Report {
        seconds: args.seconds,
        frames_fed,
        stall_after: args.stall_after,
        stall_frames: args.stall_frames,
        final_status,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        expected_ticks,
        tick_drift_frames: diagnostics.ticks as i64 - expected_ticks as i64,
        reference_frames,
        diagnostics,
        output_devices,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

