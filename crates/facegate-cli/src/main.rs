use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::capture::{CaptureEvent, CaptureSession};
use facegate_core::record::decode_descriptor;
use facegate_core::types::DESCRIPTOR_LEN;
use facegate_core::{
    compare, find_duplicates, quality, verify, Descriptor, DetectionResult, DuplicateQuery, FrameSize,
    NormalizingAdapter, PipelineConfig, QualityLabel, QualityMetrics, RawDetection, RecordedAdapter,
};
use facegate_engine::{
    spawn_session, EngineConfig, EnrollRequest, FaceStore, RecordFilter, SessionOutcome, SqliteStore,
};
use facegate_hw::{FrameSource, SyntheticCamera};
use serde_json::{json, Value};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facegate", about = "Face capture quality scoring and duplicate identity matching")]
struct Cli {
    /// Pipeline thresholds (TOML); overrides FACEGATE_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Face database; overrides FACEGATE_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one detection (JSON, `-` for stdin; `null` means no face)
    Score {
        detection: PathBuf,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Compare two stored descriptors
    Compare { a: PathBuf, b: PathBuf },
    /// Search the face database for identities resembling a descriptor
    Duplicates {
        probe: PathBuf,
        /// Owner to leave out of the search
        #[arg(long)]
        exclude: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Only search records of at least this quality (poor, fair, good)
        #[arg(long)]
        min_quality: Option<String>,
    },
    /// Run the capture state machine over recorded detections (JSON lines)
    Replay {
        recording: PathBuf,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Request a manual capture at this sample index
        #[arg(long)]
        manual_at: Option<usize>,
    },
    /// Run a live capture session and store the result
    Enroll {
        /// Owner the face is enrolled for
        #[arg(long)]
        owner: String,
        /// Recorded detections standing in for the model (JSON lines)
        #[arg(long)]
        recording: PathBuf,
        /// Request a manual capture after this many milliseconds
        #[arg(long)]
        manual_after_ms: Option<u64>,
        /// V4L2 device to capture from instead of the synthetic camera
        #[cfg(feature = "v4l")]
        #[arg(long)]
        device: Option<String>,
    },
    /// List stored face records
    List,
    /// List V4L2 capture devices
    #[cfg(feature = "v4l")]
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(path) = &cli.config {
        config.pipeline = PipelineConfig::load(path)?;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Score {
            detection,
            width,
            height,
        } => {
            let frame = frame_size(&config, width, height);
            let metrics = score(read_json(&detection)?, frame, &config.pipeline)?;
            print_json(&serde_json::to_value(metrics)?)
        }
        Commands::Compare { a, b } => {
            let a = read_descriptor(&a)?;
            let b = read_descriptor(&b)?;
            let similarity = compare(Some(&a), Some(&b), &config.pipeline.matching);
            let outcome = verify(Some(&a), &b, &config.pipeline.matching);
            print_json(&json!({
                "similarity_percent": similarity,
                "verify": outcome,
            }))
        }
        Commands::Duplicates {
            probe,
            exclude,
            limit,
            min_quality,
        } => {
            let probe = read_descriptor(&probe)?;
            let min_quality = min_quality
                .map(|q| QualityLabel::parse(&q).ok_or_else(|| anyhow!("unknown quality label: {q}")))
                .transpose()?;
            let store = open_store(&config.db_path).await?;
            let records = store
                .query(&RecordFilter {
                    exclude_owner: exclude.clone(),
                    min_quality,
                })
                .await?;

            let matching = &config.pipeline.matching;
            let mut query = DuplicateQuery::from_config(matching);
            query.exclude_owner = exclude;
            query.limit = limit;
            let found = find_duplicates(&probe, &records, &query, matching);
            print_json(&serde_json::to_value(found)?)
        }
        Commands::Replay {
            recording,
            width,
            height,
            manual_at,
        } => {
            let frame = frame_size(&config, width, height);
            let adapter = load_recording(&recording)?;
            for line in replay(adapter, frame, &config.pipeline, manual_at) {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Enroll {
            owner,
            recording,
            manual_after_ms,
            #[cfg(feature = "v4l")]
            device,
        } => {
            #[cfg(feature = "v4l")]
            let source: Box<dyn FrameSource + Send> = match device {
                Some(path) => Box::new(facegate_hw::V4lCamera::new(path, config.frame_size)),
                None => Box::new(SyntheticCamera::new(config.frame_size)),
            };
            #[cfg(not(feature = "v4l"))]
            let source: Box<dyn FrameSource + Send> = Box::new(SyntheticCamera::new(config.frame_size));

            enroll(source, load_recording(&recording)?, owner, manual_after_ms, &config).await
        }
        Commands::List => {
            let store = open_store(&config.db_path).await?;
            let records = store.query(&RecordFilter::default()).await?;
            let rows: Vec<Value> = records
                .iter()
                .map(|r| {
                    json!({
                        "owner_id": r.owner_id,
                        "quality": r.quality_label,
                        "captured_at": r.captured_at,
                        "descriptor_len": r.descriptor.as_ref().map(Descriptor::len),
                    })
                })
                .collect();
            print_json(&Value::Array(rows))
        }
        #[cfg(feature = "v4l")]
        Commands::Devices => {
            for dev in facegate_hw::v4l2::V4lCamera::list_devices() {
                println!("{}\t{}\t{}\t{}", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

fn frame_size(config: &EngineConfig, width: Option<u32>, height: Option<u32>) -> FrameSize {
    FrameSize::new(
        width.unwrap_or(config.frame_size.width),
        height.unwrap_or(config.frame_size.height),
    )
}

fn read_json(path: &Path) -> Result<Value> {
    let mut src = String::new();
    if path == Path::new("-") {
        std::io::stdin().read_to_string(&mut src)?;
    } else {
        src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    }
    serde_json::from_str(&src).with_context(|| format!("parsing {}", path.display()))
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    decode_descriptor(&read_json(path)?).ok_or_else(|| anyhow!("{}: no usable descriptor", path.display()))
}

fn load_recording(path: &Path) -> Result<RecordedAdapter> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(RecordedAdapter::from_json_lines(BufReader::new(file))?)
}

async fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(SqliteStore::open(path).await?)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn score(value: Value, frame: FrameSize, pipeline: &PipelineConfig) -> Result<QualityMetrics> {
    if value.is_null() {
        return Ok(QualityMetrics::undetected());
    }
    let raw: RawDetection = serde_json::from_value(value)?;
    let len = raw.descriptor.as_ref().map_or(DESCRIPTOR_LEN, Vec::len);
    let detection = DetectionResult::from_raw(raw, len)?;
    Ok(quality::score(&detection, frame, &pipeline.quality))
}

/// Drive a [`CaptureSession`] over a recording on a simulated clock: one
/// entry per sampling interval, countdown ticks due at or before a sample
/// are delivered first. Returns one JSON line per transition.
fn replay(
    recording: RecordedAdapter,
    frame: FrameSize,
    pipeline: &PipelineConfig,
    manual_at: Option<usize>,
) -> Vec<String> {
    let sample_ms = pipeline.capture.sample_interval_ms;
    let tick_ms = pipeline.capture.countdown_interval_ms;
    let steps = recording.remaining();
    let mut adapter = NormalizingAdapter::new(recording);
    let mut session = CaptureSession::new(pipeline.clone());
    let mut next_tick: Option<u64> = None;
    let mut lines = Vec::new();

    for step in 0..steps {
        let now = step as u64 * sample_ms;

        while let Some(at) = next_tick.filter(|&at| at <= now) {
            next_tick = Some(at + tick_ms);
            if let Some(event) = session.countdown_tick() {
                lines.push(transition_line(at, &session, &event));
                if matches!(event, CaptureEvent::Finalized(_)) {
                    return lines;
                }
            }
        }

        let detection = adapter
            .detect(&[], frame.width, frame.height)
            .unwrap_or_else(|e| {
                tracing::warn!(step, error = %e, "recorded detection rejected");
                None
            });
        if let Some(event) = session.advance(detection.as_ref(), frame) {
            match &event {
                CaptureEvent::CountdownStarted { .. } => next_tick = Some(now + tick_ms),
                CaptureEvent::CountdownCancelled { .. } => next_tick = None,
                _ => {}
            }
            lines.push(transition_line(now, &session, &event));
        }

        if manual_at == Some(step) {
            match session.request_manual_capture() {
                Some(result) => {
                    lines.push(transition_line(now, &session, &CaptureEvent::Finalized(result)));
                    return lines;
                }
                None => tracing::warn!(step, "manual capture refused"),
            }
        }
    }
    lines
}

fn transition_line(at_ms: u64, session: &CaptureSession, event: &CaptureEvent) -> String {
    json!({
        "t_ms": at_ms,
        "state": session.state(),
        "transition": event,
    })
    .to_string()
}

async fn enroll(
    source: Box<dyn FrameSource + Send>,
    adapter: RecordedAdapter,
    owner_id: String,
    manual_after_ms: Option<u64>,
    config: &EngineConfig,
) -> Result<()> {
    let store = open_store(&config.db_path).await?;
    let handle = spawn_session(source, adapter, store, EnrollRequest { owner_id }, config)?;
    let mut updates = handle.subscribe();
    let mut last_state = updates.borrow().state;

    let manual = async {
        match manual_after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(manual);
    let mut manual_sent = false;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state != last_state {
                    let score = snapshot.quality.as_ref().map(|q| q.overall_score);
                    eprintln!("{:?} -> {:?} (score {:?})", last_state, snapshot.state, score);
                    last_state = snapshot.state;
                }
                if let Some(remaining) = snapshot.countdown_remaining {
                    eprintln!("capturing in {remaining}...");
                }
            }
            _ = &mut manual, if !manual_sent => {
                manual_sent = true;
                handle.request_manual_capture().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("stopping");
                handle.stop().await?;
                break;
            }
        }
    }

    let outcome = handle.finish().await?;
    print_json(&serde_json::to_value(&outcome)?)?;
    if let SessionOutcome::RejectedDuplicate { duplicates, .. } = outcome {
        let best = duplicates.first().map(|d| d.owner_id.as_str()).unwrap_or("unknown");
        bail!("capture rejected: resembles {best}");
    }
    Ok(())
}
