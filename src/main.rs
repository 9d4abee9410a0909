//! Headless driver: plays a WAV file through the pipeline and reports what
//! ended up in the pane.
//!
//! Usage: `shengpu <file.wav> [--settings <path>] [--realtime]`
//!
//! Without `--realtime` playback runs on a simulated clock that jumps
//! straight to each tick deadline.

use anyhow::{Context, Result, bail};
use shengpu::audio::CaptureState;
use shengpu::audio::playback::FilePlayback;
use shengpu::settings::{SettingsManager, default_settings_path};
use shengpu::ui::pane::SpectrogramPane;
use shengpu::ui::render::{RecordingRenderer, frequency_grid};
use shengpu::util::{audio::mix_to_mono, telemetry};
use shengpu::worker::pool::Dispatcher;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Args {
    input: PathBuf,
    settings: Option<PathBuf>,
    realtime: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut input = None;
    let mut settings = None;
    let mut realtime = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--settings" => {
                let path = args.next().context("--settings needs a path")?;
                settings = Some(PathBuf::from(path));
            }
            "--realtime" => realtime = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            _ if input.is_none() => input = Some(PathBuf::from(&arg)),
            _ => bail!("unexpected argument {arg}"),
        }
    }
    let input = input.context("usage: shengpu <file.wav> [--settings <path>] [--realtime]")?;
    Ok(Args {
        input,
        settings,
        realtime,
    })
}

struct Clip {
    samples: Vec<f32>,
    sample_rate: f32,
}

fn decode_wav(path: &Path) -> Result<Clip> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("failed to open {path:?}"))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("failed to decode float samples")?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .context("failed to decode integer samples")?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    Ok(Clip {
        samples: mix_to_mono(&interleaved, channels),
        sample_rate: spec.sample_rate as f32,
    })
}

fn main() -> Result<()> {
    telemetry::init();
    let args = parse_args(std::env::args().skip(1))?;

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let settings = SettingsManager::load_or_default(settings_path).data;

    let clip = decode_wav(&args.input)?;
    if clip.samples.is_empty() {
        bail!("{:?} contains no audio", args.input);
    }
    let options = settings.analysis_options(clip.sample_rate);
    info!(
        "[main] {:?}: {} samples at {} Hz",
        args.input,
        clip.samples.len(),
        clip.sample_rate
    );

    let dispatcher = Dispatcher::initialize(settings.max_workers, &options)
        .context("failed to start analysis workers")?;
    let label = args
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".into());
    let mut pane = SpectrogramPane::new(
        label,
        settings.pane_geometry(),
        options,
        RecordingRenderer::new(),
    )?;
    pane.update_render_parameters(settings.display_update());

    let mut playback = FilePlayback::new(clip.samples, clip.sample_rate, &options)?;
    let started = Instant::now();
    let mut now = started;
    playback.start(&mut pane, now)?;

    loop {
        let state = playback.tick(now, &mut pane, &dispatcher)?;
        pane.frame();
        if state != CaptureState::Running {
            break;
        }
        match playback.next_deadline() {
            Some(due) if args.realtime => {
                thread::sleep(due.saturating_duration_since(Instant::now()));
                now = Instant::now();
            }
            Some(due) => now = due,
            None => {
                thread::sleep(RESULT_POLL_INTERVAL);
                if args.realtime {
                    now = Instant::now();
                }
            }
        }
    }

    report(&pane, started.elapsed());
    Ok(())
}

fn report(pane: &SpectrogramPane<RecordingRenderer>, wall: Duration) {
    let buffer = pane.buffer();
    let renderer = pane.renderer();
    let params = renderer.parameters;
    info!(
        "[main] {} columns analysed ({} kept, {:.0}% of ring) in {:.2}s; {} uploads, {} frames",
        buffer.total_written(),
        buffer.len(),
        buffer.fill_ratio() * 100.0,
        wall.as_secs_f64(),
        renderer.uploads,
        renderer.frames
    );

    let bin_hz = params.sample_rate / params.window_size as f32;
    let view = buffer.linearize();
    let peaks: Vec<f32> = view
        .iter_columns()
        .filter_map(|column| {
            column
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(bin, _)| bin as f32 * bin_hz)
        })
        .collect();
    match (peaks.first(), peaks.last()) {
        (Some(first), Some(last)) => {
            info!("[main] dominant frequency {first:.1} Hz at start, {last:.1} Hz at end")
        }
        _ => warn!("[main] clip was shorter than one analysis window"),
    }

    let grid = frequency_grid(params.min_frequency_hz, params.max_frequency_hz, params.scale);
    let labels: Vec<&str> = grid.iter().map(|line| line.label.as_str()).collect();
    info!("[main] frequency grid: {}", labels.join(", "));
}
