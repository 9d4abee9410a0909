use async_channel::{Receiver, Sender};
use shengpu::PipelineError;
use shengpu::audio::CaptureState;
use shengpu::audio::microphone::MicrophoneAdapter;
use shengpu::audio::playback::FilePlayback;
use shengpu::dsp::SampleChunk;
use shengpu::dsp::spectrogram::{SpectrogramOptions, compute_spectrogram};
use shengpu::ui::column_buffer::ColumnBuffer;
use shengpu::ui::pane::{Gesture, LinkedPanes, PaneGeometry, PaneRole, SpectrogramPane};
use shengpu::ui::render::RecordingRenderer;
use shengpu::worker::pool::Dispatcher;
use shengpu::worker::{ComputeOutput, Kernel, WorkerRequest, WorkerResponse};
use std::sync::Arc;
use std::time::Instant;

fn sine(hz: f32, rate: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| (std::f32::consts::TAU * hz * n as f32 / rate).sin())
        .collect()
}

#[test]
fn one_second_chunk_yields_twelve_columns() {
    let options = SpectrogramOptions {
        window_size: 4096,
        window_step_size: 1024,
        sample_rate: 16_000.0,
        ..SpectrogramOptions::default()
    };
    let dispatcher = Dispatcher::initialize(2, &options).unwrap();
    let chunk = SampleChunk::whole(sine(440.0, 16_000.0, 16_000), 16_000.0, true);

    let output = dispatcher.submit(chunk, options).wait().unwrap();
    assert_eq!(output.window_count, 12);
    assert_eq!(output.columns.len(), 12 * 2048);
    assert!(output.options.is_start);
    assert_eq!(output.input.len(), 16_000);

    let again = dispatcher
        .submit(SampleChunk::whole(output.input.clone(), 16_000.0, true), options)
        .wait()
        .unwrap();
    assert_eq!(again.columns, output.columns);
}

#[test]
fn ring_of_one_hundred_keeps_columns_twenty_onwards() {
    let mut buffer = ColumnBuffer::new(100, 2, 1).unwrap();
    let batch = |range: std::ops::Range<usize>| -> Vec<f32> {
        range.flat_map(|i| [i as f32, i as f32]).collect()
    };
    buffer.enqueue(&batch(0..60)).unwrap();
    buffer.enqueue(&batch(60..120)).unwrap();

    let view = buffer.linearize();
    assert_eq!(view.len(), 100);
    let ids: Vec<usize> = view.iter_columns().map(|c| c[0] as usize).collect();
    assert_eq!(ids, (20..120).collect::<Vec<_>>());
}

/// Blocks each task until its gate opens and reports when it starts.
struct GatedKernel {
    started: Sender<usize>,
    gates: Arc<Vec<Receiver<()>>>,
}

impl Kernel for GatedKernel {
    fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        let WorkerRequest::ComputeSpectrogram(payload) = request;
        let tag = payload.samples_start;
        self.started.send_blocking(tag).ok();
        self.gates[tag].recv_blocking().ok();
        Ok(ComputeOutput {
            window_count: 0,
            options: payload.options,
            columns: Vec::new(),
            input: payload.samples,
        })
    }
}

#[test]
fn two_workers_five_tasks_dispatch_in_submission_order() {
    let (started_tx, started) = async_channel::unbounded();
    let (openers, gates): (Vec<Sender<()>>, Vec<Receiver<()>>) =
        (0..5).map(|_| async_channel::bounded(1)).unzip();
    let gates = Arc::new(gates);
    let dispatcher = Dispatcher::with_kernels((0..2).map(|_| GatedKernel {
        started: started_tx.clone(),
        gates: Arc::clone(&gates),
    }))
    .unwrap();

    let options = SpectrogramOptions::default();
    let pending: Vec<_> = (0..5)
        .map(|tag| dispatcher.submit(SampleChunk::new(Vec::new(), tag, 0, 48_000.0, false), options))
        .collect();

    let mut first = vec![
        started.recv_blocking().unwrap(),
        started.recv_blocking().unwrap(),
    ];
    first.sort_unstable();
    assert_eq!(first, vec![0, 1]);
    assert_eq!(dispatcher.busy_count(), 2);
    assert_eq!(dispatcher.queued_count(), 3);

    for tag in 0..5 {
        openers[tag].send_blocking(()).unwrap();
        if tag + 2 < 5 {
            assert_eq!(started.recv_blocking().unwrap(), tag + 2);
        }
    }

    let sequences: Vec<u64> = pending.iter().map(|p| p.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    for p in pending {
        assert!(p.wait().is_ok());
    }
    assert_eq!(dispatcher.busy_count(), 0);
}

#[test]
fn playback_and_live_capture_agree_and_scroll_together() {
    let rate = 16_000.0;
    let options = SpectrogramOptions {
        window_size: 1024,
        window_step_size: 256,
        sample_rate: rate,
        ..SpectrogramOptions::default()
    };
    let geometry = PaneGeometry {
        canvas_width: 200.0,
        buffer_width_multiplier: 1,
        zoom: 1.0,
        ..PaneGeometry::default()
    };
    let dispatcher = Dispatcher::initialize(4, &options).unwrap();
    let clip = sine(440.0, rate, 8_000);
    let expected = compute_spectrogram(&clip, 0, clip.len(), options).unwrap();

    let reference =
        SpectrogramPane::new("reference", geometry, options, RecordingRenderer::new()).unwrap();
    let practice =
        SpectrogramPane::new("practice", geometry, options, RecordingRenderer::new()).unwrap();
    let mut panes = LinkedPanes::new(reference, practice);

    let mut playback = FilePlayback::new(clip.clone(), rate, &options).unwrap();
    let t0 = Instant::now();
    let mut now = t0;
    playback
        .start(panes.pane_mut(PaneRole::Primary), now)
        .unwrap();
    while playback.state().is_running() {
        playback
            .tick(now, panes.pane_mut(PaneRole::Primary), &dispatcher)
            .unwrap();
        match playback.next_deadline() {
            Some(due) => now = due,
            None => std::thread::yield_now(),
        }
    }
    assert_eq!(playback.state(), CaptureState::Finished);

    let mut mic = MicrophoneAdapter::new(&options, rate).unwrap();
    mic.start(panes.pane_mut(PaneRole::Secondary));
    for block in clip.chunks(333) {
        mic.push_samples(block);
        loop {
            mic.pump(panes.pane_mut(PaneRole::Secondary), &dispatcher)
                .unwrap();
            if !mic.is_awaiting_analysis() {
                break;
            }
            std::thread::yield_now();
        }
    }
    mic.stop(panes.pane_mut(PaneRole::Secondary));
    panes.frame();

    for role in [PaneRole::Primary, PaneRole::Secondary] {
        let pane = panes.pane(role);
        assert_eq!(pane.buffer().len(), expected.window_count, "{role:?}");
        assert_eq!(pane.buffer().linearize().to_vec(), expected.columns, "{role:?}");
        assert_eq!(pane.renderer().texture, expected.columns, "{role:?}");
    }

    // 440 Hz sits in bin 440 / (16000 / 1024) ~= 28.
    let last = panes
        .pane(PaneRole::Primary)
        .buffer()
        .linearize()
        .iter_columns()
        .last()
        .and_then(|column| {
            column
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(bin, _)| bin)
        });
    assert_eq!(last, Some(28));

    let applied = panes.handle_gesture(
        PaneRole::Primary,
        &Gesture::Wheel {
            delta_x: 0.0,
            delta_y: 20.0,
        },
    );
    assert!(applied > 0.0);
    let primary = panes.pane(PaneRole::Primary).viewport().offset();
    let secondary = panes.pane(PaneRole::Secondary).viewport().offset();
    assert!((primary - secondary).abs() < 1.0e-6);
    assert!(!panes.pane(PaneRole::Secondary).viewport().auto_scroll());
}

#[test]
fn invalid_chunks_surface_through_the_pool() {
    let options = SpectrogramOptions {
        window_size: 512,
        window_step_size: 128,
        sample_rate: 8_000.0,
        ..SpectrogramOptions::default()
    };
    let dispatcher = Dispatcher::initialize(1, &options).unwrap();
    let short = SampleChunk::whole(vec![0.0; 100], 8_000.0, true);
    let err = dispatcher.submit(short, options).wait().unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));

    let ok = SampleChunk::whole(vec![0.0; 512], 8_000.0, false);
    assert_eq!(dispatcher.submit(ok, options).wait().unwrap().window_count, 1);
}
