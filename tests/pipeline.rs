use std::cell::RefCell;
use std::rc::Rc;

use image::{Rgb, RgbImage};
use yolov8_track::detection::tracker::id_to_color;
use yolov8_track::{
    BBox, BoxAnnotator, ByteTracker, DetectionSet, Detector, DisplaySurface, Error, Flow, Frame,
    FrameSource, FrameWriter, MemoryFrames, Model, OutputSink, Pipeline, RawDetection, RunSummary,
    SinkConfig, Thresholds, Tracker,
};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 72;
const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

/// 每帧在同一位置报告一个目标
struct FixedBox {
    confidence: f32,
    calls: Rc<RefCell<u64>>,
}

impl Model for FixedBox {
    fn infer(&mut self, _: &RgbImage, conf: f32, _: f32) -> anyhow::Result<Vec<RawDetection>> {
        *self.calls.borrow_mut() += 1;
        if self.confidence < conf {
            return Ok(Vec::new());
        }
        Ok(vec![RawDetection::new(
            BBox::new(20.0, 20.0, 60.0, 60.0),
            self.confidence,
            2,
        )])
    }
}

/// 记录每帧追踪输出的标签
struct LabelRecorder {
    inner: ByteTracker,
    labels: Rc<RefCell<Vec<Vec<String>>>>,
}

impl Tracker for LabelRecorder {
    fn update(&mut self, detections: DetectionSet) -> DetectionSet {
        let tracked = self.inner.update(detections);
        self.labels.borrow_mut().push(tracked.labels());
        tracked
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn track_count(&self) -> usize {
        self.inner.track_count()
    }
}

struct MemoryWriter {
    config: SinkConfig,
    frames: Rc<RefCell<Vec<Frame>>>,
    finished: Rc<RefCell<bool>>,
}

impl FrameWriter for MemoryWriter {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn write(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.frames.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        *self.finished.borrow_mut() = true;
        Ok(())
    }
}

/// 在指定帧之后模拟用户按下退出键
struct QuitAfter {
    last_index: u64,
    shown: Rc<RefCell<Vec<u64>>>,
    closed: Rc<RefCell<bool>>,
}

impl DisplaySurface for QuitAfter {
    fn present(&mut self, frame: &Frame) -> yolov8_track::Result<Flow> {
        self.shown.borrow_mut().push(frame.index);
        if frame.index >= self.last_index {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn close(&mut self) {
        *self.closed.borrow_mut() = true;
    }
}

#[derive(Default)]
struct Harness {
    calls: Rc<RefCell<u64>>,
    labels: Rc<RefCell<Vec<Vec<String>>>>,
}

impl Harness {
    fn source(frames: usize) -> MemoryFrames {
        let images = (0..frames)
            .map(|_| RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND))
            .collect();
        MemoryFrames::from_images(images, 25.0).unwrap()
    }

    fn pipeline(&self, source: MemoryFrames, confidence: f32, sink: OutputSink) -> Pipeline {
        let model = FixedBox {
            confidence,
            calls: self.calls.clone(),
        };
        let tracker = LabelRecorder {
            inner: ByteTracker::default(),
            labels: self.labels.clone(),
        };
        Pipeline::new(
            Box::new(source),
            Detector::new(Box::new(model)),
            Box::new(tracker),
            BoxAnnotator::default(),
            sink,
            Thresholds::default(),
        )
    }
}

fn memory_writer(
    config: SinkConfig,
) -> (MemoryWriter, Rc<RefCell<Vec<Frame>>>, Rc<RefCell<bool>>) {
    let frames = Rc::new(RefCell::new(Vec::new()));
    let finished = Rc::new(RefCell::new(false));
    let writer = MemoryWriter {
        config,
        frames: frames.clone(),
        finished: finished.clone(),
    };
    (writer, frames, finished)
}

#[test]
fn stationary_object_keeps_first_id_in_every_frame() {
    let harness = Harness::default();
    let source = Harness::source(10);
    let (writer, frames, finished) = memory_writer(SinkConfig::from(source.info()));
    let sink = OutputSink::file(Box::new(writer), source.info()).unwrap();

    let summary = harness.pipeline(source, 0.9, sink).run().unwrap();

    assert_eq!(
        summary,
        RunSummary {
            frames_processed: 10,
            stopped_early: false
        }
    );
    assert!(*finished.borrow());

    let labels = harness.labels.borrow();
    assert_eq!(labels.len(), 10);
    assert!(labels.iter().all(|l| l == &vec!["#1".to_string()]));

    let (r, g, b) = id_to_color(1);
    let frames = frames.borrow();
    assert_eq!(frames.len(), 10);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.index, i as u64);
        assert_eq!(*frame.image.get_pixel(20, 20), Rgb([r, g, b]));
        assert_eq!(*frame.image.get_pixel(40, 40), BACKGROUND);
    }
}

#[test]
fn low_confidence_detections_leave_frames_unannotated() {
    let harness = Harness::default();
    let source = Harness::source(10);
    let (writer, frames, _) = memory_writer(SinkConfig::from(source.info()));
    let sink = OutputSink::file(Box::new(writer), source.info()).unwrap();

    let summary = harness.pipeline(source, 0.1, sink).run().unwrap();

    assert_eq!(summary.frames_processed, 10);
    assert!(harness.labels.borrow().iter().all(|l| l.is_empty()));
    let frames = frames.borrow();
    assert_eq!(frames.len(), 10);
    assert!(frames
        .iter()
        .all(|f| f.image.pixels().all(|p| *p == BACKGROUND)));
}

#[test]
fn display_quit_stops_without_reading_further_frames() {
    let harness = Harness::default();
    let shown = Rc::new(RefCell::new(Vec::new()));
    let closed = Rc::new(RefCell::new(false));
    let surface = QuitAfter {
        last_index: 2,
        shown: shown.clone(),
        closed: closed.clone(),
    };
    let sink = OutputSink::display(Box::new(surface));

    let summary = harness
        .pipeline(Harness::source(10), 0.9, sink)
        .run()
        .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            frames_processed: 3,
            stopped_early: true
        }
    );
    assert_eq!(*shown.borrow(), vec![0, 1, 2]);
    assert_eq!(*harness.calls.borrow(), 3);
    assert!(*closed.borrow());
}

#[test]
fn mismatched_writer_is_rejected_before_any_frame() {
    let harness = Harness::default();
    let source = Harness::source(10);
    let (writer, frames, _) = memory_writer(SinkConfig::new(WIDTH * 2, HEIGHT, 25.0));

    let err = OutputSink::file(Box::new(writer), source.info()).err().unwrap();

    assert!(matches!(err, Error::SinkConfiguration(_)));
    assert!(frames.borrow().is_empty());
    assert_eq!(*harness.calls.borrow(), 0);
}

#[test]
fn frame_rate_mismatch_is_a_configuration_error() {
    let source = Harness::source(1);
    let (writer, _, _) = memory_writer(SinkConfig::new(WIDTH, HEIGHT, 30.0));
    assert!(matches!(
        OutputSink::file(Box::new(writer), source.info()),
        Err(Error::SinkConfiguration(_))
    ));
}
