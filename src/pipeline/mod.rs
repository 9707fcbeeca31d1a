/// 视频处理流水线 (Video Processing Pipeline)
///
/// 单线程, 逐帧严格顺序执行:
/// 帧源 → 检测 → 追踪 → 标注 → 输出
///
/// 第 N+1 帧在第 N 帧写入/显示完成之后才会读取。
/// 跨帧状态只存在于追踪器中, 所有组件由 `Pipeline` 显式持有。
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::annotator::BoxAnnotator;
use crate::detection::{Detector, Tracker};
use crate::error::{Error, Result};
use crate::input::{FrameSource, VideoInfo};
use crate::output::{Flow, OutputSink};

/// 检测阈值
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

impl Thresholds {
    pub fn new(confidence: f32, iou: f32) -> Result<Self> {
        for (name, value) in [("confidence", confidence), ("iou", iou)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidArgument(format!(
                    "{} threshold must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(Self { confidence, iou })
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            confidence: 0.3,
            iou: 0.7,
        }
    }
}

/// 一次运行的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 已完整处理 (写入或显示) 的帧数
    pub frames_processed: u64,
    /// 用户在显示模式中提前退出
    pub stopped_early: bool,
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Detector,
    tracker: Box<dyn Tracker>,
    annotator: BoxAnnotator,
    /// 出错时立即释放 (None)
    sink: Option<OutputSink>,
    thresholds: Thresholds,
    progress: ProgressBar,

    summary: RunSummary,
    done: bool,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Detector,
        tracker: Box<dyn Tracker>,
        annotator: BoxAnnotator,
        sink: OutputSink,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            source,
            detector,
            tracker,
            annotator,
            sink: Some(sink),
            thresholds,
            progress: ProgressBar::hidden(),
            summary: RunSummary::default(),
            done: false,
        }
    }

    /// 显示按总帧数计算的进度条
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = if enabled {
            progress_bar(self.source.info().total_frames)
        } else {
            ProgressBar::hidden()
        };
        self
    }

    pub fn info(&self) -> &VideoInfo {
        self.source.info()
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// 处理一帧
    ///
    /// 返回 `Flow::Stop` 表示帧源结束或输出端要求停止。
    /// 出错时输出端先被释放 (文件完成/窗口关闭), 再返回错误。
    pub fn step(&mut self) -> Result<Flow> {
        if self.done {
            return Ok(Flow::Stop);
        }

        let flow = match self.process_next() {
            Ok(flow) => flow,
            Err(e) => {
                self.done = true;
                self.progress.abandon();
                self.sink.take();
                return Err(e);
            }
        };

        if flow == Flow::Stop {
            self.done = true;
        }
        Ok(flow)
    }

    fn process_next(&mut self) -> Result<Flow> {
        let Some(frame) = self.source.next() else {
            return Ok(Flow::Stop);
        };

        let detections =
            self.detector
                .detect(&frame, self.thresholds.confidence, self.thresholds.iou)?;
        let detected = detections.len();
        let tracked = self.tracker.update(detections);
        let annotated = self.annotator.annotate(&frame, &tracked);

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::SinkWrite {
                frame: frame.index,
                reason: "sink already released".to_string(),
            })?;
        let flow = sink.consume(&annotated)?;

        self.summary.frames_processed += 1;
        self.progress.inc(1);
        debug!(
            "帧{}: 检测{}个 ({:.1}ms), 追踪输出{}个, 存活轨迹{}条",
            frame.index,
            detected,
            self.detector.last_inference_ms(),
            tracked.len(),
            self.tracker.track_count()
        );

        if flow == Flow::Stop {
            self.summary.stopped_early = true;
        }
        Ok(flow)
    }

    /// 正常结束: 完成输出并返回统计
    ///
    /// 剩余的轨迹直接丢弃, 不会产生额外输出。
    pub fn finish(&mut self) -> Result<RunSummary> {
        self.done = true;
        if let Some(mut sink) = self.sink.take() {
            sink.finish()?;
        }
        self.progress.finish_and_clear();
        info!(
            "✅ 处理完成: {}帧 (推理{}次){}",
            self.summary.frames_processed,
            self.detector.frames_processed(),
            if self.summary.stopped_early {
                " (提前退出)"
            } else {
                ""
            }
        );
        Ok(self.summary)
    }

    /// 打印视频与模型信息
    pub fn announce(&self) {
        let info = self.info();
        info!(
            "▶ 开始处理: {}x{} @ {:.2}fps, {}帧, 输出: {}",
            info.width,
            info.height,
            info.fps,
            info.total_frames,
            self.sink.as_ref().map(|s| s.mode()).unwrap_or("released")
        );
        self.detector.summary();
    }

    /// 逐帧处理直到帧源结束或输出端停止
    pub fn run(mut self) -> Result<RunSummary> {
        self.announce();
        while self.step()? == Flow::Continue {}
        self.finish()
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {per_sec} ETA {eta}")
    {
        pb.set_style(style.progress_chars("█░-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BBox, ByteTracker};
    use crate::input::MemoryFrames;
    use crate::models::{Model, RawDetection};
    use crate::output::{FrameWriter, SinkConfig};
    use image::RgbImage;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct OneBox;

    impl Model for OneBox {
        fn infer(&mut self, _: &RgbImage, _: f32, _: f32) -> anyhow::Result<Vec<RawDetection>> {
            Ok(vec![RawDetection::new(BBox::new(2.0, 2.0, 10.0, 10.0), 0.9, 3)])
        }
    }

    /// 第 n 帧 (从0计) 推理失败
    struct FailsAt {
        n: u64,
        calls: u64,
    }

    impl Model for FailsAt {
        fn infer(&mut self, _: &RgbImage, _: f32, _: f32) -> anyhow::Result<Vec<RawDetection>> {
            let call = self.calls;
            self.calls += 1;
            if call == self.n {
                anyhow::bail!("model crashed");
            }
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Written {
        frames: Vec<u64>,
        finished: bool,
    }

    struct Recorder {
        config: SinkConfig,
        out: Rc<RefCell<Written>>,
    }

    impl FrameWriter for Recorder {
        fn config(&self) -> &SinkConfig {
            &self.config
        }

        fn write(&mut self, frame: &crate::input::Frame) -> anyhow::Result<()> {
            self.out.borrow_mut().frames.push(frame.index);
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.out.borrow_mut().finished = true;
            Ok(())
        }
    }

    fn pipeline(model: Box<dyn Model>, frames: usize, out: &Rc<RefCell<Written>>) -> Pipeline {
        let images = (0..frames).map(|_| RgbImage::new(32, 24)).collect();
        let source = MemoryFrames::from_images(images, 30.0).unwrap();
        let writer = Recorder {
            config: SinkConfig::from(source.info()),
            out: out.clone(),
        };
        let sink = OutputSink::file(Box::new(writer), source.info()).unwrap();
        Pipeline::new(
            Box::new(source),
            Detector::new(model),
            Box::new(ByteTracker::default()),
            BoxAnnotator::default(),
            sink,
            Thresholds::default(),
        )
    }

    #[test]
    fn thresholds_are_validated() {
        assert!(Thresholds::new(0.0, 1.0).is_ok());
        assert!(Thresholds::new(1.1, 0.5).is_err());
        assert!(Thresholds::new(0.5, f32::NAN).is_err());
    }

    #[test]
    fn runs_every_frame_in_order() {
        let out = Rc::new(RefCell::new(Written::default()));
        let summary = pipeline(Box::new(OneBox), 5, &out).run().unwrap();
        assert_eq!(
            summary,
            RunSummary {
                frames_processed: 5,
                stopped_early: false
            }
        );
        assert_eq!(out.borrow().frames, vec![0, 1, 2, 3, 4]);
        assert!(out.borrow().finished);
    }

    #[test]
    fn detection_failure_aborts_and_releases_sink() {
        let out = Rc::new(RefCell::new(Written::default()));
        let model = FailsAt { n: 2, calls: 0 };
        let err = pipeline(Box::new(model), 5, &out).run().err().unwrap();
        assert!(matches!(err, Error::DetectionFailure { frame: 2, .. }));
        assert_eq!(out.borrow().frames, vec![0, 1]);
        assert!(out.borrow().finished);
    }

    #[test]
    fn step_after_end_keeps_stopping() {
        let out = Rc::new(RefCell::new(Written::default()));
        let mut p = pipeline(Box::new(OneBox), 1, &out);
        assert_eq!(p.step().unwrap(), Flow::Continue);
        assert_eq!(p.step().unwrap(), Flow::Stop);
        assert!(p.is_done());
        assert_eq!(p.step().unwrap(), Flow::Stop);
        assert_eq!(p.finish().unwrap().frames_processed, 1);
    }
}
