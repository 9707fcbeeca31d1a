//! 交通视频分析 - YOLOv8 检测 + ByteTrack 追踪 + 标注输出
//!
//! 文件模式: cargo run --bin traffic-analysis --release -- \
//!     --source-weights-path yolov8x.onnx --source-video-path in.mp4 --target-video-path out.mp4
//! 窗口模式: 不指定 --target-video-path, 按 Q / Esc 提前退出
use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use mimalloc::MiMalloc;

use yolov8_track::input::VideoFrames;
use yolov8_track::output::FfmpegWriter;
use yolov8_track::renderer::{window_conf, MacroquadWindow};
use yolov8_track::{
    Args, BoxAnnotator, ByteTracker, Detector, Error, Flow, FrameSource, OrtConfig, OrtEP,
    OutputSink, Pipeline, RunSummary, SinkConfig, TrackerConfig, VideoInfo, YOLOv8,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(summary) => {
            info!(
                "🏁 完成: {}帧{}",
                summary.frames_processed,
                if summary.stopped_early { " (用户退出)" } else { "" }
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.downcast_ref::<Error>().is_some_and(Error::is_setup_error) {
                error!("❌ 启动失败, 未处理任何帧");
            }
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<RunSummary> {
    let thresholds = args.thresholds()?;

    // 1. 视频源 (无法打开时在处理任何帧之前失败)
    let source = VideoFrames::open(&args.source_video_path)?;
    let info = source.info().clone();

    // 2. 模型
    let ep = if args.cuda {
        OrtEP::CUDA(args.device_id)
    } else {
        OrtEP::CPU
    };
    let model = YOLOv8::new(OrtConfig::new(&args.source_weights_path, ep)).map_err(|source| {
        Error::ModelLoad {
            path: args.source_weights_path.clone(),
            source,
        }
    })?;
    let detector = Detector::new(Box::new(model));

    // 3. 追踪器
    let tracker_config = match &args.tracker_config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    let tracker = ByteTracker::new(tracker_config.bytetrack(info.fps));
    info!("🎯 追踪参数: {:?}", tracker.config());

    let annotator = BoxAnnotator::load(args.font.as_deref())?;

    // 4. 输出: 指定输出路径 → 文件, 否则 → 窗口
    match &args.target_video_path {
        Some(target) => {
            let writer = FfmpegWriter::create(target, SinkConfig::from(&info))
                .with_context(|| format!("cannot create {}", target.display()))?;
            let sink = OutputSink::file(Box::new(writer), &info)?;
            let pipeline = Pipeline::new(
                Box::new(source),
                detector,
                Box::new(tracker),
                annotator,
                sink,
                thresholds,
            )
            .with_progress(!args.no_progress);
            Ok(pipeline.run()?)
        }
        None => {
            let sink = OutputSink::display(Box::new(MacroquadWindow::new(&info)));
            let pipeline = Pipeline::new(
                Box::new(source),
                detector,
                Box::new(tracker),
                annotator,
                sink,
                thresholds,
            );
            Ok(run_window(pipeline, &info)?)
        }
    }
}

/// macroquad 事件循环: 每帧处理一次流水线, 然后提交画面
fn run_window(mut pipeline: Pipeline, info: &VideoInfo) -> yolov8_track::Result<RunSummary> {
    let slot: Rc<RefCell<Option<yolov8_track::Result<RunSummary>>>> = Rc::new(RefCell::new(None));
    let progress = Rc::new(RefCell::new(RunSummary::default()));
    let (result, latest) = (slot.clone(), progress.clone());

    macroquad::Window::from_config(window_conf(info), async move {
        pipeline.announce();
        let outcome = loop {
            match pipeline.step() {
                Ok(Flow::Continue) => {
                    *latest.borrow_mut() = pipeline.summary();
                    macroquad::window::next_frame().await
                }
                Ok(Flow::Stop) => break pipeline.finish(),
                Err(e) => break Err(e),
            }
        };
        *result.borrow_mut() = Some(outcome);
    });

    let outcome = slot.borrow_mut().take();
    outcome.unwrap_or_else(|| {
        warn!("窗口被关闭");
        Ok(RunSummary {
            stopped_early: true,
            ..*progress.borrow()
        })
    })
}
