/// 输出系统 (Output Sink)
///
/// - File:    标注帧按顺序写入视频文件
/// - Display: 标注帧显示在窗口中, 每帧轮询一次退出信号
///
/// 两种模式在启动时选定一次, 运行中不会切换。
#[cfg(feature = "ffmpeg")]
pub mod encoder;

#[cfg(feature = "ffmpeg")]
pub use encoder::FfmpegWriter;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::input::{Frame, VideoInfo};

/// 帧率比较容差
const FPS_TOLERANCE: f64 = 1e-3;

/// 输出端处理一帧之后的流程控制
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// 写入器的输出参数
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl SinkConfig {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }

    /// 检查是否与视频信息完全一致
    pub fn check(&self, info: &VideoInfo) -> Result<()> {
        if (self.width, self.height) != info.resolution() {
            return Err(Error::SinkConfiguration(format!(
                "sink resolution {}x{} does not match video {}x{}",
                self.width, self.height, info.width, info.height
            )));
        }
        if !self.fps.is_finite() || (self.fps - info.fps).abs() > FPS_TOLERANCE {
            return Err(Error::SinkConfiguration(format!(
                "sink frame rate {} does not match video {}",
                self.fps, info.fps
            )));
        }
        Ok(())
    }
}

impl From<&VideoInfo> for SinkConfig {
    fn from(info: &VideoInfo) -> Self {
        Self::new(info.width, info.height, info.fps)
    }
}

/// 视频写入器 (容器与编码细节由实现负责)
pub trait FrameWriter {
    fn config(&self) -> &SinkConfig;

    /// 追加一帧
    fn write(&mut self, frame: &Frame) -> anyhow::Result<()>;

    /// 结束写入并完成容器
    fn finish(&mut self) -> anyhow::Result<()>;
}

impl<W: FrameWriter + ?Sized> FrameWriter for Box<W> {
    fn config(&self) -> &SinkConfig {
        (**self).config()
    }

    fn write(&mut self, frame: &Frame) -> anyhow::Result<()> {
        (**self).write(frame)
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        (**self).finish()
    }
}

/// 文件输出: 持有写入器, 在 `finish` 或 drop 时完成容器
pub struct VideoSink {
    writer: Box<dyn FrameWriter>,
    written: u64,
    finished: bool,
}

impl VideoSink {
    /// 绑定写入器; 写入器参数必须与视频信息完全一致
    pub fn open(writer: Box<dyn FrameWriter>, info: &VideoInfo) -> Result<Self> {
        writer.config().check(info)?;
        Ok(Self {
            writer,
            written: 0,
            finished: false,
        })
    }

    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.finished {
            return Err(Error::SinkWrite {
                frame: frame.index,
                reason: "sink already finished".to_string(),
            });
        }

        let config = self.writer.config();
        let (width, height) = frame.dimensions();
        if (width, height) != (config.width, config.height) {
            return Err(Error::SinkWrite {
                frame: frame.index,
                reason: format!(
                    "frame size {}x{} differs from sink {}x{}",
                    width, height, config.width, config.height
                ),
            });
        }

        self.writer.write(frame).map_err(|e| Error::SinkWrite {
            frame: frame.index,
            reason: format!("{:#}", e),
        })?;
        self.written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    /// 完成容器, 重复调用无效果
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.finish().map_err(|e| Error::SinkWrite {
            frame: self.written,
            reason: format!("finalize failed: {:#}", e),
        })?;
        info!("💾 输出完成: {}帧", self.written);
        Ok(())
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            debug!("输出未正常结束, 完成容器 ({}帧)", self.written);
            if let Err(e) = self.writer.finish() {
                warn!("完成输出文件失败: {:#}", e);
            }
        }
    }
}

/// 交互显示表面
pub trait DisplaySurface {
    /// 显示一帧并轮询一次退出信号 (非阻塞)
    fn present(&mut self, frame: &Frame) -> Result<Flow>;

    /// 释放显示资源
    fn close(&mut self);
}

impl<D: DisplaySurface + ?Sized> DisplaySurface for Box<D> {
    fn present(&mut self, frame: &Frame) -> Result<Flow> {
        (**self).present(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// 实时显示输出, drop 时关闭显示表面
pub struct DisplaySink {
    surface: Box<dyn DisplaySurface>,
    shown: u64,
    closed: bool,
}

impl DisplaySink {
    pub fn new(surface: Box<dyn DisplaySurface>) -> Self {
        Self {
            surface,
            shown: 0,
            closed: false,
        }
    }

    pub fn present(&mut self, frame: &Frame) -> Result<Flow> {
        if self.closed {
            return Ok(Flow::Stop);
        }
        let flow = self.surface.present(frame)?;
        self.shown += 1;
        if flow == Flow::Stop {
            info!("⏹ 用户在第{}帧退出", frame.index + 1);
            self.close();
        }
        Ok(flow)
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.surface.close();
        }
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        self.close();
    }
}

/// 输出端: 文件或窗口, 二选一
pub enum OutputSink {
    File(VideoSink),
    Display(DisplaySink),
}

impl OutputSink {
    /// 文件输出 (写入器参数不匹配时在写入任何帧之前失败)
    pub fn file(writer: Box<dyn FrameWriter>, info: &VideoInfo) -> Result<Self> {
        VideoSink::open(writer, info).map(OutputSink::File)
    }

    pub fn display(surface: Box<dyn DisplaySurface>) -> Self {
        OutputSink::Display(DisplaySink::new(surface))
    }

    /// 消费一帧标注结果
    pub fn consume(&mut self, frame: &Frame) -> Result<Flow> {
        match self {
            OutputSink::File(sink) => sink.write(frame).map(|_| Flow::Continue),
            OutputSink::Display(sink) => sink.present(frame),
        }
    }

    /// 正常结束: 完成文件或关闭窗口
    pub fn finish(&mut self) -> Result<()> {
        match self {
            OutputSink::File(sink) => sink.finish(),
            OutputSink::Display(sink) => {
                sink.close();
                Ok(())
            }
        }
    }

    pub fn frames_consumed(&self) -> u64 {
        match self {
            OutputSink::File(sink) => sink.frames_written(),
            OutputSink::Display(sink) => sink.frames_shown(),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            OutputSink::File(_) => "file",
            OutputSink::Display(_) => "display",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        written: Vec<u64>,
        finished: u32,
        closed: u32,
    }

    struct MockWriter {
        config: SinkConfig,
        log: Rc<RefCell<Log>>,
    }

    impl FrameWriter for MockWriter {
        fn config(&self) -> &SinkConfig {
            &self.config
        }

        fn write(&mut self, frame: &Frame) -> anyhow::Result<()> {
            self.log.borrow_mut().written.push(frame.index);
            Ok(())
        }

        fn finish(&mut self) -> anyhow::Result<()> {
            self.log.borrow_mut().finished += 1;
            Ok(())
        }
    }

    struct MockSurface {
        quit_at: u64,
        log: Rc<RefCell<Log>>,
    }

    impl DisplaySurface for MockSurface {
        fn present(&mut self, frame: &Frame) -> Result<Flow> {
            Ok(if frame.index + 1 >= self.quit_at {
                Flow::Stop
            } else {
                Flow::Continue
            })
        }

        fn close(&mut self) {
            self.log.borrow_mut().closed += 1;
        }
    }

    fn info() -> VideoInfo {
        VideoInfo::new(8, 6, 30.0, 10)
    }

    fn writer(width: u32, height: u32, fps: f64, log: &Rc<RefCell<Log>>) -> Box<MockWriter> {
        Box::new(MockWriter {
            config: SinkConfig::new(width, height, fps),
            log: log.clone(),
        })
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, RgbImage::new(8, 6))
    }

    #[test]
    fn mismatched_resolution_is_rejected() {
        let log = Rc::new(RefCell::new(Log::default()));
        let err = VideoSink::open(writer(16, 6, 30.0, &log), &info()).err().unwrap();
        assert!(matches!(err, Error::SinkConfiguration(_)));
    }

    #[test]
    fn mismatched_frame_rate_is_rejected() {
        let log = Rc::new(RefCell::new(Log::default()));
        let err = VideoSink::open(writer(8, 6, 25.0, &log), &info()).err().unwrap();
        assert!(matches!(err, Error::SinkConfiguration(_)));
    }

    #[test]
    fn sink_finalizes_once() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut sink = VideoSink::open(writer(8, 6, 30.0, &log), &info()).unwrap();
        sink.write(&frame(0)).unwrap();
        sink.write(&frame(1)).unwrap();
        sink.finish().unwrap();
        sink.finish().unwrap();
        drop(sink);
        assert_eq!(log.borrow().written, vec![0, 1]);
        assert_eq!(log.borrow().finished, 1);
    }

    #[test]
    fn dropped_sink_is_finalized() {
        let log = Rc::new(RefCell::new(Log::default()));
        {
            let mut sink = VideoSink::open(writer(8, 6, 30.0, &log), &info()).unwrap();
            sink.write(&frame(0)).unwrap();
        }
        assert_eq!(log.borrow().finished, 1);
    }

    #[test]
    fn wrong_frame_size_is_a_write_error() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut sink = VideoSink::open(writer(8, 6, 30.0, &log), &info()).unwrap();
        let err = sink.write(&Frame::new(3, RgbImage::new(4, 4))).err().unwrap();
        assert!(matches!(err, Error::SinkWrite { frame: 3, .. }));
        assert!(log.borrow().written.is_empty());
    }

    #[test]
    fn display_stops_and_closes_on_quit() {
        let log = Rc::new(RefCell::new(Log::default()));
        let surface = MockSurface {
            quit_at: 2,
            log: log.clone(),
        };
        let mut sink = OutputSink::Display(DisplaySink::new(Box::new(surface)));
        assert_eq!(sink.consume(&frame(0)).unwrap(), Flow::Continue);
        assert_eq!(sink.consume(&frame(1)).unwrap(), Flow::Stop);
        assert_eq!(log.borrow().closed, 1);
        sink.finish().unwrap();
        drop(sink);
        assert_eq!(log.borrow().closed, 1);
    }

    #[test]
    fn file_sink_always_continues() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut sink = OutputSink::File(VideoSink::open(writer(8, 6, 30.0, &log), &info()).unwrap());
        for i in 0..3 {
            assert_eq!(sink.consume(&frame(i)).unwrap(), Flow::Continue);
        }
        assert_eq!(sink.frames_consumed(), 3);
        assert_eq!(sink.mode(), "file");
    }
}
