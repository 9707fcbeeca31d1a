/// 视频文件解码器
/// Video file decoder: lazy, single-pass, bounded memory
use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use ez_ffmpeg::container_info::get_duration_us;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::core::scheduler::ffmpeg_scheduler::{FfmpegScheduler, Running};
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use image::RgbImage;
use log::{debug, info, warn};

use super::decode_filter::{frame_channel, RgbFrameFilter, RGB24_FILTER};
use super::{Frame, FrameSource, VideoInfo};
use crate::error::{Error, Result};

/// 视频文件帧源
///
/// FFmpeg 调度器在自己的线程中解码, 每帧经过无缓冲通道交给流水线:
/// 第 N+1 帧只在流水线处理完第 N 帧并调用 `next` 时才交出。
pub struct VideoFrames {
    path: PathBuf,
    info: VideoInfo,
    rx: Option<Receiver<RgbImage>>,
    scheduler: Option<FfmpegScheduler<Running>>,
    next_index: u64,
}

impl VideoFrames {
    /// 打开视频文件并启动解码
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let info = probe(path)?;
        info!(
            "📹 视频源: {} ({}x{} @ {:.2}fps, {}帧)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.total_frames
        );

        let url = path.to_string_lossy().to_string();
        let (tx, rx) = frame_channel();

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("rgb", Box::new(RgbFrameFilter::new(tx)));
        let out = create_null_output().add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(Input::from(url))
            .filter_descs([RGB24_FILTER].into())
            .output(out)
            .build()
            .map_err(|e| Error::source_unreadable(path, format!("构建解码器失败: {}", e)))?;

        let scheduler = ctx
            .start()
            .map_err(|e| Error::source_unreadable(path, format!("启动解码器失败: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            rx: Some(rx),
            scheduler: Some(scheduler),
            next_index: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 停止解码: 先关闭通道, 再等待调度器退出
    fn shutdown(&mut self) {
        self.rx.take();
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
            if let Err(e) = scheduler.wait() {
                debug!("解码器退出: {}", e);
            }
        }
    }
}

impl Iterator for VideoFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next_index >= self.info.total_frames {
            self.shutdown();
            return None;
        }

        let image = match self.rx.as_ref()?.recv() {
            Ok(image) => image,
            Err(_) => {
                // 解码线程结束: 流被截断, 提前结束序列
                warn!(
                    "视频流在第{}帧提前结束 (预期{}帧)",
                    self.next_index, self.info.total_frames
                );
                self.shutdown();
                return None;
            }
        };

        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Some(frame)
    }
}

impl FrameSource for VideoFrames {
    fn info(&self) -> &VideoInfo {
        &self.info
    }
}

impl Drop for VideoFrames {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 读取视频流信息
fn probe(path: &Path) -> Result<VideoInfo> {
    if !path.is_file() {
        return Err(Error::source_unreadable(path, "file not found"));
    }
    let url = path.to_string_lossy().to_string();

    let stream = find_video_stream_info(url.clone())
        .map_err(|e| Error::source_unreadable(path, e))?
        .ok_or_else(|| Error::source_unreadable(path, "no video stream"))?;

    let StreamInfo::Video {
        width,
        height,
        fps,
        nb_frames,
        ..
    } = stream
    else {
        return Err(Error::source_unreadable(path, "no video stream"));
    };

    if width <= 0 || height <= 0 {
        return Err(Error::source_unreadable(
            path,
            format!("invalid resolution {}x{}", width, height),
        ));
    }
    if !fps.is_finite() || fps <= 0.0 {
        return Err(Error::source_unreadable(path, format!("invalid frame rate {}", fps)));
    }

    let total_frames = if nb_frames > 0 {
        nb_frames as u64
    } else {
        // 容器没有记录帧数: 用时长估算
        let duration_us = get_duration_us(url).map_err(|e| Error::source_unreadable(path, e))?;
        estimate_frame_count(duration_us, fps)
    };

    if total_frames == 0 {
        return Err(Error::source_unreadable(path, "video has zero frames"));
    }

    Ok(VideoInfo::new(width as u32, height as u32, fps, total_frames))
}

fn estimate_frame_count(duration_us: i64, fps: f64) -> u64 {
    if duration_us <= 0 {
        return 0;
    }
    (duration_us as f64 / 1_000_000.0 * fps).round() as u64
}
