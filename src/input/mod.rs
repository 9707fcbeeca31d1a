/// 视频输入系统 (Video Input System)
///
/// - Frame / VideoInfo: 解码帧与视频元数据
/// - FrameSource: 惰性, 单次遍历的帧序列
/// - VideoFrames: FFmpeg 文件解码 (解码线程 + 无缓冲通道)
/// - MemoryFrames: 内存帧序列
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;

#[cfg(feature = "ffmpeg")]
pub use decode_filter::RgbFrameFilter;
#[cfg(feature = "ffmpeg")]
pub use decoder::VideoFrames;

use image::RgbImage;

use crate::error::{Error, Result};

/// 一帧解码后的图像 (RGB8) 及其在视频中的序号
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// (宽, 高)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 视频元数据, 打开源时生成一次, 之后不再修改
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
        Self {
            width,
            height,
            fps,
            total_frames,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// 帧源: 按播放顺序逐帧产出, 最多 `info().total_frames` 帧
///
/// 序列只能遍历一次, 重新处理需要重新打开源。
pub trait FrameSource: Iterator<Item = Frame> {
    fn info(&self) -> &VideoInfo;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn info(&self) -> &VideoInfo {
        (**self).info()
    }
}

/// 内存中的帧序列
pub struct MemoryFrames {
    info: VideoInfo,
    images: std::vec::IntoIter<RgbImage>,
    next_index: u64,
}

impl MemoryFrames {
    /// 用给定元数据包装一组图像, 超出 `total_frames` 的图像不会被产出
    pub fn new(info: VideoInfo, images: Vec<RgbImage>) -> Self {
        Self {
            info,
            images: images.into_iter(),
            next_index: 0,
        }
    }

    /// 从图像推导元数据 (分辨率取第一张)
    pub fn from_images(images: Vec<RgbImage>, fps: f64) -> Result<Self> {
        let (width, height) = match images.first() {
            Some(first) => first.dimensions(),
            None => return Err(Error::source_unreadable("<memory>", "no frames")),
        };
        let info = VideoInfo::new(width, height, fps, images.len() as u64);
        Ok(Self::new(info, images))
    }
}

impl Iterator for MemoryFrames {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.next_index >= self.info.total_frames {
            return None;
        }
        let image = self.images.next()?;
        let frame = Frame::new(self.next_index, image);
        self.next_index += 1;
        Some(frame)
    }
}

impl FrameSource for MemoryFrames {
    fn info(&self) -> &VideoInfo {
        &self.info
    }
}
