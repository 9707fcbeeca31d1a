/// FFmpeg解码过滤器: 视频帧 → RGB8 图像
/// FFmpeg decode filter module
use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use image::RgbImage;
use log::{debug, warn};

/// 过滤器链之前需要把像素格式转换为 rgb24
pub const RGB24_FILTER: &str = "format=rgb24";

/// 解码线程与流水线之间的交接通道
///
/// 容量为0: 每次 `send` 都要等到对应的 `recv`。
pub fn frame_channel() -> (Sender<RgbImage>, Receiver<RgbImage>) {
    bounded(0)
}

/// 把每个解码帧拷贝为紧凑的 RGB 图像并送入通道
///
/// 通道没有缓冲 (见 [`frame_channel`]): 流水线请求下一帧之前, 解码线程
/// 阻塞在 `send` 上, 不会有已转换的帧排队等待。
/// 接收端被丢弃后返回错误, FFmpeg 调度器随之停止解码。
#[derive(Clone)]
pub struct RgbFrameFilter {
    tx: Sender<RgbImage>,
    pub decoded: u64,
    pub dropped: u64,
}

impl RgbFrameFilter {
    pub fn new(tx: Sender<RgbImage>) -> Self {
        Self {
            tx,
            decoded: 0,
            dropped: 0,
        }
    }
}

impl FrameFilter for RgbFrameFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        let image = unsafe {
            if frame.as_ptr().is_null() {
                self.dropped += 1;
                warn!("丢弃空帧 (已解码{}帧)", self.decoded);
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as usize;
            let h = (*frame.as_ptr()).height as usize;
            let data = (*frame.as_ptr()).data[0];
            let stride = (*frame.as_ptr()).linesize[0];

            if w == 0 || h == 0 || data.is_null() || stride < 0 || (stride as usize) < w * 3 {
                self.dropped += 1;
                warn!("丢弃非法帧 {}x{} stride={}", w, h, stride);
                return Ok(None);
            }

            copy_rgb24(data, stride as usize, w, h)
        };

        let Some(image) = image else {
            return Err("invalid frame size".to_string());
        };

        self.decoded += 1;
        if self.tx.send(image).is_err() {
            // 流水线已结束 (正常退出或提前停止)
            return Err("frame receiver closed".to_string());
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(
            "解码线程退出: 解码{}帧, 丢弃{}帧",
            self.decoded, self.dropped
        );
    }
}

/// 按行拷贝去掉 linesize 填充
///
/// # Safety
/// `data` 必须指向至少 `stride * height` 字节的有效内存
unsafe fn copy_rgb24(data: *const u8, stride: usize, width: usize, height: usize) -> Option<RgbImage> {
    let row_bytes = width * 3;
    let mut buffer = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let src = std::slice::from_raw_parts(data.add(row * stride), row_bytes);
        buffer.extend_from_slice(src);
    }
    RgbImage::from_raw(width as u32, height as u32, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_not_handed_over_before_it_is_requested() {
        let (tx, rx) = frame_channel();
        assert!(tx.try_send(RgbImage::new(2, 2)).is_err());

        let producer = std::thread::spawn(move || {
            for _ in 0..3 {
                if tx.send(RgbImage::new(2, 2)).is_err() {
                    break;
                }
            }
        });
        for _ in 0..3 {
            assert_eq!(rx.recv().unwrap().dimensions(), (2, 2));
            // 取走一帧后通道里不会有预先放入的下一帧
            assert!(rx.is_empty());
        }
        producer.join().unwrap();
    }

    #[test]
    fn copy_strips_row_padding() {
        // 2x2 RGB, 每行填充 2 字节
        let stride = 8;
        let mut raw = vec![0u8; stride * 2];
        raw[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        raw[stride..stride + 6].copy_from_slice(&[7, 8, 9, 10, 11, 12]);

        let image = unsafe { copy_rgb24(raw.as_ptr(), stride, 2, 2) }.unwrap();
        assert_eq!(image.as_raw(), &vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }
}
