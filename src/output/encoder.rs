/// FFmpeg视频编码写入器
/// rawvideo(rgb24) → 读回调 → FFmpeg → 容器文件
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context};
use crossbeam_channel::{bounded, Receiver, Sender};
use ez_ffmpeg::{FfmpegContext, Input, Output};
use log::{debug, info, warn};

use super::{FrameWriter, SinkConfig};
use crate::input::Frame;

/// 读回调返回 EOF (AVERROR_EOF)
const AVERROR_EOF: i32 = -541478725;

/// 等待编码的帧数
const QUEUE_DEPTH: usize = 2;

/// 输出像素格式转换
const YUV420P_FILTER: &str = "format=yuv420p";

pub struct FfmpegWriter {
    path: PathBuf,
    config: SinkConfig,
    tx: Option<Sender<Vec<u8>>>,
    worker: Option<JoinHandle<anyhow::Result<()>>>,
}

impl FfmpegWriter {
    /// 创建输出文件并启动编码线程
    ///
    /// FFmpeg 在构建上下文时就会从读回调探测输入, 所以上下文必须在
    /// 编码线程内构建, 否则会与第一次 `write` 互相等待。
    pub fn create(path: impl AsRef<Path>, config: SinkConfig) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if config.width == 0 || config.height == 0 {
            anyhow::bail!("invalid output size {}x{}", config.width, config.height);
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.is_dir() {
                anyhow::bail!("output directory {} does not exist", dir.display());
            }
        }

        let (tx, rx) = bounded::<Vec<u8>>(QUEUE_DEPTH);
        let url = path.to_string_lossy().to_string();
        let options = vec![
            ("video_size".to_string(), format!("{}x{}", config.width, config.height)),
            ("pixel_format".to_string(), "rgb24".to_string()),
            ("framerate".to_string(), format!("{}", config.fps)),
        ];

        let worker = std::thread::Builder::new()
            .name("video-encoder".to_string())
            .spawn(move || encode(rx, options, url))
            .context("failed to spawn encoder thread")?;

        info!(
            "🎞 输出: {} ({}x{} @ {:.2}fps)",
            path.display(),
            config.width,
            config.height,
            config.fps
        );

        Ok(Self {
            path,
            config,
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn join_worker(&mut self) -> anyhow::Result<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| anyhow!("encoder thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl FrameWriter for FfmpegWriter {
    fn config(&self) -> &SinkConfig {
        &self.config
    }

    fn write(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| anyhow!("writer already finished"))?;
        if tx.send(frame.image.as_raw().clone()).is_ok() {
            return Ok(());
        }
        // 编码线程已退出: 返回它的错误
        self.tx.take();
        Err(match self.join_worker() {
            Err(e) => e.context("encoder stopped"),
            Ok(()) => anyhow!("encoder stopped before all frames were written"),
        })
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        // 关闭通道 → 读回调返回 EOF → FFmpeg 写入文件尾
        self.tx.take();
        self.join_worker()
    }
}

fn encode(rx: Receiver<Vec<u8>>, options: Vec<(String, String)>, url: String) -> anyhow::Result<()> {
    let mut pending: Vec<u8> = Vec::new();
    let mut offset = 0usize;

    let read = move |buf: &mut [u8]| -> i32 {
        if offset >= pending.len() {
            match rx.recv() {
                Ok(bytes) => {
                    pending = bytes;
                    offset = 0;
                }
                Err(_) => return AVERROR_EOF,
            }
        }
        let n = buf.len().min(pending.len() - offset);
        buf[..n].copy_from_slice(&pending[offset..offset + n]);
        offset += n;
        n as i32
    };

    let input = Input::new_by_read_callback(read)
        .set_format("rawvideo")
        .set_input_opts(options);

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_descs([YUV420P_FILTER].into())
        .output(Output::from(url.as_str()))
        .build()
        .map_err(|e| anyhow!("构建编码器失败: {}", e))?;

    let scheduler = ctx.start().map_err(|e| anyhow!("启动编码器失败: {}", e))?;
    scheduler.wait().map_err(|e| anyhow!("编码失败: {}", e))?;
    debug!("编码线程退出: {}", url);
    Ok(())
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.finish() {
                warn!("完成输出文件 {} 失败: {:#}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = FfmpegWriter::create(dir.path().join("out.mp4"), SinkConfig::new(0, 10, 30.0));
        assert!(result.is_err());
    }

    #[test]
    fn missing_output_directory_fails_before_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("no_such_dir").join("out.mp4");
        let err = FfmpegWriter::create(&target, SinkConfig::new(8, 6, 30.0))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no_such_dir"));
    }

    /// 编码线程启动失败后, write 返回线程自己的错误
    #[test]
    fn write_reports_encoder_failure_cause() {
        let (tx, rx) = bounded::<Vec<u8>>(QUEUE_DEPTH);
        let (stopped_tx, stopped_rx) = bounded::<()>(1);
        let worker = std::thread::spawn(move || {
            drop(rx);
            let _ = stopped_tx.send(());
            Err(anyhow!("cannot open /readonly/out.mp4"))
        });
        let mut writer = FfmpegWriter {
            path: PathBuf::from("/readonly/out.mp4"),
            config: SinkConfig::new(2, 2, 30.0),
            tx: Some(tx),
            worker: Some(worker),
        };
        stopped_rx.recv().unwrap();

        let frame = Frame::new(0, image::RgbImage::new(2, 2));
        let err = writer.write(&frame).err().unwrap();
        assert!(format!("{:#}", err).contains("cannot open /readonly/out.mp4"));
        assert!(writer.finish().is_ok());
    }
}
