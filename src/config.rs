//! 命令行参数与跟踪器配置
//! 跟踪器参数可以通过JSON文件调整

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};

use crate::detection::ByteTrackConfig;
use crate::error::{Error, Result};
use crate::pipeline::Thresholds;

/// 交通视频分析: 检测 + 追踪 + 标注
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 视频目标追踪", long_about = None)]
pub struct Args {
    /// ONNX 模型权重路径
    #[arg(long)]
    pub source_weights_path: PathBuf,

    /// 输入视频路径
    #[arg(long)]
    pub source_video_path: PathBuf,

    /// 输出视频路径 (不指定则在窗口中实时显示)
    #[arg(long)]
    pub target_video_path: Option<PathBuf>,

    /// 检测置信度阈值
    #[arg(long, default_value_t = 0.3)]
    pub confidence_threshold: f32,

    /// NMS IOU阈值
    #[arg(long, default_value_t = 0.7)]
    pub iou_threshold: f32,

    /// ByteTrack 参数 (JSON)
    #[arg(long)]
    pub tracker_config: Option<PathBuf>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 使用 CUDA 推理
    #[arg(long)]
    pub cuda: bool,

    /// GPU 设备编号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
}

impl Args {
    /// 检查阈值范围并返回
    pub fn thresholds(&self) -> Result<Thresholds> {
        Thresholds::new(self.confidence_threshold, self.iou_threshold)
    }

    /// 是否写入文件 (否则显示窗口)
    pub fn writes_file(&self) -> bool {
        self.target_video_path.is_some()
    }
}

/// 跟踪器参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // === ByteTrack参数 ===
    pub bytetrack_max_lost_frames: u32,      // 最大丢失帧数 (30fps基准)
    pub bytetrack_high_score_threshold: f32, // 高分阈值
    pub bytetrack_low_score_threshold: f32,  // 低分阈值
    pub bytetrack_high_iou_threshold: f32,   // 高分IOU阈值
    pub bytetrack_low_iou_threshold: f32,    // 低分IOU阈值
    pub bytetrack_kalman_obs_noise: f32,     // 卡尔曼观测噪声

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32, // 过程噪声 q
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let bytetrack = ByteTrackConfig::default();
        Self {
            bytetrack_max_lost_frames: bytetrack.max_lost_frames,
            bytetrack_high_score_threshold: bytetrack.high_score_threshold,
            bytetrack_low_score_threshold: bytetrack.low_score_threshold,
            bytetrack_high_iou_threshold: bytetrack.high_iou_threshold,
            bytetrack_low_iou_threshold: bytetrack.low_iou_threshold,
            bytetrack_kalman_obs_noise: bytetrack.kalman_obs_noise,
            kalman_process_noise: bytetrack.kalman_process_noise,
        }
    }
}

impl TrackerConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时使用默认值; 文件存在但无法解析或参数非法时报错。
    pub fn load(path: &Path) -> Result<Self> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("配置文件 {} 不存在, 使用默认值", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize failed: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| Error::Config(format!("cannot write {}: {}", path.display(), e)))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let unit = [
            ("bytetrack_high_score_threshold", self.bytetrack_high_score_threshold),
            ("bytetrack_low_score_threshold", self.bytetrack_low_score_threshold),
            ("bytetrack_high_iou_threshold", self.bytetrack_high_iou_threshold),
            ("bytetrack_low_iou_threshold", self.bytetrack_low_iou_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        if self.bytetrack_low_score_threshold > self.bytetrack_high_score_threshold {
            return Err(Error::Config(
                "bytetrack_low_score_threshold must not exceed bytetrack_high_score_threshold"
                    .to_string(),
            ));
        }
        if self.kalman_process_noise <= 0.0 || self.bytetrack_kalman_obs_noise <= 0.0 {
            return Err(Error::Config("kalman noise must be positive".to_string()));
        }
        Ok(())
    }

    /// 转换为 ByteTrack 参数 (丢失帧数按视频帧率缩放)
    pub fn bytetrack(&self, fps: f64) -> ByteTrackConfig {
        ByteTrackConfig {
            max_lost_frames: self.bytetrack_max_lost_frames,
            high_score_threshold: self.bytetrack_high_score_threshold,
            low_score_threshold: self.bytetrack_low_score_threshold,
            high_iou_threshold: self.bytetrack_high_iou_threshold,
            low_iou_threshold: self.bytetrack_low_iou_threshold,
            kalman_process_noise: self.kalman_process_noise,
            kalman_obs_noise: self.bytetrack_kalman_obs_noise,
        }
        .for_frame_rate(fps)
    }
}
