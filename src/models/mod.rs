/// 模型统一接口与实现
///
/// # 架构说明
///
/// 检测模型只负责 "图像 → 原始检测框"; 阈值过滤、NMS、类别覆盖等
/// 约定由 `detection::Detector` 统一保证, 因此可以替换任意模型实现。
///
/// ## 核心流程
/// ```text
/// 原始帧 → preprocess → 张量 → 推理引擎 run → postprocess → Vec<RawDetection>
/// ```
use anyhow::Result;
use image::RgbImage;

use crate::detection::types::BBox;

/// 模型输出的原始检测框 (帧像素坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_index: usize,
}

impl RawDetection {
    pub fn new(bbox: BBox, confidence: f32, class_index: usize) -> Self {
        Self {
            bbox,
            confidence,
            class_index,
        }
    }
}

/// 统一的检测模型接口
pub trait Model {
    /// 对单帧执行推理
    ///
    /// # Arguments
    /// * `image` - 原始帧 (RGB)
    /// * `conf` - 置信度阈值, 模型可以提前丢弃低分框
    /// * `iou` - NMS阈值
    fn infer(&mut self, image: &RgbImage, conf: f32, iou: f32) -> Result<Vec<RawDetection>>;

    /// 打印模型信息
    fn summary(&self) {}
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn infer(&mut self, image: &RgbImage, conf: f32, iou: f32) -> Result<Vec<RawDetection>> {
        (**self).infer(image, conf, iou)
    }

    fn summary(&self) {
        (**self).summary()
    }
}

#[cfg(feature = "onnx")]
pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

#[cfg(feature = "onnx")]
pub use yolov8::YOLOv8;
