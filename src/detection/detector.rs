//! 检测器 (Detector)
//! 职责: 帧 → 模型推理 → 归一化为 DetectionSet

use std::time::Instant;

use log::{debug, trace};

use super::types::{Detection, DetectionSet, CANONICAL_CLASS_ID};
use crate::error::{Error, Result};
use crate::input::Frame;
use crate::models::Model;
use crate::non_max_suppression;

pub struct Detector {
    model: Box<dyn Model>,

    // 统计
    count: u64,
    last_inference_ms: f64,
}

impl Detector {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model,
            count: 0,
            last_inference_ms: 0.0,
        }
    }

    pub fn summary(&self) {
        self.model.summary();
    }

    /// 单帧检测
    ///
    /// 不论模型自身是否已经过滤, 这里都会重新应用置信度阈值和按类别NMS,
    /// 然后把所有检测的类别统一为 `CANONICAL_CLASS_ID`, 输入帧不会被修改。
    pub fn detect(&mut self, frame: &Frame, conf: f32, iou: f32) -> Result<DetectionSet> {
        check_threshold("confidence", conf)?;
        check_threshold("iou", iou)?;

        let start = Instant::now();
        let mut raw = self
            .model
            .infer(&frame.image, conf, iou)
            .map_err(|source| Error::DetectionFailure {
                frame: frame.index,
                source,
            })?;
        let total = raw.len();

        raw.retain(|r| r.confidence.is_finite() && r.confidence >= conf);
        non_max_suppression(&mut raw, iou);

        let (width, height) = frame.dimensions();
        let detections: DetectionSet = raw
            .into_iter()
            .filter_map(|r| {
                let bbox = r.bbox.clip(width, height);
                if bbox.area() <= 0.0 {
                    trace!("帧{}: 丢弃退化框 {:?}", frame.index, r.bbox);
                    return None;
                }
                Some(Detection::new(bbox, r.confidence).with_class(CANONICAL_CLASS_ID))
            })
            .collect();

        self.count += 1;
        self.last_inference_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "帧{}: 原始检测{}个 → 保留{}个 ({:.1}ms)",
            frame.index,
            total,
            detections.len(),
            self.last_inference_ms
        );

        Ok(detections)
    }

    pub fn frames_processed(&self) -> u64 {
        self.count
    }

    pub fn last_inference_ms(&self) -> f64 {
        self.last_inference_ms
    }
}

fn check_threshold(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{} threshold must be in [0, 1], got {}",
            name, value
        )))
    }
}
