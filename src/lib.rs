#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod annotator; // 检测框/标签绘制
pub mod config; // 命令行与跟踪器配置
pub mod detection; // 检测适配 + 目标追踪
pub mod error;
pub mod input; // 视频输入系统
pub mod models; // 模型接口与具体实现
pub mod output; // 输出: 视频文件 / 实时窗口
pub mod pipeline; // 逐帧处理流水线

#[cfg(feature = "onnx")]
pub mod ort_backend;
#[cfg(feature = "window")]
pub mod renderer; // macroquad 显示窗口

pub use crate::annotator::BoxAnnotator;
pub use crate::config::{Args, TrackerConfig};
pub use crate::detection::{
    BBox, ByteTrackConfig, ByteTracker, Detection, DetectionSet, Detector, Tracker,
};
pub use crate::error::{Error, Result};
pub use crate::input::{Frame, FrameSource, MemoryFrames, VideoInfo};
pub use crate::models::{Model, RawDetection};
pub use crate::output::{
    DisplaySink, DisplaySurface, Flow, FrameWriter, OutputSink, SinkConfig, VideoSink,
};
pub use crate::pipeline::{Pipeline, RunSummary, Thresholds};

#[cfg(feature = "onnx")]
pub use crate::models::YOLOv8;
#[cfg(feature = "onnx")]
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 按类别分组的非极大值抑制: 同类别中与更高分框重叠超过 `iou_threshold` 的框被丢弃
pub fn non_max_suppression(xs: &mut Vec<RawDetection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_index != xs[index].class_index {
                continue;
            }
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(x1: f32, conf: f32, class_index: usize) -> RawDetection {
        RawDetection::new(BBox::new(x1, 0.0, x1 + 10.0, 10.0), conf, class_index)
    }

    #[test]
    fn nms_keeps_higher_confidence_of_overlapping_pair() {
        let mut xs = vec![raw(0.0, 0.6, 0), raw(1.0, 0.9, 0), raw(100.0, 0.5, 0)];
        non_max_suppression(&mut xs, 0.5);
        let confs: Vec<f32> = xs.iter().map(|x| x.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.5]);
    }

    #[test]
    fn nms_does_not_suppress_across_classes() {
        let mut xs = vec![raw(0.0, 0.9, 0), raw(0.0, 0.8, 2)];
        non_max_suppression(&mut xs, 0.5);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn nms_threshold_one_keeps_everything() {
        let mut xs = vec![raw(0.0, 0.9, 0), raw(0.0, 0.8, 0)];
        non_max_suppression(&mut xs, 1.0);
        assert_eq!(xs.len(), 2);
    }
}
