/// 检测系统 (Detection System)
///
/// - Detector: 模型输出归一化 (阈值, NMS, 单类别)
/// - Tracker:  目标追踪, 唯一持有跨帧状态
pub mod bytetrack;
pub mod detector;
pub mod tracker;
pub mod types;

pub use bytetrack::{ByteTrackConfig, ByteTracker};
pub use detector::Detector;
pub use tracker::Tracker;
pub use types::{BBox, Detection, DetectionSet};
