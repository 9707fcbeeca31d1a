//! 跟踪器接口与共用部件: 卡尔曼滤波, IOU, 轨迹配色

use super::types::{BBox, DetectionSet};

/// 单个分量的匀速模型: 状态 [位置, 速度], 2x2 协方差
#[derive(Clone, Copy, Debug)]
struct Axis {
    pos: f32,
    vel: f32,
    /// 协方差 [[p00, p01], [p01, p11]]
    p00: f32,
    p01: f32,
    p11: f32,
}

impl Axis {
    fn new(pos: f32) -> Self {
        Self {
            pos,
            vel: 0.0,
            p00: INITIAL_POS_VARIANCE,
            p01: 0.0,
            p11: INITIAL_VEL_VARIANCE,
        }
    }

    /// x = F x, P = F P Fᵀ + Q, F = [[1, 1], [0, 1]]
    fn predict(&mut self, q: f32) {
        self.pos += self.vel;
        self.p00 += 2.0 * self.p01 + self.p11 + q;
        self.p01 += self.p11;
        self.p11 += q;
    }

    /// 只观测位置: H = [1, 0]
    fn correct(&mut self, z: f32, r: f32) {
        let innovation = z - self.pos;
        let s = self.p00 + r;
        if s <= f32::EPSILON {
            return;
        }
        let (k0, k1) = (self.p00 / s, self.p01 / s);

        self.pos += k0 * innovation;
        self.vel += k1 * innovation;

        let (p00, p01, p11) = (self.p00, self.p01, self.p11);
        self.p00 = (1.0 - k0) * p00;
        self.p01 = (1.0 - k0) * p01;
        self.p11 = p11 - k1 * p01;
    }
}

const INITIAL_POS_VARIANCE: f32 = 10.0;
const INITIAL_VEL_VARIANCE: f32 = 100.0;

/// 边界框卡尔曼滤波器
///
/// 中心点和宽高四个分量各自独立地按匀速模型滤波。
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    /// cx, cy, w, h
    axes: [Axis; 4],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
}

impl KalmanBoxFilter {
    /// `q` 越小轨迹越平滑, `r` 越大越不相信观测
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            axes: [cx, cy, bbox.width(), bbox.height()].map(Axis::new),
            q,
            r,
        }
    }

    /// 推进一帧
    pub fn predict(&mut self) {
        for axis in &mut self.axes {
            axis.predict(self.q);
        }
    }

    /// 融合一次观测
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        for (axis, z) in self.axes.iter_mut().zip([cx, cy, bbox.width(), bbox.height()]) {
            axis.correct(z, self.r);
        }
    }

    /// 当前估计的边界框 (predict 之后即为本帧预测)
    pub fn state_bbox(&self) -> BBox {
        let [cx, cy, w, h] = self.axes.map(|a| a.pos);
        BBox::from_cxcywh(cx, cy, w.max(1.0), h.max(1.0))
    }

    /// 中心点速度 (像素/帧)
    pub fn velocity(&self) -> (f32, f32) {
        (self.axes[0].vel, self.axes[1].vel)
    }
}

/// 多目标跟踪器
///
/// 每帧调用一次 `update`, 并且必须严格按帧顺序调用: 乱序或跳帧会
/// 破坏轨迹连续性, 跟踪器不会检测这种误用, 顺序由调用方负责。
pub trait Tracker {
    /// 更新跟踪器
    ///
    /// 返回本帧与存活轨迹关联上的检测, 每个检测都带有 `tracker_id`;
    /// 无法关联的检测被丢弃。
    fn update(&mut self, detections: DetectionSet) -> DetectionSet;

    /// 重置跟踪器 (清除所有轨迹, ID计数器回到初始值)
    fn reset(&mut self);

    /// 当前存活轨迹数量
    fn track_count(&self) -> usize;
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
    fn update(&mut self, detections: DetectionSet) -> DetectionSet {
        (**self).update(detections)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn track_count(&self) -> usize {
        (**self).track_count()
    }
}

/// 两个边界框的 IOU
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    a.iou(b)
}

/// 轨迹配色, 按ID循环取色
const TRACK_PALETTE: [(u8, u8, u8); 20] = [
    (0xA3, 0x51, 0xFB),
    (0xFF, 0x40, 0x40),
    (0xFF, 0xA1, 0xA0),
    (0xFF, 0x76, 0x33),
    (0xFF, 0xB6, 0x33),
    (0xD1, 0xD4, 0x35),
    (0x4C, 0xFB, 0x12),
    (0x94, 0xCF, 0x1A),
    (0x40, 0xDE, 0x8A),
    (0x1B, 0x96, 0x40),
    (0x00, 0xD6, 0xC1),
    (0x2E, 0x9C, 0xAA),
    (0x00, 0xC4, 0xFF),
    (0x36, 0x47, 0x97),
    (0x66, 0x75, 0xFF),
    (0x00, 0x19, 0xEF),
    (0x86, 0x3A, 0xFF),
    (0x53, 0x00, 0x87),
    (0xCD, 0x3A, 0xFF),
    (0xFF, 0x97, 0xCA),
];

/// 轨迹ID对应的绘制颜色 (RGB)
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    TRACK_PALETTE[id as usize % TRACK_PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kalman_follows_constant_motion() {
        let mut kf = KalmanBoxFilter::new(&BBox::new(0.0, 0.0, 20.0, 20.0), 0.1, 0.5);
        for step in 1..=20 {
            kf.predict();
            let dx = step as f32 * 5.0;
            kf.update(&BBox::new(dx, 0.0, dx + 20.0, 20.0));
        }
        let (vx, vy) = kf.velocity();
        assert!((vx - 5.0).abs() < 0.5, "velocity should follow motion, got {}", vx);
        assert!(vy.abs() < 0.1);

        kf.predict();
        let next = BBox::new(105.0, 0.0, 125.0, 20.0);
        assert!(compute_iou(&kf.state_bbox(), &next) > 0.8);
    }

    #[test]
    fn stationary_box_stays_put() {
        let b = BBox::new(40.0, 40.0, 80.0, 100.0);
        let mut kf = KalmanBoxFilter::new(&b, 0.1, 0.5);
        for _ in 0..10 {
            kf.predict();
            kf.update(&b);
        }
        assert!(compute_iou(&kf.state_bbox(), &b) > 0.95);
    }

    #[test]
    fn missed_frames_coast_on_velocity() {
        let mut kf = KalmanBoxFilter::new(&BBox::new(0.0, 0.0, 10.0, 10.0), 0.1, 0.5);
        for step in 1..=15 {
            kf.predict();
            let y = step as f32 * 2.0;
            kf.update(&BBox::new(0.0, y, 10.0, y + 10.0));
        }
        for _ in 0..3 {
            kf.predict();
        }
        let (_, cy) = kf.state_bbox().center();
        assert!((cy - 41.0).abs() < 2.0, "cy = {}", cy);
    }

    #[test]
    fn colors_differ_between_neighbouring_ids() {
        assert_ne!(id_to_color(1), id_to_color(2));
        assert_eq!(id_to_color(3), id_to_color(3 + TRACK_PALETTE.len() as u32));
    }
}
