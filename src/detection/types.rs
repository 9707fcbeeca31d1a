/// 检测系统数据结构定义
/// Data structures for the detection/tracking stages

// ========== 公共常量 ==========

/// 单类别部署: 所有检测框在跟踪前统一使用的类别
pub const CANONICAL_CLASS_ID: u32 = 0;

// ========== 数据结构 ==========

/// 检测框 (x1, y1) 左上角, (x2, y2) 右下角, 像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 从中心点与宽高构造
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 交并比 (Intersection over Union)
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }

        intersection / union
    }

    /// 裁剪到画面范围内 (坐标非法时不报错)
    pub fn clip(&self, width: u32, height: u32) -> BBox {
        let (w, h) = (width as f32, height as f32);
        let fix = |v: f32, max: f32| if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
        let (x1, x2) = (fix(self.x1, w), fix(self.x2, w));
        let (y1, y2) = (fix(self.y1, h), fix(self.y2, h));
        BBox {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }
}

/// 单帧中的一个目标观测
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: Option<u32>,
    /// 跟踪器分配之前为 None
    pub tracker_id: Option<u32>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            class_id: None,
            tracker_id: None,
        }
    }

    pub fn with_class(mut self, class_id: u32) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_tracker_id(mut self, tracker_id: u32) -> Self {
        self.tracker_id = Some(tracker_id);
        self
    }

    /// 标注文字 `#<track_id>`, 未跟踪的检测没有标签
    pub fn label(&self) -> Option<String> {
        self.tracker_id.map(|id| format!("#{}", id))
    }
}

/// 一帧的检测集合, 顺序在标注与绘制之间保持一致
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet(Vec<Detection>);

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self(detections)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Detection> {
        self.0
    }

    /// 每个检测的标签, 与 iter() 同序
    pub fn labels(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|d| d.label().unwrap_or_default())
            .collect()
    }

    pub fn tracker_ids(&self) -> Vec<Option<u32>> {
        self.0.iter().map(|d| d.tracker_id).collect()
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
