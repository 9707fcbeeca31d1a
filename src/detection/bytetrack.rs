//! ByteTrack 多目标跟踪
//!
//! 每帧的检测按分数分成两档: 高分框先与全部轨迹按 IOU 关联,
//! 剩下的轨迹再用低分框关联, 避免遮挡时分数下降导致轨迹断开。
//! 只有没关联上的高分框才会开新轨迹。只用运动信息, 不用外观特征。

use log::trace;
use serde::{Deserialize, Serialize};

use super::tracker::{compute_iou, KalmanBoxFilter, Tracker};
use super::types::{BBox, DetectionSet};

/// 第一个分配的轨迹ID
pub const FIRST_TRACK_ID: u32 = 1;

/// lost buffer 以 30fps 为基准
const REFERENCE_FRAME_RATE: f64 = 30.0;

/// ByteTrack 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteTrackConfig {
    /// 最大允许丢失帧数, 超过后轨迹被删除
    pub max_lost_frames: u32,
    /// 高分检测阈值 (只有高分框能创建新轨迹)
    pub high_score_threshold: f32,
    /// 低分检测阈值 (用于救援)
    pub low_score_threshold: f32,
    /// 高分匹配 IOU 阈值
    pub high_iou_threshold: f32,
    /// 低分匹配 IOU 阈值
    pub low_iou_threshold: f32,
    /// 卡尔曼过程噪声
    pub kalman_process_noise: f32,
    /// 卡尔曼观测噪声
    pub kalman_obs_noise: f32,
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.25,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.2,
            low_iou_threshold: 0.5,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }
}

impl ByteTrackConfig {
    /// 按视频帧率缩放丢失帧数 (max_lost_frames 以30fps为基准)
    pub fn for_frame_rate(mut self, fps: f64) -> Self {
        if fps.is_finite() && fps > 0.0 {
            let scaled = (fps / REFERENCE_FRAME_RATE * self.max_lost_frames as f64).round();
            self.max_lost_frames = scaled.max(1.0) as u32;
        }
        self
    }
}

/// 一条存活轨迹
#[derive(Clone, Debug)]
struct Track {
    id: u32,
    kalman: KalmanBoxFilter,
    /// 本帧的滤波估计 (predict 之后用于关联)
    bbox: BBox,
    /// 连续未关联帧数
    misses: u32,
    /// 关联成功的总帧数
    hits: u32,
}

impl Track {
    fn spawn(id: u32, bbox: &BBox, config: &ByteTrackConfig) -> Self {
        let kalman = KalmanBoxFilter::new(bbox, config.kalman_process_noise, config.kalman_obs_noise);
        Self {
            id,
            bbox: kalman.state_bbox(),
            kalman,
            misses: 0,
            hits: 1,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.state_bbox();
    }

    fn observe(&mut self, bbox: &BBox) {
        self.kalman.update(bbox);
        self.bbox = self.kalman.state_bbox();
        self.misses = 0;
        self.hits += 1;
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<Track>,

    /// 下一个分配的ID (单调递增, 不复用)
    next_id: u32,

    config: ByteTrackConfig,
}

impl ByteTracker {
    pub fn new(config: ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: FIRST_TRACK_ID,
            config,
        }
    }

    pub fn config(&self) -> &ByteTrackConfig {
        &self.config
    }

    /// 已分配过的ID总数
    pub fn ids_allocated(&self) -> u32 {
        self.next_id - FIRST_TRACK_ID
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(ByteTrackConfig::default())
    }
}

impl Tracker for ByteTracker {
    fn update(&mut self, detections: DetectionSet) -> DetectionSet {
        let detections = detections.into_vec();
        let cfg = &self.config;

        self.tracks.iter_mut().for_each(Track::predict);

        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .filter(|&i| detections[i].confidence >= cfg.low_score_threshold)
            .partition(|&i| detections[i].confidence >= cfg.high_score_threshold);

        // 检测下标 → 轨迹ID
        let mut assigned: Vec<Option<u32>> = vec![None; detections.len()];
        let mut pending: Vec<usize> = (0..self.tracks.len()).collect();

        // 高分框关联全部轨迹, 低分框只关联剩下的轨迹
        for (pool, iou_threshold) in [
            (&high, cfg.high_iou_threshold),
            (&low, cfg.low_iou_threshold),
        ] {
            let det_boxes: Vec<BBox> = pool.iter().map(|&i| detections[i].bbox).collect();
            let track_boxes: Vec<BBox> = pending.iter().map(|&t| self.tracks[t].bbox).collect();

            let pairs = greedy_iou_match(&det_boxes, &track_boxes, iou_threshold);
            let mut taken = vec![false; pending.len()];
            for (d, t) in pairs {
                let (det_idx, track_idx) = (pool[d], pending[t]);
                let det = &detections[det_idx];
                let track = &mut self.tracks[track_idx];
                track.observe(&det.bbox);
                assigned[det_idx] = Some(track.id);
                taken[t] = true;
            }
            pending = pending
                .into_iter()
                .zip(taken)
                .filter_map(|(t, taken)| (!taken).then_some(t))
                .collect();
        }

        for &t in &pending {
            self.tracks[t].misses += 1;
        }

        // 没关联上的高分框开新轨迹
        for &i in &high {
            if assigned[i].is_some() {
                continue;
            }
            let det = &detections[i];
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track::spawn(id, &det.bbox, &self.config));
            assigned[i] = Some(id);
            trace!("新建轨迹 #{}", id);
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| {
            if t.misses > max_lost {
                trace!("轨迹 #{} 丢失{}帧, 移除 (共跟踪{}帧)", t.id, t.misses, t.hits);
                return false;
            }
            true
        });

        detections
            .into_iter()
            .zip(assigned)
            .filter_map(|(det, id)| id.map(|id| det.with_tracker_id(id)))
            .collect()
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = FIRST_TRACK_ID;
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// 贪心关联: 按 IOU 从大到小依次配对, 每个检测和轨迹最多用一次
///
/// 返回 (检测下标, 轨迹下标), 只包含 IOU 不低于 `threshold` 且大于0的配对。
fn greedy_iou_match(dets: &[BBox], tracks: &[BBox], threshold: f32) -> Vec<(usize, usize)> {
    let mut scored: Vec<(f32, usize, usize)> = dets
        .iter()
        .enumerate()
        .flat_map(|(d, det)| {
            tracks
                .iter()
                .enumerate()
                .map(move |(t, track)| (compute_iou(det, track), d, t))
        })
        .filter(|&(iou, _, _)| iou > 0.0 && iou >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut det_used = vec![false; dets.len()];
    let mut track_used = vec![false; tracks.len()];
    let mut pairs = Vec::new();
    for (_, d, t) in scored {
        if det_used[d] || track_used[t] {
            continue;
        }
        det_used[d] = true;
        track_used[t] = true;
        pairs.push((d, t));
    }
    pairs
}
