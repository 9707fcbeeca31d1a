// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型
// 包含: 模型加载、预处理(letterbox)、推理、后处理

use anyhow::{bail, Context, Result};
use fast_image_resize as fr;
use image::RgbImage;
use log::{info, trace};
use ndarray::Array4;

use super::{Model, RawDetection};
use crate::detection::BBox;
use crate::non_max_suppression;
use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// letterbox 填充色
const PAD_VALUE: f32 = 144.0 / 255.0;

/// cx, cy, w, h
const CXYWH_OFFSET: usize = 4;

pub struct YOLOv8 {
    engine: OrtBackend,
    height: u32,
    width: u32,
    resizer: fr::Resizer,
}

impl YOLOv8 {
    pub fn new(config: OrtConfig) -> Result<Self> {
        let engine = OrtBackend::build(config)?;
        let (height, width) = (engine.height(), engine.width());
        Ok(Self {
            engine,
            height,
            width,
            resizer: fr::Resizer::new(),
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// 保持宽高比缩放到模型输入, 左上角对齐, 其余部分填充
    pub fn preprocess(&mut self, image: &RgbImage) -> Result<(Array4<f32>, f32)> {
        let (w0, h0) = image.dimensions();
        if w0 == 0 || h0 == 0 {
            bail!("empty frame");
        }
        let (ratio, w_new, h_new) =
            scale_wh(w0 as f32, h0 as f32, self.width as f32, self.height as f32);
        let (w_new, h_new) = ((w_new as u32).max(1), (h_new as u32).max(1));

        let src = fr::images::Image::from_vec_u8(w0, h0, image.as_raw().clone(), fr::PixelType::U8x3)
            .context("invalid source frame")?;
        let mut dst = fr::images::Image::new(w_new, h_new, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .context("resize failed")?;

        let mut xs = Array4::from_elem((1, 3, self.height as usize, self.width as usize), PAD_VALUE);
        let pixels = dst.buffer();
        let row_bytes = w_new as usize * 3;
        for y in 0..h_new as usize {
            let row = &pixels[y * row_bytes..(y + 1) * row_bytes];
            for (x, rgb) in row.chunks_exact(3).enumerate() {
                xs[[0, 0, y, x]] = rgb[0] as f32 / 255.0;
                xs[[0, 1, y, x]] = rgb[1] as f32 / 255.0;
                xs[[0, 2, y, x]] = rgb[2] as f32 / 255.0;
            }
        }

        Ok((xs, ratio))
    }
}

impl Model for YOLOv8 {
    fn infer(&mut self, image: &RgbImage, conf: f32, iou: f32) -> Result<Vec<RawDetection>> {
        let (xs, ratio) = self.preprocess(image)?;
        let (shape, data) = self.engine.run(xs)?;
        let mut ys = decode_predictions(&shape, &data, ratio, conf)?;
        trace!("候选框{}个 (conf >= {})", ys.len(), conf);
        non_max_suppression(&mut ys, iou);
        Ok(ys)
    }

    fn summary(&self) {
        info!(
            "Summary: YOLOv8 | EP: {:?}{} | 输入 {}x{} | nc: {}",
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                " (May still fall back to CPU)"
            },
            self.width,
            self.height,
            self.engine
                .nc()
                .map(|nc| nc.to_string())
                .unwrap_or_else(|| "dynamic".to_string())
        );
    }
}

/// 缩放比例与缩放后的尺寸
fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 解码 `[1, 4 + nc, N]` 输出, 坐标还原到原图
pub fn decode_predictions(
    shape: &[usize],
    data: &[f32],
    ratio: f32,
    conf: f32,
) -> Result<Vec<RawDetection>> {
    let (channels, anchors) = match shape {
        [1, c, n] => (*c, *n),
        _ => bail!("unexpected output shape {:?}, expected [1, 4 + nc, N]", shape),
    };
    if channels <= CXYWH_OFFSET {
        bail!("output has no class scores: {:?}", shape);
    }
    if data.len() < channels * anchors {
        bail!("output data too short: {} < {}", data.len(), channels * anchors);
    }
    if ratio <= 0.0 {
        bail!("invalid scale ratio {}", ratio);
    }

    let at = |c: usize, i: usize| data[c * anchors + i];
    let mut ys = Vec::new();
    for i in 0..anchors {
        let (class_index, confidence) = (CXYWH_OFFSET..channels)
            .map(|c| (c - CXYWH_OFFSET, at(c, i)))
            .fold((0, f32::MIN), |max, x| if x.1 > max.1 { x } else { max });

        if confidence.is_nan() || confidence < conf {
            continue;
        }

        let bbox = BBox::from_cxcywh(
            at(0, i) / ratio,
            at(1, i) / ratio,
            at(2, i) / ratio,
            at(3, i) / ratio,
        );
        ys.push(RawDetection::new(bbox, confidence, class_index));
    }
    Ok(ys)
}
