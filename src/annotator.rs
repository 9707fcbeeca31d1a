//! 检测框标注 (Box annotator)
//! 在帧的副本上绘制检测框和 `#<id>` 标签, 输入帧保持不变

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::info;

use crate::detection::tracker::id_to_color;
use crate::detection::DetectionSet;
use crate::error::{Error, Result};
use crate::input::Frame;

/// 未指定 `--font` 时使用的内置字体 (DejaVu Sans)
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/font/DejaVuSans.ttf");

const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub struct BoxAnnotator {
    /// 边框线宽 (像素)
    pub thickness: u32,
    /// 标签字号
    pub text_scale: f32,
    /// 标签内边距
    pub text_padding: u32,
    font: Option<FontArc>,
}

impl Default for BoxAnnotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            text_scale: 16.0,
            text_padding: 3,
            font: None,
        }
    }
}

impl BoxAnnotator {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            ..Default::default()
        }
    }

    /// 加载标签字体
    ///
    /// 指定的字体读取失败返回 `Config` 错误; 未指定时使用内置字体。
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        let font = match font_path {
            Some(path) => {
                let font = load_font(path)?;
                info!("🔤 标签字体: {}", path.display());
                font
            }
            None => FontArc::try_from_slice(BUNDLED_FONT)
                .map_err(|e| Error::Config(format!("invalid bundled font: {}", e)))?,
        };
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 返回标注后的新帧
    pub fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
        let mut image = frame.image.clone();
        let (width, height) = image.dimensions();

        for det in detections {
            let bbox = det.bbox.clip(width, height);
            let x1 = bbox.x1.round() as i32;
            let y1 = bbox.y1.round() as i32;
            let w = (bbox.x2.round() as i32 - x1).max(0) as u32;
            let h = (bbox.y2.round() as i32 - y1).max(0) as u32;
            if w == 0 || h == 0 {
                continue;
            }

            let (r, g, b) = id_to_color(det.tracker_id.unwrap_or(0));
            let color = Rgb([r, g, b]);

            for i in 0..self.thickness {
                if w <= 2 * i || h <= 2 * i {
                    break;
                }
                let rect = Rect::at(x1 + i as i32, y1 + i as i32).of_size(w - 2 * i, h - 2 * i);
                draw_hollow_rect_mut(&mut image, rect, color);
            }

            if let (Some(font), Some(label)) = (&self.font, det.label()) {
                self.draw_label(&mut image, font, &label, x1, y1, color);
            }
        }

        Frame::new(frame.index, image)
    }

    /// 标签画在框的左上角上方, 放不下时画在框内
    fn draw_label(
        &self,
        image: &mut RgbImage,
        font: &FontArc,
        label: &str,
        x: i32,
        y: i32,
        background: Rgb<u8>,
    ) {
        let scale = PxScale::from(self.text_scale);
        let (text_w, text_h) = text_size(scale, font, label);
        let box_w = text_w + 2 * self.text_padding;
        let box_h = text_h + 2 * self.text_padding;

        let label_y = if y >= box_h as i32 { y - box_h as i32 } else { y };
        let label_x = x.min(image.width() as i32 - box_w as i32).max(0);

        draw_filled_rect_mut(
            image,
            Rect::at(label_x, label_y).of_size(box_w, box_h),
            background,
        );
        draw_text_mut(
            image,
            LABEL_TEXT_COLOR,
            label_x + self.text_padding as i32,
            label_y + self.text_padding as i32,
            scale,
            font,
            label,
        );
    }
}

fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Config(format!("cannot read font {}: {}", path.display(), e)))?;
    FontArc::try_from_vec(bytes)
        .map_err(|e| Error::Config(format!("invalid font {}: {}", path.display(), e)))
}
