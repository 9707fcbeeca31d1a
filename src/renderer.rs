//! macroquad 显示窗口
//! 每帧上传纹理并缩放到窗口, 按 Q / Esc 退出

use image::RgbImage;
use log::{debug, info};
use macroquad::prelude::*;

use crate::error::Result;
use crate::input::{Frame, VideoInfo};
use crate::output::{DisplaySurface, Flow};

/// 初始窗口最大宽度
const MAX_WINDOW_WIDTH: u32 = 1280;

/// 按视频尺寸生成窗口配置
pub fn window_conf(info: &VideoInfo) -> Conf {
    let (width, height) = initial_window_size(info.width, info.height);
    Conf {
        window_title: "YOLOv8 Tracking (Q/Esc 退出)".to_string(),
        window_width: width as i32,
        window_height: height as i32,
        window_resizable: true,
        ..Default::default()
    }
}

fn initial_window_size(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_WINDOW_WIDTH || width == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = MAX_WINDOW_WIDTH as f32 / width as f32;
    (MAX_WINDOW_WIDTH, ((height as f32 * scale).round() as u32).max(1))
}

/// 等比缩放居中: (x, y, w, h)
fn fit_rect(tex_w: f32, tex_h: f32, screen_w: f32, screen_h: f32) -> (f32, f32, f32, f32) {
    let scale = (screen_w / tex_w).min(screen_h / tex_h);
    let (w, h) = (tex_w * scale, tex_h * scale);
    ((screen_w - w) / 2.0, (screen_h - h) / 2.0, w, h)
}

fn to_rgba(image: &RgbImage) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(image.as_raw().len() / 3 * 4);
    for chunk in image.as_raw().chunks_exact(3) {
        rgba.extend_from_slice(chunk);
        rgba.push(255);
    }
    rgba
}

/// macroquad 窗口显示表面
///
/// 只负责绘制, 帧的提交 (`next_frame().await`) 由调用方的事件循环完成。
pub struct MacroquadWindow {
    texture: Option<Texture2D>,
    total_frames: u64,
    closed: bool,
}

impl MacroquadWindow {
    pub fn new(info: &VideoInfo) -> Self {
        info!("🖥 显示窗口: {}x{}", info.width, info.height);
        Self {
            texture: None,
            total_frames: info.total_frames,
            closed: false,
        }
    }

    fn upload(&mut self, image: &RgbImage) {
        let (w, h) = image.dimensions();
        let rgba = to_rgba(image);

        // 只在分辨率变化时重建纹理, 否则更新像素数据
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != w as f32 || tex.height() != h as f32,
            None => true,
        };

        if needs_rebuild {
            let texture = Texture2D::from_rgba8(w as u16, h as u16, &rgba);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            tex.update(&Image {
                bytes: rgba,
                width: w as u16,
                height: h as u16,
            });
        }
    }
}

impl DisplaySurface for MacroquadWindow {
    fn present(&mut self, frame: &Frame) -> Result<Flow> {
        if self.closed {
            return Ok(Flow::Stop);
        }

        self.upload(&frame.image);
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            let (x, y, w, h) =
                fit_rect(texture.width(), texture.height(), screen_width(), screen_height());
            draw_texture_ex(
                texture,
                x,
                y,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }

        let status = format!("{}/{}  FPS {}", frame.index + 1, self.total_frames, get_fps());
        draw_text(&status, 10.0, 24.0, 24.0, GREEN);

        // 非阻塞轮询: 按键状态来自上一次 next_frame
        if is_key_pressed(KeyCode::Q) || is_key_pressed(KeyCode::Escape) {
            debug!("收到退出按键");
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.texture = None;
            debug!("显示窗口资源已释放");
        }
    }
}
