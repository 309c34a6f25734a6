//! 叠加渲染 - 把标注框和标签画到 RGBA 图片上

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::OverlayState;

const LINE_WIDTH: i32 = 2;
const FONT_SIZE: f32 = 16.0;

/// 加载标注字体
pub fn load_font(path: &Path) -> Option<FontVec> {
    match std::fs::read(path) {
        Ok(bytes) => match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                info!("✅ 字体加载成功: {}", path.display());
                Some(font)
            }
            Err(e) => {
                warn!("⚠️ 字体加载失败: {}", e);
                None
            }
        },
        Err(_) => {
            warn!("⚠️ 未找到字体文件: {}", path.display());
            None
        }
    }
}

/// 绘制叠加状态; 框裁剪到图片范围内, 完全越界的框跳过
///
/// 返回实际绘制的框数
pub fn draw_overlay(image: &mut RgbaImage, state: &OverlayState, font: Option<&FontVec>) -> usize {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let mut drawn = 0;

    for rect in &state.rects {
        let x1 = rect.bbox.x.max(0.0);
        let y1 = rect.bbox.y.max(0.0);
        let x2 = rect.bbox.xmax().min(w);
        let y2 = rect.bbox.ymax().min(h);
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            continue;
        }

        let color = Rgba([rect.color[0], rect.color[1], rect.color[2], 255]);
        let (bw, bh) = ((x2 - x1) as i32, (y2 - y1) as i32);
        for i in 0..LINE_WIDTH {
            if bw - 2 * i < 1 || bh - 2 * i < 1 {
                break;
            }
            let r = Rect::at(x1 as i32 + i, y1 as i32 + i)
                .of_size((bw - 2 * i) as u32, (bh - 2 * i) as u32);
            draw_hollow_rect_mut(image, r, color);
        }

        if let Some(font) = font {
            let caption = format!("{} {:.2}", rect.label, rect.confidence);
            let scale = PxScale::from(FONT_SIZE);
            let (tw, th) = text_size(scale, font, &caption);
            let ty = (y1 as i32 - th as i32 - 4).max(0);
            draw_filled_rect_mut(
                image,
                Rect::at(x1 as i32, ty).of_size(tw.max(1) + 4, th.max(1) + 4),
                color,
            );
            draw_text_mut(
                image,
                Rgba([0, 0, 0, 255]),
                x1 as i32 + 2,
                ty + 2,
                scale,
                font,
                &caption,
            );
        }
        drawn += 1;
    }

    drawn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;
    use crate::overlay::AnnotatedRect;

    fn state(bbox: BBox) -> OverlayState {
        OverlayState {
            frame_id: Some(1),
            rects: vec![AnnotatedRect {
                label: "person".into(),
                confidence: 0.9,
                bbox,
                color: [255, 0, 0],
            }],
        }
    }

    #[test]
    fn test_draws_border() {
        let mut img = RgbaImage::new(100, 100);
        let drawn = draw_overlay(&mut img, &state(BBox::new(10.0, 10.0, 50.0, 80.0)), None);
        assert_eq!(drawn, 1);
        assert_eq!(*img.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(11, 50), Rgba([255, 0, 0, 255]));
        // 内部不填充
        assert_eq!(*img.get_pixel(30, 50), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_skips_out_of_bounds() {
        let mut img = RgbaImage::new(20, 20);
        let drawn = draw_overlay(&mut img, &state(BBox::new(50.0, 50.0, 10.0, 10.0)), None);
        assert_eq!(drawn, 0);
    }

    #[test]
    fn test_clips_partial() {
        let mut img = RgbaImage::new(20, 20);
        let drawn = draw_overlay(&mut img, &state(BBox::new(-5.0, -5.0, 15.0, 15.0)), None);
        assert_eq!(drawn, 1);
        assert_eq!(*img.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
    }
}
