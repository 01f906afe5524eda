//! Draws a [`Design`] onto an RGBA canvas and encodes it as PNG.
//!
//! Supports rectangles, images and text. Groups position their children
//! relative to the group center. Rotation is not applied.

use crate::color::parse_color;
use crate::design::{Design, DesignObject, ImageObject, ObjectProps, RectObject, TextObject};
use crate::Error;
use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Maps design coordinates of one nesting level onto canvas pixels.
#[derive(Debug, Clone, Copy)]
struct Frame {
    origin_x: f64,
    origin_y: f64,
    scale_x: f64,
    scale_y: f64,
    opacity: f64,
}

/// Pixel box of an object on the canvas.
#[derive(Debug, Clone, Copy)]
struct PixelBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub struct Rasterizer<'a> {
    font: Option<&'a FontArc>,
    images: Option<&'a HashMap<String, Vec<u8>>>,
}

impl<'a> Rasterizer<'a> {
    pub fn new(font: Option<&'a FontArc>, images: Option<&'a HashMap<String, Vec<u8>>>) -> Self {
        Rasterizer { font, images }
    }

    pub fn rasterize(&self, design: &Design, scale: f64) -> Result<RgbaImage, Error> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::Render(format!("invalid render scale {}", scale)));
        }
        let (width, height) = design.canvas_size();
        let width = to_pixels(width * scale)?;
        let height = to_pixels(height * scale)?;
        let background = design
            .background
            .as_deref()
            .and_then(parse_color)
            .unwrap_or(WHITE);
        let mut canvas = RgbaImage::from_pixel(width, height, background);

        let frame = Frame {
            origin_x: 0.0,
            origin_y: 0.0,
            scale_x: scale,
            scale_y: scale,
            opacity: 1.0,
        };
        for object in &design.objects {
            self.draw_object(&mut canvas, object, frame);
        }
        Ok(canvas)
    }

    fn draw_object(&self, canvas: &mut RgbaImage, object: &DesignObject, frame: Frame) {
        let props = match object.props() {
            Some(props) if props.visible => props,
            _ => return,
        };
        let bounds = pixel_box(props, frame);
        let opacity = frame.opacity * props.opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 {
            return;
        }

        match object {
            DesignObject::Rect(rect) => draw_rect(canvas, rect, bounds, frame, opacity),
            DesignObject::Image(image) => self.draw_image(canvas, image, bounds, opacity),
            DesignObject::Text(text) => self.draw_text(canvas, text, bounds, frame, opacity),
            DesignObject::Group(group) => {
                let inner = Frame {
                    origin_x: bounds.x + bounds.width / 2.0,
                    origin_y: bounds.y + bounds.height / 2.0,
                    scale_x: frame.scale_x * props.scale_x,
                    scale_y: frame.scale_y * props.scale_y,
                    opacity,
                };
                for child in &group.objects {
                    self.draw_object(canvas, child, inner);
                }
            }
            DesignObject::Unknown(_) => {}
        }
    }

    fn draw_image(
        &self,
        canvas: &mut RgbaImage,
        image: &ImageObject,
        bounds: PixelBox,
        opacity: f64,
    ) {
        let width = bounds.width.round();
        let height = bounds.height.round();
        if !(width.is_finite() && height.is_finite()) || width < 1.0 || height < 1.0 {
            return;
        }
        let left = bounds.x.round() as i64;
        let top = bounds.y.round() as i64;
        let (width, height) = (width as i64, height as i64);

        // Only the part of the box that lands on the canvas is resampled.
        let visible_left = left.max(0);
        let visible_top = top.max(0);
        let visible_right = (left + width).min(i64::from(canvas.width()));
        let visible_bottom = (top + height).min(i64::from(canvas.height()));
        if visible_left >= visible_right || visible_top >= visible_bottom {
            return;
        }

        let decoded = match self.load_image(&image.src) {
            Some(decoded) if decoded.width() > 0 && decoded.height() > 0 => decoded,
            _ => {
                log::warn!(
                    "Skipping image `{:?}`, it could not be decoded.",
                    image.props.id
                );
                return;
            }
        };
        let (source_x, source_width) = source_span(
            visible_left - left,
            visible_right - left,
            width,
            decoded.width(),
        );
        let (source_y, source_height) = source_span(
            visible_top - top,
            visible_bottom - top,
            height,
            decoded.height(),
        );
        let window =
            image::imageops::crop_imm(&decoded, source_x, source_y, source_width, source_height)
                .to_image();
        let resized = image::imageops::resize(
            &window,
            (visible_right - visible_left) as u32,
            (visible_bottom - visible_top) as u32,
            FilterType::Triangle,
        );
        for (x, y, pixel) in resized.enumerate_pixels() {
            blend(
                canvas,
                visible_left + i64::from(x),
                visible_top + i64::from(y),
                *pixel,
                opacity,
            );
        }
    }

    fn load_image(&self, src: &str) -> Option<RgbaImage> {
        let (mime, bytes) = match src.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',')?;
                let mime = header.split(';').next().unwrap_or_default().to_owned();
                (Some(mime), STANDARD.decode(payload.trim()).ok()?)
            }
            None => (None, self.images?.get(src)?.clone()),
        };
        decode_image(&bytes, mime.as_deref())
    }

    fn draw_text(
        &self,
        canvas: &mut RgbaImage,
        text: &TextObject,
        bounds: PixelBox,
        frame: Frame,
        opacity: f64,
    ) {
        let font = match self.font {
            Some(font) => font,
            None => {
                log::debug!("No font configured, skipping text `{:?}`.", text.props.id);
                return;
            }
        };
        let px = (text.font_size * frame.scale_y * text.props.scale_y) as f32;
        if px <= 0.0 || text.text.is_empty() {
            return;
        }
        let color = text
            .props
            .fill_color()
            .and_then(parse_color)
            .unwrap_or(BLACK);
        let scale = PxScale::from(px);
        let scaled = font.as_scaled(scale);
        let line_height = scaled.height() + scaled.line_gap();

        for (index, line) in text.text.lines().enumerate() {
            let line_width = line_width(&scaled, line);
            let offset = match text.text_align.as_deref() {
                Some("center") => (bounds.width as f32 - line_width) / 2.0,
                Some("right") => bounds.width as f32 - line_width,
                _ => 0.0,
            };
            let baseline = bounds.y as f32 + scaled.ascent() + line_height * index as f32;
            let mut caret = bounds.x as f32 + offset.max(0.0);
            let mut previous = None;

            for c in line.chars() {
                let id = scaled.glyph_id(c);
                if let Some(previous) = previous {
                    caret += scaled.kern(previous, id);
                }
                let glyph = id.with_scale_and_position(scale, point(caret, baseline));
                caret += scaled.h_advance(id);
                previous = Some(id);

                if let Some(outlined) = font.outline_glyph(glyph) {
                    let glyph_bounds = outlined.px_bounds();
                    outlined.draw(|x, y, coverage| {
                        blend(
                            canvas,
                            glyph_bounds.min.x as i64 + i64::from(x),
                            glyph_bounds.min.y as i64 + i64::from(y),
                            color,
                            opacity * f64::from(coverage),
                        );
                    });
                }
            }
        }
    }
}

fn line_width<F: Font, SF: ScaleFont<F>>(scaled: &SF, line: &str) -> f32 {
    let mut width = 0.0;
    let mut previous = None;
    for c in line.chars() {
        let id = scaled.glyph_id(c);
        if let Some(previous) = previous {
            width += scaled.kern(previous, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

fn draw_rect(
    canvas: &mut RgbaImage,
    rect: &RectObject,
    bounds: PixelBox,
    frame: Frame,
    opacity: f64,
) {
    if let Some(fill) = rect.props.fill_color().and_then(parse_color) {
        fill_box(canvas, bounds, fill, opacity);
    }
    let stroke = rect.props.stroke.as_deref().and_then(parse_color);
    let stroke_width = rect.props.stroke_width.unwrap_or(1.0) * frame.scale_x;
    if let (Some(stroke), true) = (stroke, stroke_width > 0.0) {
        let PixelBox {
            x,
            y,
            width,
            height,
        } = bounds;
        let edges = [
            PixelBox {
                x,
                y,
                width,
                height: stroke_width,
            },
            PixelBox {
                x,
                y: y + height - stroke_width,
                width,
                height: stroke_width,
            },
            PixelBox {
                x,
                y,
                width: stroke_width,
                height,
            },
            PixelBox {
                x: x + width - stroke_width,
                y,
                width: stroke_width,
                height,
            },
        ];
        for edge in edges {
            fill_box(canvas, edge, stroke, opacity);
        }
    }
}

fn pixel_box(props: &ObjectProps, frame: Frame) -> PixelBox {
    let (width, height) = props.scaled_size();
    let anchor = |key: &str, size: f64| match props.extra.get(key).and_then(|v| v.as_str()) {
        Some("center") => size / 2.0,
        Some("right") | Some("bottom") => size,
        _ => 0.0,
    };
    let left = props.left - anchor("originX", width);
    let top = props.top - anchor("originY", height);
    PixelBox {
        x: frame.origin_x + left * frame.scale_x,
        y: frame.origin_y + top * frame.scale_y,
        width: width * frame.scale_x,
        height: height * frame.scale_y,
    }
}

/// Source pixels `(start, len)` covering `[from, to)` of a box `target_len` pixels wide.
fn source_span(from: i64, to: i64, target_len: i64, source_len: u32) -> (u32, u32) {
    let ratio = f64::from(source_len) / target_len as f64;
    let start = ((from as f64 * ratio).floor() as u32).min(source_len - 1);
    let end = ((to as f64 * ratio).ceil() as u32).clamp(start + 1, source_len);
    (start, end - start)
}

fn fill_box(canvas: &mut RgbaImage, bounds: PixelBox, color: Rgba<u8>, opacity: f64) {
    let x0 = bounds.x.round() as i64;
    let y0 = bounds.y.round() as i64;
    let x1 = (bounds.x + bounds.width).round() as i64;
    let y1 = (bounds.y + bounds.height).round() as i64;
    let x0 = x0.max(0);
    let y0 = y0.max(0);
    let x1 = x1.min(i64::from(canvas.width()));
    let y1 = y1.min(i64::from(canvas.height()));
    for y in y0..y1 {
        for x in x0..x1 {
            blend(canvas, x, y, color, opacity);
        }
    }
}

/// Source-over compositing of `color` at `opacity` onto one pixel.
fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, opacity: f64) {
    if x < 0 || y < 0 || x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
        return;
    }
    let alpha = f64::from(color[3]) / 255.0 * opacity.clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let pixel = canvas.get_pixel_mut(x as u32, y as u32);
    let dst_alpha = f64::from(pixel[3]) / 255.0;
    let out_alpha = alpha + dst_alpha * (1.0 - alpha);
    for channel in 0..3 {
        let src = f64::from(color[channel]);
        let dst = f64::from(pixel[channel]);
        let mixed = (src * alpha + dst * dst_alpha * (1.0 - alpha)) / out_alpha;
        pixel[channel] = mixed.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

fn to_pixels(size: f64) -> Result<u32, Error> {
    let size = size.round();
    if !(1.0..=f64::from(u16::MAX)).contains(&size) {
        return Err(Error::Render(format!("canvas size {} out of range", size)));
    }
    Ok(size as u32)
}

/// Decode by content first, then by the declared type, then PNG and JPEG.
pub(crate) fn decode_image(bytes: &[u8], mime: Option<&str>) -> Option<RgbaImage> {
    if let Ok(image) = image::load_from_memory(bytes) {
        return Some(image.to_rgba8());
    }
    let declared = mime.and_then(ImageFormat::from_mime_type);
    declared
        .into_iter()
        .chain([ImageFormat::Png, ImageFormat::Jpeg])
        .find_map(|format| image::load_from_memory_with_format(bytes, format).ok())
        .map(|image| image.to_rgba8())
}

/// Encode an RGBA canvas as an 8 bit PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(image.as_raw())?;
        writer.finish()?;
    }
    Ok(out)
}
