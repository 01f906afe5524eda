//! Placeholder substitution over a [`Design`] and the engine that turns the
//! result into pixels.
//!
//! Anchor conventions (matched on the object `id`):
//! - `PLACEHOLDER-<field>`: text replaced by the participant field.
//! - anything containing `qr-anchor`: replaced by the participant QR code.
//! - `SIGNATURE-<signerId>`: replaced by that signer's signature image.
//! - other dashed rectangles containing `anchor`: authoring guides, removed.

use crate::color::parse_color;
use crate::config::RenderConfig;
use crate::design::{Design, DesignObject, GroupObject, ImageObject, ObjectProps, RectObject};
use crate::model::lookup_field;
use crate::rasterize::{self, Rasterizer};
use crate::Error;
use ab_glyph::FontArc;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Cursor;

pub const PLACEHOLDER_PREFIX: &str = "PLACEHOLDER-";
pub const SIGNATURE_PREFIX: &str = "SIGNATURE-";
pub const QR_ANCHOR: &str = "qr-anchor";
pub const ANCHOR: &str = "anchor";

/// Share of the anchor width covered by the watermark.
const WATERMARK_WIDTH_RATIO: f64 = 0.45;
const WATERMARK_OPACITY: f64 = 0.3;

/// Images composited into a design. Everything is optional.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderAssets<'a> {
    pub qr_code: Option<&'a [u8]>,
    /// Decrypted signature images keyed by signer id.
    pub signatures: Option<&'a HashMap<String, Vec<u8>>>,
    pub watermark: Option<&'a [u8]>,
    /// Images referenced by a non `data:` `src`, keyed by that `src`.
    pub images: Option<&'a HashMap<String, Vec<u8>>>,
}

enum Mode<'a> {
    Participant {
        fields: &'a Map<String, Value>,
        assets: RenderAssets<'a>,
    },
    Thumbnail,
}

/// Substitute one participant into the design. The input is not modified.
pub fn substitute(design: &Design, fields: &Map<String, Value>, assets: RenderAssets) -> Design {
    let mode = Mode::Participant { fields, assets };
    let mut design = design.clone();
    design.objects = substitute_objects(std::mem::take(&mut design.objects), &mode);
    design
}

/// Participant independent version: only removes authoring aids.
pub fn strip_for_thumbnail(design: &Design) -> Design {
    let mut design = design.clone();
    design.objects = substitute_objects(std::mem::take(&mut design.objects), &Mode::Thumbnail);
    design
}

fn substitute_objects(objects: Vec<DesignObject>, mode: &Mode) -> Vec<DesignObject> {
    objects
        .into_iter()
        .map(|object| substitute_object(object, mode))
        .filter(DesignObject::is_visible)
        .collect()
}

fn substitute_object(mut object: DesignObject, mode: &Mode) -> DesignObject {
    let id = object.id().unwrap_or_default().to_owned();

    if let Some(field) = id.strip_prefix(PLACEHOLDER_PREFIX) {
        let value = match mode {
            Mode::Participant { fields, .. } => lookup_field(fields, field),
            Mode::Thumbnail => None,
        };
        return replace_placeholder(object, value);
    }

    let is_qr_anchor = id.contains(QR_ANCHOR);
    if let Mode::Participant { assets, .. } = mode {
        if is_qr_anchor {
            return replace_qr_anchor(object, assets.qr_code);
        }
        if let Some(signer_id) = id.strip_prefix(SIGNATURE_PREFIX) {
            if let Some(image) = assets.signatures.and_then(|map| map.get(signer_id)) {
                return replace_signature_anchor(object, image, assets.watermark);
            }
            return object;
        }
    }

    if is_decorative_anchor(&object, &id, is_qr_anchor) {
        object.hide();
        return object;
    }

    if let DesignObject::Group(group) = &mut object {
        group.objects = substitute_objects(std::mem::take(&mut group.objects), mode);
    }
    object
}

fn is_decorative_anchor(object: &DesignObject, id: &str, is_qr_anchor: bool) -> bool {
    match object {
        DesignObject::Rect(rect) => {
            id.contains(ANCHOR) && !is_qr_anchor && rect.props.has_dashed_stroke()
        }
        _ => false,
    }
}

fn replace_placeholder(object: DesignObject, value: Option<String>) -> DesignObject {
    match object {
        DesignObject::Group(mut group) => {
            group.objects.retain(|child| match child {
                DesignObject::Rect(rect) => !is_placeholder_border(rect),
                _ => true,
            });
            if let Some(value) = value {
                match group.objects.iter_mut().find_map(|child| match child {
                    DesignObject::Text(text) => Some(text),
                    _ => None,
                }) {
                    Some(text) => text.text = value,
                    None => log::debug!(
                        "Placeholder `{:?}` has no text child.",
                        group.props.id
                    ),
                }
            }
            DesignObject::Group(group)
        }
        DesignObject::Text(mut text) => {
            if let Some(value) = value {
                text.text = value;
            }
            DesignObject::Text(text)
        }
        other => other,
    }
}

/// The authoring border of a placeholder: dashed, or an outline without a visible fill.
fn is_placeholder_border(rect: &RectObject) -> bool {
    let filled = match &rect.props.fill {
        None | Some(Value::Null) => false,
        Some(Value::String(fill)) if fill.trim().is_empty() => false,
        Some(Value::String(fill)) => parse_color(fill).map_or(true, |color| color[3] > 0),
        // Gradients and patterns.
        Some(_) => true,
    };
    rect.props.has_dashed_stroke() || !filled
}

fn replace_qr_anchor(mut object: DesignObject, qr_code: Option<&[u8]>) -> DesignObject {
    let (qr_code, props) = match (qr_code, object.props()) {
        (Some(qr_code), Some(props)) => (qr_code, props),
        _ => {
            object.hide();
            return object;
        }
    };
    let (width, height) = props.scaled_size();
    let mut props = props.clone();
    props.kind = "image".to_owned();
    props.width = width;
    props.height = height;
    props.scale_x = 1.0;
    props.scale_y = 1.0;
    props.fill = None;
    props.clear_stroke();
    DesignObject::Image(ImageObject {
        props,
        src: data_url(qr_code),
    })
}

fn replace_signature_anchor(
    object: DesignObject,
    signature: &[u8],
    watermark: Option<&[u8]>,
) -> DesignObject {
    let anchor = match object.props() {
        Some(props) => props.clone(),
        None => return object,
    };
    let (width, height) = anchor.scaled_size();
    if width <= 0.0 {
        log::debug!("Signature anchor `{:?}` has no width.", anchor.id);
        return object;
    }

    let mut children = Vec::with_capacity(2);
    // Same aspect ratio as the anchor unless the image says otherwise.
    let signature_height = aspect_height(signature, width).unwrap_or(height);
    let mut signature_props = ObjectProps::new("image");
    signature_props.left = -width / 2.0;
    signature_props.top = -signature_height / 2.0;
    signature_props.width = width;
    signature_props.height = signature_height;
    children.push(DesignObject::Image(ImageObject {
        props: signature_props,
        src: data_url(signature),
    }));

    if let Some(watermark) = watermark {
        let watermark_width = width * WATERMARK_WIDTH_RATIO;
        let watermark_height = aspect_height(watermark, watermark_width).unwrap_or(watermark_width);
        let mut watermark_props = ObjectProps::new("image");
        watermark_props.left = -watermark_width / 2.0;
        watermark_props.top = -watermark_height / 2.0;
        watermark_props.width = watermark_width;
        watermark_props.height = watermark_height;
        watermark_props.opacity = WATERMARK_OPACITY;
        watermark_props.angle = 0.0;
        children.push(DesignObject::Image(ImageObject {
            props: watermark_props,
            src: data_url(watermark),
        }));
    }

    let mut props = anchor;
    props.kind = "group".to_owned();
    props.width = width;
    props.height = height;
    props.scale_x = 1.0;
    props.scale_y = 1.0;
    props.fill = None;
    props.clear_stroke();
    DesignObject::Group(GroupObject {
        props,
        objects: children,
    })
}

/// Height of the image when scaled to `width`, from its own dimensions.
fn aspect_height(bytes: &[u8], width: f64) -> Option<f64> {
    let (w, h) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    (w > 0).then(|| width * f64::from(h) / f64::from(w))
}

pub(crate) fn data_url(bytes: &[u8]) -> String {
    let mime = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Owns everything rendering needs. Cheap to share between threads.
#[derive(Clone)]
pub struct TemplateEngine {
    options: RenderConfig,
    font: Option<FontArc>,
}

impl TemplateEngine {
    pub fn new(options: RenderConfig) -> Self {
        TemplateEngine {
            options,
            font: None,
        }
    }

    /// Engine with the font from `options.font_path` loaded, if set.
    pub fn from_config(options: &RenderConfig) -> Result<Self, Error> {
        let engine = TemplateEngine::new(options.clone());
        match &options.font_path {
            Some(path) => engine.with_font(std::fs::read(path)?),
            None => Ok(engine),
        }
    }

    pub fn with_font(mut self, font: Vec<u8>) -> Result<Self, Error> {
        let font = FontArc::try_from_vec(font)
            .map_err(|err| Error::Config(format!("Font could not be loaded: {}", err)))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn options(&self) -> &RenderConfig {
        &self.options
    }

    /// Substitute and rasterize one participant at the full render scale.
    pub fn render(
        &self,
        design: &Design,
        fields: &Map<String, Value>,
        assets: RenderAssets,
    ) -> Result<Vec<u8>, Error> {
        let rendered = substitute(design, fields, assets);
        self.rasterize_png(&rendered, self.options.multiplier, assets.images)
    }

    /// Same as [`render`](Self::render) but parses the stored design first.
    pub fn render_json(
        &self,
        design_json: &str,
        fields: &Map<String, Value>,
        assets: RenderAssets,
    ) -> Result<Vec<u8>, Error> {
        self.render(&Design::parse(design_json)?, fields, assets)
    }

    /// Owner preview: one participant with every signature, at preview scale.
    pub fn preview(
        &self,
        design: &Design,
        fields: &Map<String, Value>,
        assets: RenderAssets,
    ) -> Result<Vec<u8>, Error> {
        let rendered = substitute(design, fields, assets);
        self.rasterize_png(&rendered, self.options.preview_multiplier, assets.images)
    }

    /// Participant independent preview that fits in the thumbnail box.
    pub fn thumbnail(&self, design_json: &str) -> Result<Vec<u8>, Error> {
        let design = strip_for_thumbnail(&Design::parse(design_json)?);
        let (width, height) = design.canvas_size();
        let max = f64::from(self.options.thumbnail_max);
        let scale = (max / width).min(max / height).min(1.0);
        self.rasterize_png(&design, scale, None)
    }

    fn rasterize_png(
        &self,
        design: &Design,
        scale: f64,
        images: Option<&HashMap<String, Vec<u8>>>,
    ) -> Result<Vec<u8>, Error> {
        let rasterizer = Rasterizer::new(self.font.as_ref(), images);
        let canvas = rasterizer.rasterize(design, scale)?;
        rasterize::encode_png(&canvas)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    /// Objects whose ids match none of the anchor conventions.
    fn plain_object() -> impl Strategy<Value = Value> {
        let id = "[a-z]{1,6}(-[a-z]{1,6})?".prop_filter("not an anchor", |id| !id.contains(ANCHOR));
        (
            prop_oneof![Just("rect"), Just("textbox"), Just("circle"), Just("image")],
            id,
            0i32..400,
            0i32..300,
            "[A-Za-z ]{0,12}",
        )
            .prop_map(|(kind, id, left, top, text)| {
                json!({"type": kind, "id": id, "left": left, "top": top,
                       "width": 20, "height": 10, "text": text, "src": "logo.png"})
            })
    }

    fn parse(objects: Vec<Value>) -> Design {
        Design::parse(&json!({"width": 400, "height": 300, "objects": objects}).to_string())
            .unwrap()
    }

    proptest! {
        #[test]
        fn unmatched_objects_are_never_touched(
            objects in prop::collection::vec(plain_object(), 0..12),
            name in "[A-Za-z]{0,10}",
        ) {
            let input = parse(objects);
            let fields = json!({"name": name}).as_object().cloned().unwrap();
            let qr_code = [0x89u8, b'P', b'N', b'G'];
            let assets = RenderAssets {
                qr_code: Some(&qr_code),
                ..RenderAssets::default()
            };
            prop_assert_eq!(substitute(&input, &fields, assets), input);
        }

        #[test]
        fn substitution_is_idempotent(
            objects in prop::collection::vec(plain_object(), 0..6),
            name in "[A-Za-z ]{0,10}",
        ) {
            let mut objects = objects;
            objects.push(json!({
                "type": "group", "id": "PLACEHOLDER-name", "width": 200, "height": 40,
                "objects": [
                    {"type": "rect", "width": 200, "height": 40, "stroke": "#999"},
                    {"type": "text", "text": "{name}"}
                ]
            }));
            objects.push(json!({"type": "text", "id": "PLACEHOLDER-course", "text": "{course}"}));
            let input = parse(objects);
            let fields = json!({"name": name}).as_object().cloned().unwrap();

            let once = substitute(&input, &fields, RenderAssets::default());
            let twice = substitute(&once, &fields, RenderAssets::default());
            prop_assert_eq!(twice, once);
        }
    }
}
