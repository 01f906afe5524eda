//! Typed view of a certificate design (a fabric style canvas JSON).
//!
//! Objects that are not understood, or that fail to parse, are kept as
//! [`DesignObject::Unknown`] and written back verbatim. Unknown keys of
//! known objects are kept in `extra`.

use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Canvas size used when the design does not declare one.
pub const FALLBACK_WIDTH: f64 = 2000.0;
pub const FALLBACK_HEIGHT: f64 = 1414.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    #[serde(default)]
    pub objects: Vec<DesignObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Design {
    /// Parse a stored design. Only a top-level problem is an error.
    pub fn parse(json: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(json)
            .map_err(|err| Error::InvalidTemplate(format!("design is not JSON: {}", err)))?;
        let root = match value {
            Value::Object(root) => root,
            other => {
                return Err(Error::InvalidTemplate(format!(
                    "design root must be an object, got `{}`",
                    json_kind(&other)
                )))
            }
        };
        if let Some(objects) = root.get("objects") {
            if !objects.is_array() {
                return Err(Error::InvalidTemplate(
                    "`objects` must be an array".to_owned(),
                ));
            }
        }
        serde_json::from_value(Value::Object(root))
            .map_err(|err| Error::InvalidTemplate(err.to_string()))
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn canvas_size(&self) -> (f64, f64) {
        let width = self.width.filter(|w| *w > 0.0).unwrap_or(FALLBACK_WIDTH);
        let height = self.height.filter(|h| *h > 0.0).unwrap_or(FALLBACK_HEIGHT);
        (width, height)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn one() -> f64 {
    1.0
}

fn yes() -> bool {
    true
}

/// Fields shared by every drawable object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectProps {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default = "one")]
    pub scale_x: f64,
    #[serde(default = "one")]
    pub scale_y: f64,
    #[serde(default)]
    pub angle: f64,
    #[serde(default = "one")]
    pub opacity: f64,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_dash_array: Option<Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectProps {
    pub fn new(kind: &str) -> Self {
        ObjectProps {
            kind: kind.to_owned(),
            id: None,
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
            opacity: 1.0,
            visible: true,
            fill: None,
            stroke: None,
            stroke_width: None,
            stroke_dash_array: None,
            extra: Map::new(),
        }
    }

    /// Size on the canvas after scaling.
    pub fn scaled_size(&self) -> (f64, f64) {
        (self.width * self.scale_x, self.height * self.scale_y)
    }

    pub fn has_dashed_stroke(&self) -> bool {
        self.stroke_dash_array
            .as_ref()
            .map(|dashes| dashes.iter().any(|dash| *dash > 0.0))
            .unwrap_or(false)
    }

    pub fn clear_stroke(&mut self) {
        self.stroke = None;
        self.stroke_width = Some(0.0);
        self.stroke_dash_array = None;
    }

    pub fn fill_color(&self) -> Option<&str> {
        self.fill.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextObject {
    #[serde(flatten)]
    pub props: ObjectProps,
    #[serde(default)]
    pub text: String,
    #[serde(default = "TextObject::default_font_size")]
    pub font_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_align: Option<String>,
}

impl TextObject {
    fn default_font_size() -> f64 {
        40.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageObject {
    #[serde(flatten)]
    pub props: ObjectProps,
    #[serde(default)]
    pub src: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectObject {
    #[serde(flatten)]
    pub props: ObjectProps,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupObject {
    #[serde(flatten)]
    pub props: ObjectProps,
    #[serde(default)]
    pub objects: Vec<DesignObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DesignObject {
    Text(TextObject),
    Image(ImageObject),
    Rect(RectObject),
    Group(GroupObject),
    /// Anything else, written back untouched.
    Unknown(Value),
}

impl DesignObject {
    pub fn props(&self) -> Option<&ObjectProps> {
        match self {
            DesignObject::Text(text) => Some(&text.props),
            DesignObject::Image(image) => Some(&image.props),
            DesignObject::Rect(rect) => Some(&rect.props),
            DesignObject::Group(group) => Some(&group.props),
            DesignObject::Unknown(_) => None,
        }
    }

    pub fn props_mut(&mut self) -> Option<&mut ObjectProps> {
        match self {
            DesignObject::Text(text) => Some(&mut text.props),
            DesignObject::Image(image) => Some(&mut image.props),
            DesignObject::Rect(rect) => Some(&mut rect.props),
            DesignObject::Group(group) => Some(&mut group.props),
            DesignObject::Unknown(_) => None,
        }
    }

    /// The `id` of the object, also for unknown objects.
    pub fn id(&self) -> Option<&str> {
        match self {
            DesignObject::Unknown(value) => value.get("id").and_then(Value::as_str),
            other => other.props().and_then(|props| props.id.as_deref()),
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            DesignObject::Unknown(value) => value
                .get("visible")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            other => other.props().map(|props| props.visible).unwrap_or(true),
        }
    }

    pub fn hide(&mut self) {
        match self {
            DesignObject::Unknown(Value::Object(map)) => {
                map.insert("visible".to_owned(), Value::Bool(false));
            }
            DesignObject::Unknown(_) => {}
            other => {
                if let Some(props) = other.props_mut() {
                    props.visible = false;
                }
            }
        }
    }
}

impl From<Value> for DesignObject {
    fn from(value: Value) -> Self {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let parsed = match kind.as_str() {
            "text" | "i-text" | "textbox" => {
                serde_json::from_value(value.clone()).map(DesignObject::Text)
            }
            "image" => serde_json::from_value(value.clone()).map(DesignObject::Image),
            "rect" => serde_json::from_value(value.clone()).map(DesignObject::Rect),
            "group" => serde_json::from_value(value.clone()).map(DesignObject::Group),
            _ => return DesignObject::Unknown(value),
        };
        parsed.unwrap_or_else(|err| {
            log::debug!("Keeping `{}` object as is, it does not parse: {}", kind, err);
            DesignObject::Unknown(value)
        })
    }
}

impl<'de> Deserialize<'de> for DesignObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(DesignObject::from(Value::deserialize(deserializer)?))
    }
}

impl Serialize for DesignObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DesignObject::Text(text) => text.serialize(serializer),
            DesignObject::Image(image) => image.serialize(serializer),
            DesignObject::Rect(rect) => rect.serialize(serializer),
            DesignObject::Group(group) => group.serialize(serializer),
            DesignObject::Unknown(value) => value.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_kinds_and_keeps_unknown() {
        let design = Design::parse(
            &json!({
                "version": "5.3.0",
                "width": 800,
                "height": 600,
                "objects": [
                    {"type": "textbox", "id": "title", "text": "Hello", "left": 10, "charSpacing": 3},
                    {"type": "rect", "width": 5, "height": 5, "fill": "#fff"},
                    {"type": "group", "objects": [{"type": "text", "text": "x"}]},
                    {"type": "circle", "radius": 4},
                    {"type": "image", "left": "not a number"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(design.canvas_size(), (800.0, 600.0));
        assert!(matches!(design.objects[0], DesignObject::Text(_)));
        assert!(matches!(design.objects[1], DesignObject::Rect(_)));
        assert!(matches!(design.objects[2], DesignObject::Group(_)));
        assert!(matches!(design.objects[3], DesignObject::Unknown(_)));
        assert!(matches!(design.objects[4], DesignObject::Unknown(_)));

        let written: Value = serde_json::from_str(&design.to_json().unwrap()).unwrap();
        assert_eq!(written["version"], "5.3.0");
        assert_eq!(written["objects"][0]["charSpacing"], 3);
        assert_eq!(written["objects"][3], json!({"type": "circle", "radius": 4}));
        assert_eq!(written["objects"][4]["left"], "not a number");
    }

    #[test]
    fn malformed_top_level_is_invalid_template() {
        for bad in ["{", "[]", "42", r#"{"objects": {}}"#] {
            assert!(
                matches!(Design::parse(bad), Err(Error::InvalidTemplate(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn missing_size_falls_back() {
        let design = Design::parse(r#"{"objects": []}"#).unwrap();
        assert_eq!(design.canvas_size(), (FALLBACK_WIDTH, FALLBACK_HEIGHT));
    }
}
