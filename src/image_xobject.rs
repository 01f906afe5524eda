// This code is inspired by https://github.com/fschutt/printpdf/blob/2bebdc65d06dafbe926ed4b43fedd10f966c59d3/src/xobject.rs

use crate::Error;
use lopdf::ObjectId;
use png::{BitDepth, ColorType, Transformations};
use std::io::Read;

#[derive(Debug, Clone)]
pub struct ImageXObject {
    /// Width of the image (original width, not scaled width)
    pub width: u32,
    /// Height of the image (original height, not scaled height)
    pub height: u32,
    /// Color space (Greyscale or RGB), alpha is split off into a mask.
    pub color_space: ColorType,
    /// Always 8 after decoding.
    pub bits_per_component: BitDepth,
    /// Should the image be interpolated when scaled?
    pub interpolate: bool,
    /// The actual data from the image
    pub image_data: Vec<u8>,
    /// Image used as a soft mask. (transparency)
    pub s_mask: Option<ObjectId>,
}

impl ImageXObject {
    /// Returns 1 or 2 images. The first is the color images.
    /// The second is (if present) the mask/alpha channel of the image.
    pub fn try_from<R: Read>(
        mut image_decoder: png::Decoder<R>,
    ) -> Result<(Self, Option<Self>), Error> {
        // Palette and 16 bit images are normalized to 8 bit gray or RGB.
        image_decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
        let mut image_reader = image_decoder.read_info()?;
        let mut buf = vec![0; image_reader.output_buffer_size()];
        // Only the first frame of an APNG is used.
        let info = image_reader.next_frame(&mut buf)?;
        buf.truncate(info.buffer_size());

        let (color_space, image_data, alpha_data) = match info.color_type {
            ColorType::Rgba => (
                ColorType::Rgb,
                split_color(&buf, 4, 3),
                Some(split_alpha(&buf, 4)),
            ),
            ColorType::GrayscaleAlpha => (
                ColorType::Grayscale,
                split_color(&buf, 2, 1),
                Some(split_alpha(&buf, 2)),
            ),
            ColorType::Rgb | ColorType::Grayscale => (info.color_type, buf, None),
            ColorType::Indexed => {
                return Err(Error::Png("indexed image was not expanded".to_owned()))
            }
        };

        Ok((
            Self {
                width: info.width,
                height: info.height,
                color_space,
                bits_per_component: info.bit_depth,
                image_data,
                interpolate: false,
                s_mask: None, // This should be filled in later
            },
            alpha_data.map(|alpha_data| Self {
                width: info.width,
                height: info.height,
                color_space: ColorType::Grayscale,
                bits_per_component: info.bit_depth,
                image_data: alpha_data,
                interpolate: false,
                s_mask: None,
            }),
        ))
    }
}

/// Keep the first `keep` bytes of every `stride` byte pixel.
fn split_color(data: &[u8], stride: usize, keep: usize) -> Vec<u8> {
    data.chunks_exact(stride)
        .flat_map(|pixel| &pixel[..keep])
        .copied()
        .collect()
}

/// Last byte of every pixel.
fn split_alpha(data: &[u8], stride: usize) -> Vec<u8> {
    data.chunks_exact(stride).map(|pixel| pixel[stride - 1]).collect()
}

// Inspired and derived from: https://github.com/fschutt/printpdf/blob/2bebdc65d06dafbe926ed4b43fedd10f966c59d3/src/xobject.rs#L245
impl From<ImageXObject> for lopdf::Stream {
    fn from(image: ImageXObject) -> Self {
        use lopdf::Object::*;

        let cs: &'static str = match image.color_space {
            ColorType::Rgb | ColorType::Rgba => "DeviceRGB",
            _ => "DeviceGray",
        };

        let mut dict = lopdf::Dictionary::from_iter(vec![
            ("Type", Name("XObject".as_bytes().to_vec())),
            ("Subtype", Name("Image".as_bytes().to_vec())),
            ("Width", Integer(image.width as i64)),
            ("Height", Integer(image.height as i64)),
            ("Interpolate", image.interpolate.into()),
            ("BitsPerComponent", Integer(image.bits_per_component as i64)),
            ("ColorSpace", Name(cs.as_bytes().to_vec())),
        ]);
        if let Some(s_mask) = image.s_mask {
            dict.set("SMask", Reference(s_mask));
        }

        let mut stream = lopdf::Stream::new(dict, image.image_data);
        // Raw samples compress well and a full page render is large.
        if let Err(err) = stream.compress() {
            log::debug!("Image stream left uncompressed: {}", err);
        }
        stream
    }
}

impl From<ImageXObject> for lopdf::Object {
    fn from(image: ImageXObject) -> Self {
        lopdf::Object::Stream(image.into())
    }
}
