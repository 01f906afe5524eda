use crate::model::ParticipantId;
use crate::rasterize::encode_png;
use crate::Error;
use image::{Rgba, RgbaImage};
use qrcode::{Color, QrCode};

/// Modules of white space around the code.
const QUIET_ZONE: u32 = 4;

/// Link a participant's QR code points to.
pub fn verification_url(base_url: &str, participant_id: ParticipantId) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), participant_id)
}

/// Render `data` as a black on white QR code PNG.
pub fn render_png(data: &str, module_px: u32) -> Result<Vec<u8>, Error> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|err| Error::Render(format!("QR code could not be built: {}", err)))?;
    let modules = u32::try_from(code.width())?;
    let module_px = module_px.max(1);
    let size = (modules + 2 * QUIET_ZONE) * module_px;

    let mut image = RgbaImage::from_pixel(size, size, Rgba([255, 255, 255, 255]));
    for (index, color) in code.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let index = u32::try_from(index)?;
        let left = (index % modules + QUIET_ZONE) * module_px;
        let top = (index / modules + QUIET_ZONE) * module_px;
        for y in top..top + module_px {
            for x in left..left + module_px {
                image.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
    }
    encode_png(&image)
}
