use image::Rgba;

/// Parse the small subset of CSS colors designs use:
/// `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb()`, `rgba()` and a few names.
pub fn parse_color(text: &str) -> Option<Rgba<u8>> {
    let text = text.trim().to_ascii_lowercase();
    if let Some(hex) = text.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = text
        .strip_prefix("rgba(")
        .or_else(|| text.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |part: &str| part.parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0) as u8);
        let alpha = match parts.get(3) {
            Some(part) => (part.parse::<f64>().ok()?.clamp(0.0, 1.0) * 255.0).round() as u8,
            None => 255,
        };
        return Some(Rgba([
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
            alpha,
        ]));
    }
    match text.as_str() {
        "white" => Some(Rgba([255, 255, 255, 255])),
        "black" => Some(Rgba([0, 0, 0, 255])),
        "red" => Some(Rgba([255, 0, 0, 255])),
        "green" => Some(Rgba([0, 128, 0, 255])),
        "blue" => Some(Rgba([0, 0, 255, 255])),
        "gray" | "grey" => Some(Rgba([128, 128, 128, 255])),
        "transparent" => Some(Rgba([0, 0, 0, 0])),
        _ => None,
    }
}

fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    let digit = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok();
    let pair = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => Some(Rgba([digit(0)? * 17, digit(1)? * 17, digit(2)? * 17, 255])),
        6 => Some(Rgba([pair(0)?, pair(2)?, pair(4)?, 255])),
        8 => Some(Rgba([pair(0)?, pair(2)?, pair(4)?, pair(6)?])),
        _ => None,
    }
}
