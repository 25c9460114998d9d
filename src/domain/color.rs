use std::fmt;

/// CIE 1931 chromaticity coordinate.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub fn new(x: f64, y: f64) -> Self {
        Xy { x, y }
    }
}

impl fmt::Display for Xy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Color gamut triangle of a light, in chromaticity space.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct Gamut {
    red: Xy,
    green: Xy,
    blue: Xy,
}

impl Gamut {
    /// Returns `None` for degenerate triangles (two vertices coincide).
    pub fn new(red: Xy, green: Xy, blue: Xy) -> Option<Self> {
        if red == green || green == blue || blue == red {
            return None;
        }
        Some(Gamut { red, green, blue })
    }

    pub fn red(&self) -> &Xy {
        &self.red
    }

    pub fn green(&self) -> &Xy {
        &self.green
    }

    pub fn blue(&self) -> &Xy {
        &self.blue
    }
}

/// Converts gamma-corrected sRGB (0–255) to an xy chromaticity plus the Y
/// luminance component.
pub fn rgb_to_xy(red: u8, green: u8, blue: u8) -> (Xy, f64) {
    // Convert to linear RGB
    let r = gamma_correct(red as f64 / 255.0);
    let g = gamma_correct(green as f64 / 255.0);
    let b = gamma_correct(blue as f64 / 255.0);

    // Convert to XYZ using sRGB D65
    let x = r * 0.4124 + g * 0.3576 + b * 0.1805;
    let y = r * 0.2126 + g * 0.7152 + b * 0.0722; // this is luminance
    let z = r * 0.0193 + g * 0.1192 + b * 0.9505;

    let sum = x + y + z;
    let (cx, cy) = if sum == 0.0 { (0.0, 0.0) } else { (x / sum, y / sum) };

    (Xy::new(cx, cy), y)
}

/// Converts xy + Y (luminance) back to gamma-corrected sRGB (0–255).
/// Result is lossless as long as the same gamma and transform are used.
pub fn xy_to_rgb(xy: &Xy, brightness: f64) -> (u8, u8, u8) {
    if xy.y == 0.0 {
        return (0, 0, 0);
    }

    let x = xy.x;
    let y = xy.y;
    let z = 1.0 - x - y;

    #[allow(non_snake_case)]
    let X = (brightness / y) * x;
    #[allow(non_snake_case)]
    let Y = brightness;
    #[allow(non_snake_case)]
    let Z = (brightness / y) * z;

    // Convert back to linear sRGB
    let r_lin = X * 3.2406 + Y * -1.5372 + Z * -0.4986;
    let g_lin = X * -0.9689 + Y * 1.8758 + Z * 0.0415;
    let b_lin = X * 0.0557 + Y * -0.2040 + Z * 1.0570;

    // Clamp and gamma-correct
    let r = gamma_correct_rev(r_lin.max(0.0).min(1.0));
    let g = gamma_correct_rev(g_lin.max(0.0).min(1.0));
    let b = gamma_correct_rev(b_lin.max(0.0).min(1.0));

    ((r * 255.0).round() as u8, (g * 255.0).round() as u8, (b * 255.0).round() as u8)
}

fn gamma_correct(channel: f64) -> f64 {
    if channel > 0.04045 { ((channel + 0.055) / 1.055).powf(2.4) } else { channel / 12.92 }
}

fn gamma_correct_rev(channel: f64) -> f64 {
    if channel <= 0.0031308 {
        channel * 12.92
    } else {
        1.055 * channel.powf(1.0 / 2.4) - 0.055
    }
}
