//! CIE-LAB colours and the CIEDE2000 colour difference.

use palette::white_point::D65;
use palette::{FromColor, LinSrgb, Srgb};

/// CIE-LAB colour (D65 white point).
/// L: lightness [0, 100], a: green-red, b: blue-yellow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    pub const fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    /// Convert an sRGB colour with channels in `0.0..=255.0`.
    pub fn from_srgb(r: f64, g: f64, b: f64) -> Self {
        let srgb = Srgb::new(
            (r / 255.0).clamp(0.0, 1.0),
            (g / 255.0).clamp(0.0, 1.0),
            (b / 255.0).clamp(0.0, 1.0),
        );
        let linear: LinSrgb<f64> = srgb.into_linear();
        let lab = palette::Lab::<D65, f64>::from_color(linear);
        Self::new(lab.l, lab.a, lab.b)
    }

    pub fn from_srgb_u8(r: u8, g: u8, b: u8) -> Self {
        Self::from_srgb(r as f64, g as f64, b as f64)
    }

    /// CIEDE2000 difference with kL = kC = kH = 1.
    pub fn ciede2000(self, other: Self) -> f64 {
        ciede2000(self, other)
    }
}

#[inline]
fn sin_deg(x: f64) -> f64 {
    x.to_radians().sin()
}

#[inline]
fn cos_deg(x: f64) -> f64 {
    x.to_radians().cos()
}

/// Hue angle in degrees, `[0, 360)`. Zero when both components are zero.
#[inline]
fn hue_deg(b: f64, a_prime: f64) -> f64 {
    if a_prime == 0.0 && b == 0.0 {
        return 0.0;
    }
    let h = b.atan2(a_prime).to_degrees();
    if h < 0.0 {
        h + 360.0
    } else {
        h
    }
}

const POW25_7: f64 = 6_103_515_625.0; // 25^7

/// CIEDE2000 colour difference (Sharma, Wu, Dalal 2005).
pub fn ciede2000(lab1: Lab, lab2: Lab) -> f64 {
    let (k_l, k_c, k_h) = (1.0, 1.0, 1.0);

    let c1 = lab1.a.hypot(lab1.b);
    let c2 = lab2.a.hypot(lab2.b);
    let c_mean7 = ((c1 + c2) / 2.0).powi(7);
    let g = 0.5 * (1.0 - (c_mean7 / (c_mean7 + POW25_7)).sqrt());

    let a1p = (1.0 + g) * lab1.a;
    let a2p = (1.0 + g) * lab2.a;
    let c1p = a1p.hypot(lab1.b);
    let c2p = a2p.hypot(lab2.b);
    let h1p = hue_deg(lab1.b, a1p);
    let h2p = hue_deg(lab2.b, a2p);

    let delta_lp = lab2.l - lab1.l;
    let delta_cp = c2p - c1p;

    let chroma_product = c1p * c2p;
    let dh = h2p - h1p;
    let delta_hp = if chroma_product == 0.0 {
        0.0
    } else if dh > 180.0 {
        dh - 360.0
    } else if dh < -180.0 {
        dh + 360.0
    } else {
        dh
    };
    let delta_big_hp = 2.0 * chroma_product.sqrt() * sin_deg(delta_hp / 2.0);

    let l_mean = (lab1.l + lab2.l) / 2.0;
    let c_mean_p = (c1p + c2p) / 2.0;
    let h_sum = h1p + h2p;
    let h_mean = if chroma_product == 0.0 {
        h_sum
    } else if (h1p - h2p).abs() <= 180.0 {
        h_sum / 2.0
    } else if h_sum < 360.0 {
        (h_sum + 360.0) / 2.0
    } else {
        (h_sum - 360.0) / 2.0
    };

    let t = 1.0 - 0.17 * cos_deg(h_mean - 30.0)
        + 0.24 * cos_deg(2.0 * h_mean)
        + 0.32 * cos_deg(3.0 * h_mean + 6.0)
        - 0.20 * cos_deg(4.0 * h_mean - 63.0);

    let delta_theta = 30.0 * (-((h_mean - 275.0) / 25.0).powi(2)).exp();
    let c_mean_p7 = c_mean_p.powi(7);
    let r_c = 2.0 * (c_mean_p7 / (c_mean_p7 + POW25_7)).sqrt();

    let l_off = (l_mean - 50.0).powi(2);
    let s_l = 1.0 + (0.015 * l_off) / (20.0 + l_off).sqrt();
    let s_c = 1.0 + 0.045 * c_mean_p;
    let s_h = 1.0 + 0.015 * c_mean_p * t;
    let r_t = -sin_deg(2.0 * delta_theta) * r_c;

    let dl = delta_lp / (k_l * s_l);
    let dc = delta_cp / (k_c * s_c);
    let dh = delta_big_hp / (k_h * s_h);

    (dl * dl + dc * dc + dh * dh + r_t * dc * dh).max(0.0).sqrt()
}
