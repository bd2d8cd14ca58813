//! Synthetic frame generation.
//!
//! Frames are a diagonal gradient with Gaussian noise and a few fixed
//! hot pixels, scaled to the bit depth. Dark frames drop the gradient
//! and keep only bias plus noise, so dark subtraction in downstream
//! tooling does something visible.

use ccd_core::capability::FrameKind;
use ccd_core::image::BitDepth;
use rand::rngs::StdRng;
use rand::Rng;

/// Parameters for one generated frame.
pub struct PatternParams {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub kind: FrameKind,
    /// Gain scales the gradient amplitude.
    pub gain: u32,
    /// Noise sigma in output counts.
    pub noise_sigma: f64,
}

/// Fill `buf` with a synthetic frame. `buf` must be exactly
/// `width * height * bytes_per_pixel` long.
pub fn fill_frame(params: &PatternParams, rng: &mut StdRng, buf: &mut [u8]) {
    let full_scale = match params.depth {
        BitDepth::Bits8 => u32::from(u8::MAX),
        BitDepth::Bits16 => u32::from(u16::MAX),
    } as f64;
    let bias = full_scale * 0.02;
    let amplitude = match params.kind {
        FrameKind::Dark => 0.0,
        FrameKind::Light => full_scale * 0.6 * (f64::from(params.gain.max(1)) / 10.0).min(1.0),
    };
    let span = f64::from(params.width + params.height).max(1.0);

    let mut write = |idx: usize, value: f64| {
        let v = value.clamp(0.0, full_scale);
        match params.depth {
            BitDepth::Bits8 => buf[idx] = v as u8,
            BitDepth::Bits16 => {
                let bytes = (v as u16).to_le_bytes();
                buf[idx * 2] = bytes[0];
                buf[idx * 2 + 1] = bytes[1];
            }
        }
    };

    for y in 0..params.height {
        for x in 0..params.width {
            let idx = (y * params.width + x) as usize;
            let gradient = amplitude * f64::from(x + y) / span;
            let noise = gauss(rng) * params.noise_sigma;
            write(idx, bias + gradient + noise);
        }
    }

    // A handful of deterministic hot pixels, like every real sensor.
    for k in 0..4u32 {
        let x = (params.width / 5) * (k + 1) % params.width.max(1);
        let y = (params.height / 7) * (k + 1) % params.height.max(1);
        let idx = (y * params.width + x) as usize;
        write(idx, full_scale * 0.95);
    }
}

/// Box-Muller standard normal sample.
fn gauss(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn dark_frames_stay_near_bias() {
        let params = PatternParams {
            width: 32,
            height: 32,
            depth: BitDepth::Bits16,
            kind: FrameKind::Dark,
            gain: 10,
            noise_sigma: 5.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut buf = vec![0u8; 32 * 32 * 2];
        fill_frame(&params, &mut rng, &mut buf);

        let mean: f64 = buf
            .chunks_exact(2)
            .map(|p| f64::from(u16::from_le_bytes([p[0], p[1]])))
            .sum::<f64>()
            / 1024.0;
        // Bias is 2% of full scale; hot pixels pull the mean up a bit.
        assert!(mean > 500.0 && mean < 2000.0, "mean {mean}");
    }

    #[test]
    fn light_frames_show_gradient() {
        let params = PatternParams {
            width: 64,
            height: 1,
            depth: BitDepth::Bits8,
            kind: FrameKind::Light,
            gain: 10,
            noise_sigma: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut buf = vec![0u8; 64];
        fill_frame(&params, &mut rng, &mut buf);
        assert!(buf[60] > buf[2]);
    }
}
