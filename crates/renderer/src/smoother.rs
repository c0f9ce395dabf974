//! Savitzky-Golay style grid smoothing.
//!
//! Every valid grid value is replaced by the value at the window centre of a
//! least-squares polynomial fitted over the surrounding `(2*size+1)²` window.
//! Windows that are complete share one precomputed kernel; windows clipped by
//! the grid edge or containing missing values are fitted individually.

use crate::painter::is_missing;
use map_common::{RenderError, RenderResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub const MAX_DEGREE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Smoother {
    #[serde(default)]
    pub size: usize,
    #[serde(default = "default_degree")]
    pub degree: usize,
}

fn default_degree() -> usize {
    2
}

impl Default for Smoother {
    fn default() -> Self {
        Self {
            size: 0,
            degree: default_degree(),
        }
    }
}

impl Smoother {
    pub fn validate(&self) -> RenderResult<()> {
        if self.degree > MAX_DEGREE {
            return Err(RenderError::config("Smoother degree is too large")
                .with_param("degree", self.degree)
                .with_param("maximum", MAX_DEGREE));
        }
        Ok(())
    }

    pub fn is_noop(&self) -> bool {
        self.size == 0
    }

    pub fn hash_value(&self) -> u64 {
        let mut seed = self.size as u64;
        map_common::hash_combine(&mut seed, self.degree as u64);
        seed
    }

    /// Smooth a row-major grid in place. Missing values stay missing and do
    /// not take part in the fits.
    pub fn apply(&self, values: &mut [f32], width: usize, height: usize) -> RenderResult<()> {
        self.validate()?;
        if self.is_noop() || width == 0 || height == 0 {
            return Ok(());
        }
        if values.len() != width * height {
            return Err(RenderError::data("Grid size does not match its values")
                .with_param("values", values.len())
                .with_param("width", width)
                .with_param("height", height));
        }

        let s = self.size as i64;
        let terms = terms(self.degree);
        let offsets: Vec<(i64, i64)> = (-s..=s)
            .flat_map(|dy| (-s..=s).map(move |dx| (dx, dy)))
            .collect();
        let kernel = centre_weights(&offsets, &terms);

        let source = values.to_vec();
        let (w, h) = (width as i64, height as i64);

        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) as usize;
                if is_missing(source[idx]) {
                    continue;
                }

                let mut window: Vec<(i64, i64)> = Vec::with_capacity(offsets.len());
                let mut samples: Vec<f64> = Vec::with_capacity(offsets.len());
                for &(dx, dy) in &offsets {
                    let (xx, yy) = (x + dx, y + dy);
                    if xx < 0 || yy < 0 || xx >= w || yy >= h {
                        continue;
                    }
                    let v = source[(yy * w + xx) as usize];
                    if !is_missing(v) {
                        window.push((dx, dy));
                        samples.push(v as f64);
                    }
                }

                let smoothed = if window.len() == offsets.len() {
                    kernel.as_ref().map(|k| k.iter().zip(&samples).map(|(a, b)| a * b).sum::<f64>())
                } else {
                    centre_weights(&window, &terms)
                        .map(|k| k.iter().zip(&samples).map(|(a, b)| a * b).sum::<f64>())
                };

                if let Some(v) = smoothed {
                    values[idx] = v as f32;
                }
            }
        }
        Ok(())
    }
}

/// Exponent pairs `(i, j)` of the monomials `x^i y^j` with `i + j <= degree`.
fn terms(degree: usize) -> Vec<(i32, i32)> {
    let mut out = Vec::new();
    for total in 0..=degree as i32 {
        for i in 0..=total {
            out.push((i, total - i));
        }
    }
    out
}

/// Weights giving the fitted polynomial's value at the origin, i.e. the
/// constant-term row of the pseudo-inverse. `None` when the fit is
/// underdetermined.
fn centre_weights(offsets: &[(i64, i64)], terms: &[(i32, i32)]) -> Option<Vec<f64>> {
    if offsets.len() < terms.len() {
        return None;
    }
    let a = DMatrix::from_fn(offsets.len(), terms.len(), |r, c| {
        let (dx, dy) = offsets[r];
        let (i, j) = terms[c];
        (dx as f64).powi(i) * (dy as f64).powi(j)
    });
    let ata = a.transpose() * &a;
    let inv = ata.try_inverse()?;
    // Constant term is the first column of the design matrix
    let row: DVector<f64> = (inv * a.transpose()).row(0).transpose();
    Some(row.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_is_noop() {
        let mut v = vec![1.0, 5.0, 2.0, 7.0];
        Smoother::default().apply(&mut v, 2, 2).unwrap();
        assert_eq!(v, vec![1.0, 5.0, 2.0, 7.0]);
    }

    #[test]
    fn test_degree_limit() {
        let s = Smoother { size: 1, degree: 6 };
        assert!(s.validate().is_err());
        let mut v = vec![0.0; 9];
        assert!(s.apply(&mut v, 3, 3).is_err());
    }

    #[test]
    fn test_preserves_planes() {
        // A plane is reproduced exactly by any fit of degree >= 1
        let (w, h) = (7, 6);
        let mut v: Vec<f32> = (0..w * h)
            .map(|i| (i % w) as f32 * 2.0 + (i / w) as f32 * 3.0 + 1.0)
            .collect();
        let expected = v.clone();
        Smoother { size: 2, degree: 1 }.apply(&mut v, w, h).unwrap();
        for (a, b) in v.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_reduces_spike() {
        let (w, h) = (5, 5);
        let mut v = vec![0.0f32; w * h];
        v[12] = 100.0;
        Smoother { size: 1, degree: 0 }.apply(&mut v, w, h).unwrap();
        assert!((v[12] - 100.0 / 9.0).abs() < 1e-3);
    }

    #[test]
    fn test_missing_values_stay_missing() {
        let (w, h) = (3, 3);
        let mut v = vec![1.0f32; 9];
        v[4] = f32::NAN;
        Smoother { size: 1, degree: 1 }.apply(&mut v, w, h).unwrap();
        assert!(v[4].is_nan());
        assert!((v[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_deny_unknown_fields() {
        let ok: Smoother = serde_json::from_str(r#"{"size": 2}"#).unwrap();
        assert_eq!(ok.degree, 2);
        assert!(serde_json::from_str::<Smoother>(r#"{"size": 2, "width": 1}"#).is_err());
    }
}
