//! Built-in chaotic map.

use glam::Vec4;

use super::ChaoticMap;

/// Coefficients per output component.
pub const QUADRATIC_TERMS: usize = 10;

/// General quadratic map in three variables.
///
/// Each output component is a dot product of ten coefficients with the
/// monomials `1, x, y, z, x², y², z², xy, xz, yz`. Rows are stored x, y, z
/// in order; missing coefficients count as zero. The device side counterpart
/// is the built-in `chaotic_map.wgsl`, which reads the same layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuadraticMap {
    pub a: Vec<f32>,
}

impl QuadraticMap {
    pub fn new(a: Vec<f32>) -> Self {
        Self { a }
    }

    /// Map with `dx = -y`, `dy = x`: a rotation field about the z axis.
    pub fn rotation() -> Self {
        let mut a = vec![0.0; 3 * QUADRATIC_TERMS];
        a[2] = -1.0;
        a[QUADRATIC_TERMS + 1] = 1.0;
        Self { a }
    }

    fn coefficient(&self, i: usize) -> f32 {
        self.a.get(i).copied().unwrap_or(0.0)
    }

    fn row(&self, row: usize, terms: &[f32; QUADRATIC_TERMS]) -> f32 {
        let base = row * QUADRATIC_TERMS;
        terms
            .iter()
            .enumerate()
            .map(|(k, term)| self.coefficient(base + k) * term)
            .sum()
    }

    /// Evaluate without the plugin signature.
    pub fn evaluate(&self, p: Vec4) -> Vec4 {
        let terms = [
            1.0,
            p.x,
            p.y,
            p.z,
            p.x * p.x,
            p.y * p.y,
            p.z * p.z,
            p.x * p.y,
            p.x * p.z,
            p.y * p.z,
        ];
        Vec4::new(self.row(0, &terms), self.row(1, &terms), self.row(2, &terms), 0.0)
    }
}

impl ChaoticMap for QuadraticMap {
    fn map(&self, position: &mut Vec4, out: &mut Vec4) {
        *out = self.evaluate(*position);
    }

    fn parameters(&self) -> &[f32] {
        &self.a
    }
}
