use ndarray::Array3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Trilinear sample at continuous IJK coordinates. The caller is
    /// responsible for bounds checking; coordinates are clamped to the grid.
    #[inline]
    pub(crate) fn trilinear_interpolate(data: &Array3<u16>, k: f64, j: f64, i: f64) -> f64 {
        let (depth, height, width) = data.dim();

        let k0 = k.floor().max(0.0) as usize;
        let j0 = j.floor().max(0.0) as usize;
        let i0 = i.floor().max(0.0) as usize;
        let k0 = k0.min(depth - 1);
        let j0 = j0.min(height - 1);
        let i0 = i0.min(width - 1);
        let k1 = (k0 + 1).min(depth - 1);
        let j1 = (j0 + 1).min(height - 1);
        let i1 = (i0 + 1).min(width - 1);

        let dk = (k - k0 as f64).clamp(0.0, 1.0);
        let dj = (j - j0 as f64).clamp(0.0, 1.0);
        let di = (i - i0 as f64).clamp(0.0, 1.0);

        let lerp = |a: f64, b: f64, t: f64| a.mul_add(1.0 - t, b * t);

        let c00 = lerp(
            f64::from(data[[k0, j0, i0]]),
            f64::from(data[[k0, j0, i1]]),
            di,
        );
        let c01 = lerp(
            f64::from(data[[k0, j1, i0]]),
            f64::from(data[[k0, j1, i1]]),
            di,
        );
        let c10 = lerp(
            f64::from(data[[k1, j0, i0]]),
            f64::from(data[[k1, j0, i1]]),
            di,
        );
        let c11 = lerp(
            f64::from(data[[k1, j1, i0]]),
            f64::from(data[[k1, j1, i1]]),
            di,
        );

        let c0 = lerp(c00, c01, dj);
        let c1 = lerp(c10, c11, dj);
        lerp(c0, c1, dk)
    }

    /// Nearest-neighbor sample at continuous IJK coordinates, or `None` when
    /// the rounded index falls outside the grid.
    #[inline]
    pub(crate) fn nearest(data: &Array3<u16>, k: f64, j: f64, i: f64) -> Option<u16> {
        let ki = k.round();
        let ji = j.round();
        let ii = i.round();
        if ki < 0.0 || ji < 0.0 || ii < 0.0 {
            return None;
        }
        data.get([ki as usize, ji as usize, ii as usize]).copied()
    }
}
