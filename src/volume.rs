use ndarray::Array3;

/// Voxel storage for a scalar volume.
///
/// The array is indexed `[k, j, i]` (slice, row, column), matching the order
/// DICOM series are stacked in. Physical placement of the grid is described
/// by the owning node's IJK-to-RAS matrix, not here.
#[derive(Clone, Debug, Default)]
pub struct Volume {
    data: Array3<u16>,
    spacing: (f64, f64, f64),
}

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f64, f64, f64)) -> Self {
        Self { data, spacing }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Dimensions in voxel-index order (columns, rows, slices).
    pub fn dim_ijk(&self) -> (usize, usize, usize) {
        let (k, j, i) = self.data.dim();
        (i, j, k)
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<u16> {
        &mut self.data
    }

    /// Voxel spacing (row, column, slice) in mm.
    pub fn spacing(&self) -> (f64, f64, f64) {
        self.spacing
    }

    /// Minimum and maximum scalar values in the volume.
    pub fn scalar_range(&self) -> (f64, f64) {
        let mut low = u16::MAX;
        let mut high = u16::MIN;
        for &value in self.data.iter() {
            low = low.min(value);
            high = high.max(value);
        }
        if low > high {
            return (0.0, 0.0);
        }
        (f64::from(low), f64::from(high))
    }

    /// Voxel value at integer IJK coordinates, if inside the grid.
    pub fn value_at(&self, i: usize, j: usize, k: usize) -> Option<u16> {
        self.data.get([k, j, i]).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn scalar_range_spans_data() {
        let mut data = Array3::<u16>::zeros((2, 2, 2));
        data[[0, 0, 0]] = 7;
        data[[1, 1, 1]] = 900;
        let volume = Volume::new(data, (1.0, 1.0, 1.0));
        assert_eq!(volume.scalar_range(), (0.0, 900.0));
    }

    #[test]
    fn value_at_is_ijk_ordered() {
        let mut data = Array3::<u16>::zeros((3, 4, 5));
        data[[2, 1, 4]] = 42;
        let volume = Volume::new(data, (1.0, 1.0, 1.0));
        assert_eq!(volume.value_at(4, 1, 2), Some(42));
        assert_eq!(volume.value_at(5, 0, 0), None);
        assert_eq!(volume.dim_ijk(), (5, 4, 3));
    }
}
