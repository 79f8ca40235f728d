//! DICOM series ingest.
//!
//! Reads a series of single-frame DICOM files into a [`Volume`], or into a
//! [`VolumeNode`] whose IJK-to-RAS matrix is built from the series geometry
//! (ImagePositionPatient, ImageOrientationPatient, PixelSpacing and the
//! inter-slice step). DICOM positions patients in LPS; the first two axes
//! are negated to land in RAS.

use std::cmp::Ordering;
use std::{fs, path::Path};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::{Matrix4, Vector3};
use ndarray::{Array2, Array3, s};
use thiserror::Error;
use tracing::warn;

use crate::enums::SortBy;
use crate::nodes::VolumeNode;
use crate::volume::Volume;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent
    /// or spacing information is missing
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let slices = Self::sorted_slices(dicom_objects, sort_by);
        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let images: Vec<_> = slices.iter().map(|(_, image)| image).collect();
        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(&slices).ok_or(VolumeLoaderError::MissingSpacing)?;

        Ok(Volume::new(volume_array, spacing))
    }

    /// Load a volume into a scene node, placing it in RAS space via the
    /// series geometry tags.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`load_from_dicom_objects`]. Missing geometry
    /// tags are not errors: orientation falls back to the identity and the
    /// slice step to the plane normal scaled by the slice spacing.
    ///
    /// [`load_from_dicom_objects`]: VolumeLoader::load_from_dicom_objects
    pub fn load_node_from_dicom_objects(
        name: &str,
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<VolumeNode, VolumeLoaderError> {
        let slices = Self::sorted_slices(dicom_objects, sort_by);
        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        let images: Vec<_> = slices.iter().map(|(_, image)| image).collect();
        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(&slices).ok_or(VolumeLoaderError::MissingSpacing)?;

        let mut node = VolumeNode::with_volume(name, Volume::new(volume_array, spacing));
        node.ijk_to_ras = Self::series_ijk_to_ras(&slices, spacing);
        Ok(node)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    pub fn load_node_from_file_paths(
        name: &str,
        paths: &[impl AsRef<Path>],
        sort_by: SortBy,
    ) -> Result<VolumeNode, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> =
            paths.iter().map(|path| open_file(path.as_ref())).collect();

        Self::load_node_from_dicom_objects(name, &objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        Self::load_from_file_paths(&Self::dcm_paths(path.as_ref())?, sort_by)
    }

    pub fn load_node_from_directory(
        name: &str,
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<VolumeNode, VolumeLoaderError> {
        Self::load_node_from_file_paths(name, &Self::dcm_paths(path.as_ref())?, sort_by)
    }

    fn dcm_paths(path: &Path) -> Result<Vec<std::path::PathBuf>, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        Ok(paths)
    }

    /// Decode every object and return the slices in stacking order, each
    /// paired with the object it came from so geometry tags stay reachable.
    fn sorted_slices<'a>(
        dicom_objects: &'a [FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Vec<(&'a FileDicomObject<InMemDicomObject>, Array2<u16>)> {
        let mut slices: Vec<_> = dicom_objects
            .iter()
            .filter_map(|dicom_object| {
                let order = Self::get_sort_order(dicom_object, sort_by)?;
                let image = Self::decode_image(dicom_object)?;
                Some((order, dicom_object, image))
            })
            .collect();

        if !matches!(sort_by, SortBy::None) {
            slices.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        }
        if matches!(sort_by, SortBy::ImagePositionPatient) {
            slices.reverse();
        }

        slices
            .into_iter()
            .map(|(_, dicom_object, image)| (dicom_object, image))
            .collect()
    }

    fn get_sort_order(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        sort_by: SortBy,
    ) -> Option<f64> {
        match sort_by {
            SortBy::ImagePositionPatient => {
                image_position(dicom_object).map(|position| position[2])
            }
            SortBy::TablePosition => dicom_object
                .element(tags::TABLE_POSITION)
                .ok()?
                .to_float64()
                .ok(),
            SortBy::InstanceNumber => dicom_object
                .element(tags::INSTANCE_NUMBER)
                .ok()?
                .to_int::<i32>()
                .ok()
                .map(f64::from),
            SortBy::None => Some(0.0),
        }
    }

    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<u16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
    }

    fn validate_dimensions(images: &[&Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[&Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    /// Spacing as (row, column, slice) in mm, from the first object carrying
    /// both PixelSpacing and SliceThickness.
    fn get_spacing(
        slices: &[(&FileDicomObject<InMemDicomObject>, Array2<u16>)],
    ) -> Option<(f64, f64, f64)> {
        slices.iter().find_map(|(dicom_object, _)| {
            let pixel_spacing = dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float64()
                .ok()?;

            let slice_thickness = dicom_object
                .element(tags::SLICE_THICKNESS)
                .ok()?
                .to_float64()
                .ok()?;

            Some((pixel_spacing[0], pixel_spacing[1], slice_thickness))
        })
    }

    /// IJK-to-RAS matrix of the stacked series. Directions come from the
    /// first slice's ImageOrientationPatient, the origin from its
    /// ImagePositionPatient, and the slice step from the positions of the
    /// first and last slices.
    fn series_ijk_to_ras(
        slices: &[(&FileDicomObject<InMemDicomObject>, Array2<u16>)],
        spacing: (f64, f64, f64),
    ) -> Matrix4<f64> {
        let first = slices[0].0;

        let (row_direction, column_direction) = match image_orientation(first) {
            Some(directions) => directions,
            None => {
                warn!("missing ImageOrientationPatient, assuming axial orientation");
                (Vector3::x(), Vector3::y())
            }
        };

        let origin = match image_position(first) {
            Some(position) => position,
            None => {
                warn!("missing ImagePositionPatient, placing volume at the origin");
                Vector3::zeros()
            }
        };

        let last_position = slices.last().and_then(|(object, _)| image_position(*object));
        let slice_step = match last_position {
            Some(last) if slices.len() > 1 => (last - origin) / (slices.len() - 1) as f64,
            _ => row_direction.cross(&column_direction) * spacing.2,
        };

        ijk_to_ras_from_geometry(
            origin,
            row_direction,
            column_direction,
            slice_step,
            (spacing.0, spacing.1),
        )
    }
}

fn image_position(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Vector3<f64>> {
    let values = dicom_object
        .element(tags::IMAGE_POSITION_PATIENT)
        .ok()?
        .to_multi_float64()
        .ok()?;
    (values.len() == 3).then(|| Vector3::new(values[0], values[1], values[2]))
}

fn image_orientation(
    dicom_object: &FileDicomObject<InMemDicomObject>,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let values = dicom_object
        .element(tags::IMAGE_ORIENTATION_PATIENT)
        .ok()?
        .to_multi_float64()
        .ok()?;
    (values.len() == 6).then(|| {
        (
            Vector3::new(values[0], values[1], values[2]),
            Vector3::new(values[3], values[4], values[5]),
        )
    })
}

/// Assemble the IJK-to-RAS matrix from LPS geometry: column index advances
/// along the row direction, row index along the column direction, slice
/// index along the inter-slice step. LPS to RAS negates the first two axes.
fn ijk_to_ras_from_geometry(
    origin_lps: Vector3<f64>,
    row_direction_lps: Vector3<f64>,
    column_direction_lps: Vector3<f64>,
    slice_step_lps: Vector3<f64>,
    pixel_spacing: (f64, f64),
) -> Matrix4<f64> {
    let i_step = row_direction_lps * pixel_spacing.1;
    let j_step = column_direction_lps * pixel_spacing.0;

    let mut matrix = Matrix4::identity();
    for axis in 0..3 {
        matrix[(axis, 0)] = i_step[axis];
        matrix[(axis, 1)] = j_step[axis];
        matrix[(axis, 2)] = slice_step_lps[axis];
        matrix[(axis, 3)] = origin_lps[axis];
    }
    for column in 0..4 {
        matrix[(0, column)] = -matrix[(0, column)];
        matrix[(1, column)] = -matrix[(1, column)];
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;

    #[test]
    fn axial_geometry_flips_into_ras() {
        let matrix = ijk_to_ras_from_geometry(
            Vector3::new(-100.0, -80.0, 50.0),
            Vector3::x(),
            Vector3::y(),
            Vector3::new(0.0, 0.0, 2.5),
            (0.5, 0.75),
        );

        let origin = matrix * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!(origin, Vector4::new(100.0, 80.0, 50.0, 1.0));

        // One column step moves against R by the column spacing.
        let i_step = matrix * Vector4::new(1.0, 0.0, 0.0, 0.0);
        assert_eq!(i_step, Vector4::new(-0.75, 0.0, 0.0, 0.0));

        // One row step moves against A by the row spacing.
        let j_step = matrix * Vector4::new(0.0, 1.0, 0.0, 0.0);
        assert_eq!(j_step, Vector4::new(0.0, -0.5, 0.0, 0.0));

        // The slice step stays on S.
        let k_step = matrix * Vector4::new(0.0, 0.0, 1.0, 0.0);
        assert_eq!(k_step, Vector4::new(0.0, 0.0, 2.5, 0.0));
    }

    #[test]
    fn oblique_slice_step_is_taken_verbatim() {
        let matrix = ijk_to_ras_from_geometry(
            Vector3::zeros(),
            Vector3::x(),
            Vector3::y(),
            Vector3::new(0.5, 0.0, 2.0),
            (1.0, 1.0),
        );
        let k_step = matrix * Vector4::new(0.0, 0.0, 1.0, 0.0);
        assert_eq!(k_step, Vector4::new(-0.5, 0.0, 2.0, 0.0));
    }
}
