#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// How a layer is combined with the accumulated output of the layers
/// beneath it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompositingMode {
    #[default]
    Alpha,
    ReverseAlpha,
    Add,
    Subtract,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    Nearest,
}

/// Resolution policy for the UVW texture plane relative to the 2D view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceResolutionMode {
    #[default]
    Match2DView,
    MatchVolumes,
    FovMatch2DViewSpacingMatchVolumes,
    FovMatchVolumesSpacingMatch2DView,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceSpacingMode {
    #[default]
    Automatic,
    Prescribed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnnotationSpace {
    Xyz,
    Ijk,
    Ras,
    #[default]
    IjkAndRas,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnnotationMode {
    NoAnnotation,
    #[default]
    All,
    LabelValuesOnly,
    LabelAndVoxelValuesOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}
