//! Default slice options tree
//!
//! The job configuration the slicing backend expects, with default values.
//! Field names here are the backend's option keys and must stay stable.

use crate::compound::CompoundEntry;
use crate::entry::Entry;
use crate::error::OptionsError;

/// Root compound name
pub const SLICE_OPTIONS: &str = "slice_options";
/// Layer-description (Neuroglancer state) file
pub const NEUROGLANCER_JSON: &str = "neuroglancer_json";
/// Image layer selector, populated from the layer description
pub const NEUROGLANCER_IMAGE_LAYER: &str = "neuroglancer_image_layer";
/// Annotation layer selector, populated from the layer description
pub const NEUROGLANCER_ANNOTATION_LAYER: &str = "neuroglancer_annotation_layer";
/// Slice width in voxels
pub const SLICE_WIDTH: &str = "slice_width";
/// Slice height in voxels
pub const SLICE_HEIGHT: &str = "slice_height";
/// Output folder
pub const OUTPUT_FILE_FOLDER: &str = "output_file_folder";
/// Output base name
pub const OUTPUT_FILE_NAME: &str = "output_file_name";
/// Bounding box parameter group
pub const BOUNDING_BOX_PARAMS: &str = "bounding_box_params";
/// Distance between consecutive slices
pub const DIST_BETWEEN_SLICES: &str = "dist_between_slices";
/// Adaptive slicing toggle
pub const USE_ADAPTIVE_SLICING: &str = "use_adaptive_slicing";
/// Adaptive slicing ratio
pub const ADAPTIVE_SLICING_RATIO: &str = "adaptive_slicing_ratio";
/// Bounding box subdivision depth
pub const MAX_DEPTH: &str = "max_depth";
/// Target slices per bounding box
pub const TARGET_SLICES_PER_BOX: &str = "target_slices_per_box";

/// Build the default slice options tree
///
/// # Errors
/// Only if the field table above contains a duplicate sibling name
pub fn slice_options() -> Result<CompoundEntry, OptionsError> {
    let bounding_box = CompoundEntry::from_children(
        BOUNDING_BOX_PARAMS,
        "Bounding Box Parameters",
        [
            Entry::number(DIST_BETWEEN_SLICES, "Distance Between Slices", 1.0)
                .with_description("Distance between slices along the annotation path.")
                .into(),
            Entry::boolean(USE_ADAPTIVE_SLICING, "Use Adaptive Slicing", false)
                .with_description("Place slices more densely where the path curves.")
                .into(),
            Entry::number(ADAPTIVE_SLICING_RATIO, "Adaptive Slicing Ratio", 0.5).into(),
            Entry::number(MAX_DEPTH, "Max Depth", 10.0)
                .with_description("Maximum depth of the bounding box subdivision.")
                .into(),
            Entry::number(TARGET_SLICES_PER_BOX, "Target Slices per Box", 128.0).into(),
        ],
    )?;

    CompoundEntry::from_children(
        SLICE_OPTIONS,
        "Slice Options",
        [
            Entry::file_path(OUTPUT_FILE_FOLDER, "Output File Folder", "./")
                .with_description("Folder the slices and options file are written to.")
                .into(),
            Entry::string(OUTPUT_FILE_NAME, "Output File Name", "sample")
                .with_separator()
                .into(),
            Entry::file_path(NEUROGLANCER_JSON, "Neuroglancer JSON", "")
                .with_description("Neuroglancer state file describing the image and annotation layers.")
                .into(),
            Entry::string(NEUROGLANCER_IMAGE_LAYER, "Neuroglancer Image Layer", "")
                .with_options(Vec::<String>::new())
                .into(),
            Entry::string(NEUROGLANCER_ANNOTATION_LAYER, "Neuroglancer Annotation Layer", "")
                .with_options(Vec::<String>::new())
                .with_separator()
                .into(),
            Entry::number(SLICE_WIDTH, "Slice Width", 120.0).into(),
            Entry::number(SLICE_HEIGHT, "Slice Height", 120.0)
                .with_separator()
                .into(),
            bounding_box.into(),
            Entry::boolean("flush_cache", "Flush Cache", false)
                .with_description("Flush the volume cache after each chunk.")
                .into(),
            Entry::number("connectome_chunk_size", "Connectome Chunk Size", 160.0).into(),
            Entry::number("annotation_mip_level", "Annotation MIP Level", 0.0).into(),
            Entry::number("max_ram_gb", "Max RAM (GB)", 0.0)
                .with_description("Memory ceiling for the slicing pipeline, 0 for no limit.")
                .into(),
        ],
    )
}
