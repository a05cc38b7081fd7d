//! Storage formats: NPY tensors, headerless int16 files and label files.
pub mod labels;
pub mod npy;
pub mod raw;
pub mod text;

pub use labels::load_label_set;
