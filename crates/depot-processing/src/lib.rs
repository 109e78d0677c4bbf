//! Depot Processing Library
//!
//! Everything the background compression needs: the eligibility predicate,
//! the image transcoder, primary-derivative selection, upload-time image
//! metadata extraction, and the [`CompressionPipeline`] tying them together.

pub mod eligibility;
pub mod error;
pub mod image_meta;
pub mod pipeline;
pub mod selection;
pub mod transcode;

pub use eligibility::{should_compress, TypeClass};
pub use error::ProcessingError;
pub use image_meta::{extract_image_metadata, ExtractedImageMetadata};
pub use pipeline::{CompressionJob, CompressionPipeline};
pub use selection::{select_primary, Selection};
pub use transcode::{fit_within, EncodedDerivatives, ImageTranscoder};
