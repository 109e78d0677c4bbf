//! Which uploads enter the compression pipeline.

use depot_core::CompressionConfig;

/// Broad class of an upload, by mimetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Image,
    Document,
    Other,
}

impl TypeClass {
    pub fn of(mimetype: &str) -> Self {
        let mimetype = mimetype.trim().to_ascii_lowercase();
        if mimetype.starts_with("image/") {
            TypeClass::Image
        } else if mimetype == "application/pdf" {
            TypeClass::Document
        } else {
            TypeClass::Other
        }
    }

    /// Per-class switch. Document compression is hard-disabled whatever
    /// `compress_pdfs` says, and other types have no switch at all.
    fn enabled(self, config: &CompressionConfig) -> bool {
        match self {
            TypeClass::Image => config.compress_images,
            TypeClass::Document => false,
            TypeClass::Other => false,
        }
    }
}

/// Deterministic eligibility predicate.
///
/// Images are eligible whenever image compression is on, regardless of size.
/// Anything else needs its class switch on and a size at or above the threshold.
pub fn should_compress(mimetype: &str, size: u64, config: &CompressionConfig) -> bool {
    if !config.enabled {
        return false;
    }
    match TypeClass::of(mimetype) {
        TypeClass::Image => TypeClass::Image.enabled(config),
        class => class.enabled(config) && size >= config.threshold_bytes,
    }
}
