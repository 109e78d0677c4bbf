//! Upload-time image metadata: dimensions, format, orientation, the EXIF
//! fields we recognize, and GPS coordinates.

use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::NaiveDateTime;
use depot_core::models::{ExifData, ImageInfo, Location};
use exif::{Context, Exif, Field, In, Rational, Tag, Value};

use crate::error::ProcessingError;

/// Cap on unrecognized EXIF fields copied into `extra`.
const MAX_EXTRA_FIELDS: usize = 32;
const MAX_EXTRA_VALUE_LEN: usize = 256;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedImageMetadata {
    pub image: ImageInfo,
    /// Seeded from EXIF GPS tags when present.
    pub location: Option<Location>,
}

pub fn extract_image_metadata(data: &[u8]) -> Result<ExtractedImageMetadata, ProcessingError> {
    let format = image::guess_format(data).map_err(|e| ProcessingError::Decode(e.to_string()))?;
    let (width, height) = image::ImageReader::with_format(Cursor::new(data), format)
        .into_dimensions()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;

    let mut info = ImageInfo {
        width: Some(width),
        height: Some(height),
        orientation: None,
        format: format.extensions_str().first().map(|s| s.to_string()),
        exif: ExifData::default(),
    };

    // Most PNGs and GIFs carry no EXIF at all.
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!(error = %e, "No EXIF data");
            return Ok(ExtractedImageMetadata {
                image: info,
                location: None,
            });
        }
    };

    info.orientation = exif
        .get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .and_then(|v| u16::try_from(v).ok())
        .filter(|v| (1..=8).contains(v));
    info.exif = read_exif_fields(&exif);

    Ok(ExtractedImageMetadata {
        image: info,
        location: read_gps(&exif),
    })
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_matches(char::from(0)).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational(exif: &Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => values.first().filter(|r| r.denom != 0).map(Rational::to_f64),
        _ => None,
    }
}

fn is_recognized(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::Make
            | Tag::Model
            | Tag::LensModel
            | Tag::ExposureTime
            | Tag::FNumber
            | Tag::PhotographicSensitivity
            | Tag::FocalLength
            | Tag::DateTimeOriginal
            | Tag::Software
            | Tag::Orientation
            | Tag::MakerNote
    )
}

fn read_exif_fields(exif: &Exif) -> ExifData {
    let taken_at = ascii(exif, Tag::DateTimeOriginal)
        .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y:%m:%d %H:%M:%S").ok());

    let exposure_time = exif
        .get_field(Tag::ExposureTime, In::PRIMARY)
        .map(|f| f.display_value().to_string());

    let iso = exif
        .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0));

    let extra: BTreeMap<String, String> = exif
        .fields()
        .filter(|f| f.ifd_num == In::PRIMARY)
        .filter(|f| f.tag.context() != Context::Gps && !is_recognized(f.tag))
        .filter(|f| !matches!(f.value, Value::Undefined(..)))
        .map(|f: &Field| (f.tag.to_string(), f.display_value().to_string()))
        .filter(|(_, v)| v.len() <= MAX_EXTRA_VALUE_LEN)
        .take(MAX_EXTRA_FIELDS)
        .collect();

    ExifData {
        camera_make: ascii(exif, Tag::Make),
        camera_model: ascii(exif, Tag::Model),
        lens_model: ascii(exif, Tag::LensModel),
        exposure_time,
        f_number: rational(exif, Tag::FNumber),
        iso,
        focal_length: rational(exif, Tag::FocalLength),
        taken_at,
        software: ascii(exif, Tag::Software),
        extra,
    }
}

/// Degrees/minutes/seconds to signed decimal degrees.
fn dms_to_degrees(dms: &[Rational], reference: Option<&str>) -> Option<f64> {
    if dms.len() < 3 || dms.iter().any(|r| r.denom == 0) {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    match reference {
        Some("S") | Some("W") => Some(-degrees),
        _ => Some(degrees),
    }
}

fn gps_coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(dms) = &field.value else {
        return None;
    };
    let reference = ascii(exif, ref_tag);
    dms_to_degrees(dms, reference.as_deref())
}

fn read_gps(exif: &Exif) -> Option<Location> {
    let latitude = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let longitude = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }

    let below_sea_level = exif
        .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        == Some(1);
    let altitude = rational(exif, Tag::GPSAltitude).map(|a| if below_sea_level { -a } else { a });

    let mut location = Location::new(latitude, longitude);
    location.altitude = altitude;
    Some(location)
}
