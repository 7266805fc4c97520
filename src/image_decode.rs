use crate::error::{CatalogError, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use exif::{Exif, In, Reader as ExifReader, Tag, Value};
use image::{DynamicImage, ImageReader};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

const EXIF_DATE_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const EXIF_DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

/// Decodes an image file, applying its EXIF orientation when present.
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|error| CatalogError::decode(path, error))?;
    let image = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(|error| CatalogError::decode(path, error))?
        .decode()
        .map_err(|error| CatalogError::decode(path, error))?;

    let orientation = ExifReader::new()
        .read_from_container(&mut Cursor::new(bytes.as_slice()))
        .ok()
        .and_then(|exif| orientation_of(&exif));

    Ok(match orientation {
        Some(value) => apply_orientation(image, value),
        None => image,
    })
}

fn orientation_of(exif: &Exif) -> Option<u32> {
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

/// Maps an EXIF orientation value (1..=8) onto the matching pixel transform.
pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Collapses palette, grayscale and high bit-depth images to 8-bit RGB(A).
pub fn normalize_color(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Reads the EXIF block of a file, if it has one.
pub fn read_exif(path: &Path) -> Option<Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    ExifReader::new().read_from_container(&mut reader).ok()
}

/// Returns the textual content of an EXIF tag, lowercased.
pub fn exif_text(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let text = match &field.value {
        Value::Ascii(parts) => parts
            .iter()
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<Vec<_>>()
            .join(" "),
        // UserComment carries an 8-byte character-code prefix.
        Value::Undefined(bytes, _) if bytes.len() > 8 => {
            String::from_utf8_lossy(&bytes[8..]).into_owned()
        }
        _ => field.display_value().to_string(),
    };
    let cleaned = text.trim_matches(char::from(0)).trim().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn parse_exif_date(raw: &str) -> Option<NaiveDateTime> {
    let cleaned = raw.split('\0').next().unwrap_or_default().trim();
    EXIF_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(cleaned, format).ok())
}

/// Capture date of a media file: EXIF date tags first, filesystem mtime otherwise.
pub fn media_date(path: &Path, is_image: bool) -> Option<NaiveDateTime> {
    if is_image {
        if let Some(exif) = read_exif(path) {
            let from_exif = EXIF_DATE_TAGS.iter().find_map(|tag| {
                exif.get_field(*tag, In::PRIMARY).and_then(|field| match &field.value {
                    Value::Ascii(parts) => parts
                        .first()
                        .and_then(|part| parse_exif_date(&String::from_utf8_lossy(part))),
                    _ => None,
                })
            });
            if from_exif.is_some() {
                return from_exif;
            }
        }
    }

    match std::fs::metadata(path).and_then(|metadata| metadata.modified()) {
        Ok(modified) => Some(DateTime::<Local>::from(modified).naive_local()),
        Err(error) => {
            log::warn!("Could not get file system date for {}: {}", path.display(), error);
            None
        }
    }
}
