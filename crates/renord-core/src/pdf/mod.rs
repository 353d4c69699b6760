//! PDF page rasterization using lopdf and pdf-extract.
//!
//! Scanned invoices carry each page as one embedded full-page image, so
//! "rasterizing" a page resolves to locating and decoding that scan. True
//! vector rendering is an external concern; everything behind the
//! [`PageRasterizer`] trait can be swapped out in tests.

use std::collections::HashSet;
use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, trace};

use crate::error::RasterError;

/// One rasterized page together with its render parameters.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Pixel data.
    pub image: DynamicImage,
    /// DPI the page was rendered at.
    pub dpi: u32,
    /// Zero-based page index within the document.
    pub page_index: u32,
}

/// Boundary for PDF page access.
pub trait PageRasterizer: Send {
    /// Number of pages in the document.
    fn page_count(&self) -> u32;

    /// Extract the embedded text layer of the whole document.
    fn embedded_text(&self) -> Result<String, RasterError>;

    /// Render one page (zero-based) to a bitmap at the given DPI.
    fn render(&self, page_index: u32, dpi: u32) -> Result<PageImage, RasterError>;
}

/// Factory seam for opening documents, so tests can substitute in-memory
/// rasterizers for real PDFs.
pub trait RasterizerFactory: Send + Sync {
    /// Open the file at `path` for page access.
    fn open(&self, path: &Path) -> Result<Box<dyn PageRasterizer>, RasterError>;
}

/// Default factory producing [`PdfRasterizer`] instances.
#[derive(Debug, Default)]
pub struct PdfRasterizerFactory;

impl RasterizerFactory for PdfRasterizerFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn PageRasterizer>, RasterError> {
        let data = std::fs::read(path).map_err(|e| RasterError::Parse(e.to_string()))?;
        Ok(Box::new(PdfRasterizer::from_bytes(&data)?))
    }
}

/// PDF rasterizer backed by lopdf embedded-image extraction.
pub struct PdfRasterizer {
    document: Document,
    raw_data: Vec<u8>,
}

impl PdfRasterizer {
    /// Load a PDF from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RasterError> {
        let mut doc = Document::load_mem(data).map_err(|e| RasterError::Parse(e.to_string()))?;

        // Handle PDFs with empty-password encryption.
        let raw_data = if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(RasterError::Encrypted);
            }
            debug!("Decrypted PDF with empty password");

            let mut decrypted = Vec::new();
            doc.save_to(&mut decrypted)
                .map_err(|e| RasterError::Parse(format!("failed to save decrypted PDF: {}", e)))?;
            decrypted
        } else {
            data.to_vec()
        };

        let page_count = doc.get_pages().len();
        if page_count == 0 {
            return Err(RasterError::NoPages);
        }

        debug!("Loaded PDF with {} pages", page_count);
        Ok(Self {
            document: doc,
            raw_data,
        })
    }

    /// Extract images referenced by a page's XObject resources.
    fn page_images(&self, page_number: u32) -> Result<Vec<DynamicImage>, RasterError> {
        let pages = self.document.get_pages();
        let page_id = pages
            .get(&page_number)
            .ok_or(RasterError::PageOutOfRange(page_number - 1))?;

        let mut images = Vec::new();

        if let Some(resources) = self.page_resources(*page_id) {
            if let Ok(xobjects) = resources.get(b"XObject") {
                if let Ok((_, Object::Dictionary(xobj_dict))) = self.document.dereference(xobjects) {
                    for (_name, obj_ref) in xobj_dict.iter() {
                        if let Ok((_, obj)) = self.document.dereference(obj_ref) {
                            if let Some(img) = self.image_from_object(obj) {
                                images.push(img);
                            }
                        }
                    }
                }
            }
        }

        debug!("Extracted {} images from page {}", images.len(), page_number);
        Ok(images)
    }

    /// Scan every object in the document for image streams. Fallback when a
    /// page's resources don't reference its scan directly.
    fn all_images(&self) -> Vec<DynamicImage> {
        let mut images = Vec::new();
        let mut seen: HashSet<ObjectId> = HashSet::new();

        for (id, object) in self.document.objects.iter() {
            if !seen.insert(*id) {
                continue;
            }
            if let Some(img) = self.image_from_object(object) {
                images.push(img);
            }
        }

        debug!("Found {} images in document", images.len());
        images
    }

    fn image_from_object(&self, obj: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = obj else {
            return None;
        };
        let dict = &stream.dict;

        let subtype = dict.get(b"Subtype").ok()?;
        if subtype.as_name().ok()? != b"Image" {
            return None;
        }

        let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
        let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;

        trace!("Found image object: {}x{}", width, height);

        let data = match stream.decompressed_content() {
            Ok(d) => d,
            Err(_) => stream.content.clone(),
        };

        if let Ok(filter) = dict.get(b"Filter") {
            let filter_name = match filter {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) if !arr.is_empty() => {
                    arr.first().and_then(|o| o.as_name().ok())
                }
                _ => None,
            };

            match filter_name {
                Some(b"DCTDecode") => {
                    trace!("Decoding JPEG image");
                    return image::load_from_memory_with_format(
                        &stream.content,
                        image::ImageFormat::Jpeg,
                    )
                    .ok();
                }
                Some(b"JPXDecode") => {
                    trace!("Found JPEG2000 image (not supported)");
                    return None;
                }
                Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                    trace!("Found fax/JBIG2 image (not supported)");
                    return None;
                }
                _ => {}
            }
        }

        let color_space = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|o| match o {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
                Object::Reference(r) => self
                    .document
                    .get_object(*r)
                    .ok()
                    .and_then(|o| o.as_name().ok()),
                _ => None,
            })
            .unwrap_or(b"DeviceRGB");

        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(8) as u8;

        image_from_raw(&data, width, height, color_space, bits)
    }

    /// Resources dictionary for a page, following Parent inheritance.
    fn page_resources(&self, node_id: ObjectId) -> Option<lopdf::Dictionary> {
        let node = self.document.get_object(node_id).ok()?;
        if let Object::Dictionary(dict) = node {
            if let Ok(resources) = dict.get(b"Resources") {
                if let Ok((_, Object::Dictionary(res_dict))) = self.document.dereference(resources)
                {
                    return Some(res_dict.clone());
                }
            }

            if let Ok(Object::Reference(parent_id)) = dict.get(b"Parent") {
                return self.page_resources(*parent_id);
            }
        }
        None
    }
}

impl PageRasterizer for PdfRasterizer {
    fn page_count(&self) -> u32 {
        self.document.get_pages().len() as u32
    }

    fn embedded_text(&self) -> Result<String, RasterError> {
        pdf_extract::extract_text_from_mem(&self.raw_data)
            .map_err(|e| RasterError::TextExtraction(e.to_string()))
    }

    fn render(&self, page_index: u32, dpi: u32) -> Result<PageImage, RasterError> {
        let page_number = page_index + 1;
        if page_number > self.page_count() {
            return Err(RasterError::PageOutOfRange(page_index));
        }

        let mut images = self.page_images(page_number)?;

        // A scanned page typically has exactly one XObject: its scan. When
        // a page references several, take the largest by area.
        images.sort_by_key(|img| std::cmp::Reverse(img.width() as u64 * img.height() as u64));

        let image = match images.into_iter().next() {
            Some(img) => img,
            None => {
                let all = self.all_images();
                let page_idx = page_index as usize;
                all.into_iter().nth(page_idx).ok_or(RasterError::Render {
                    page: page_index,
                    reason: "no embedded page scan found".to_string(),
                })?
            }
        };

        Ok(PageImage {
            image: fit_to_dpi(image, dpi),
            dpi,
            page_index,
        })
    }
}

/// Cap a page scan at the pixel size implied by the requested DPI
/// (A4 long edge, 11.7 in), preserving aspect ratio.
fn fit_to_dpi(image: DynamicImage, dpi: u32) -> DynamicImage {
    let cap = (dpi as f32 * 11.7) as u32;
    let (width, height) = image.dimensions();

    if width.max(height) <= cap {
        return image;
    }

    image.resize(cap, cap, image::imageops::FilterType::Lanczos3)
}

fn image_from_raw(
    data: &[u8],
    width: u32,
    height: u32,
    color_space: &[u8],
    bits_per_component: u8,
) -> Option<DynamicImage> {
    trace!(
        "Creating image from raw data: {}x{}, colorspace={:?}, bits={}",
        width,
        height,
        String::from_utf8_lossy(color_space),
        bits_per_component
    );

    if bits_per_component != 8 {
        trace!("Unsupported bits per component: {}", bits_per_component);
        return None;
    }

    let expected_rgb = (width * height * 3) as usize;
    let expected_gray = (width * height) as usize;

    if color_space == b"DeviceRGB" || color_space == b"RGB" {
        if data.len() >= expected_rgb {
            let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);
            for chunk in data[..expected_rgb].chunks(3) {
                rgba_data.extend_from_slice(chunk);
                rgba_data.push(255);
            }
            return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba_data)
                .map(DynamicImage::ImageRgba8);
        }
    } else if color_space == b"DeviceGray" || color_space == b"G" {
        if data.len() >= expected_gray {
            let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);
            for &gray in data[..expected_gray].iter() {
                rgba_data.extend_from_slice(&[gray, gray, gray, 255]);
            }
            return ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba_data)
                .map(DynamicImage::ImageRgba8);
        }
    }

    trace!(
        "Could not decode image: data_len={}, expected_rgb={}, expected_gray={}",
        data.len(),
        expected_rgb,
        expected_gray
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_data_is_parse_error() {
        let result = PdfRasterizer::from_bytes(b"not a pdf");
        assert!(matches!(result, Err(RasterError::Parse(_))));
    }

    #[test]
    fn test_image_from_raw_gray() {
        let data = vec![128u8; 4];
        let img = image_from_raw(&data, 2, 2, b"DeviceGray", 8).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
    }

    #[test]
    fn test_image_from_raw_rejects_odd_bit_depth() {
        let data = vec![0u8; 16];
        assert!(image_from_raw(&data, 2, 2, b"DeviceGray", 1).is_none());
    }

    #[test]
    fn test_fit_to_dpi_caps_long_edge() {
        let img = DynamicImage::new_luma8(4000, 2000);
        let fitted = fit_to_dpi(img, 100);
        assert!(fitted.width() <= 1170);
    }
}
