//! Page rasterization for scanned PDFs using lopdf.
//!
//! Scanned statements carry one full-page scan per page. Each page's largest
//! embedded image is taken as the page raster and scaled to the page's
//! MediaBox at the requested resolution. Pages drawn only with vector content
//! are not supported by this rasterizer.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use super::{page_file_name, PageRasterizer, RasterOptions, Result};
use crate::error::PdfError;

/// Points per inch in PDF user space.
const POINTS_PER_INCH: f32 = 72.0;

/// Rasterizer that lifts embedded page scans out of a PDF.
#[derive(Debug, Default, Clone)]
pub struct LopdfRasterizer;

impl LopdfRasterizer {
    /// Create a new rasterizer.
    pub fn new() -> Self {
        Self
    }

    fn load(&self, pdf: &Path) -> Result<Document> {
        let mut doc = Document::load(pdf).map_err(|e| PdfError::Parse(e.to_string()))?;

        // Handle PDFs with empty password encryption
        if doc.is_encrypted() {
            if doc.decrypt("").is_err() {
                return Err(PdfError::Encrypted);
            }
            debug!("Decrypted {} with empty password", pdf.display());
        }

        if doc.get_pages().is_empty() {
            return Err(PdfError::NoPages);
        }
        Ok(doc)
    }

    /// Render one page: its largest image, scaled to the page size at `dpi`.
    fn render_page(&self, doc: &Document, page: u32, page_id: ObjectId, dpi: u32) -> Result<DynamicImage> {
        let image = self
            .page_images(doc, page_id)
            .into_iter()
            .max_by_key(|img| u64::from(img.width()) * u64::from(img.height()))
            .ok_or_else(|| PdfError::Rasterize {
                page,
                reason: "no decodable image on page".to_string(),
            })?;

        let Some((width_pt, height_pt)) = self.media_box(doc, page_id) else {
            trace!("Page {} has no MediaBox, keeping native resolution", page);
            return Ok(image);
        };

        let scale = dpi as f32 / POINTS_PER_INCH;
        let target_width = (width_pt * scale).round().max(1.0) as u32;
        let target_height = (height_pt * scale).round().max(1.0) as u32;

        if (target_width, target_height) == (image.width(), image.height()) {
            return Ok(image);
        }

        trace!(
            "Scaling page {} from {}x{} to {}x{} ({} DPI)",
            page,
            image.width(),
            image.height(),
            target_width,
            target_height,
            dpi
        );
        Ok(image.resize_exact(target_width, target_height, FilterType::CatmullRom))
    }

    /// Images referenced from the page's XObject resources.
    fn page_images(&self, doc: &Document, page_id: ObjectId) -> Vec<DynamicImage> {
        let mut images = Vec::new();

        let Some(resources) = self.page_resources(doc, page_id) else {
            return images;
        };

        if let Ok(xobjects) = resources.get(b"XObject") {
            if let Ok((_, Object::Dictionary(xobj_dict))) = doc.dereference(xobjects) {
                for (_name, obj_ref) in xobj_dict.iter() {
                    if let Ok((_, obj)) = doc.dereference(obj_ref) {
                        if let Some(img) = self.try_extract_image(doc, obj) {
                            images.push(img);
                        }
                    }
                }
            }
        }

        debug!("Found {} images on page object {:?}", images.len(), page_id);
        images
    }

    fn try_extract_image(&self, doc: &Document, obj: &Object) -> Option<DynamicImage> {
        let Object::Stream(stream) = obj else {
            return None;
        };
        let dict = &stream.dict;

        if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
            return None;
        }

        let width = u32::try_from(dict.get(b"Width").ok()?.as_i64().ok()?).ok()?;
        let height = u32::try_from(dict.get(b"Height").ok()?.as_i64().ok()?).ok()?;
        trace!("Found image object: {}x{}", width, height);

        if let Ok(filter) = dict.get(b"Filter") {
            let filter_name = match filter {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) => arr.last().and_then(|o| o.as_name().ok()),
                _ => None,
            };

            match filter_name {
                Some(b"DCTDecode") => {
                    return image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg).ok();
                }
                Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                    trace!("Unsupported image filter {:?}", filter_name.map(String::from_utf8_lossy));
                    return None;
                }
                _ => {}
            }
        }

        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());

        let color_space = dict
            .get(b"ColorSpace")
            .ok()
            .and_then(|o| match o {
                Object::Name(name) => Some(name.as_slice()),
                Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
                Object::Reference(r) => doc.get_object(*r).ok().and_then(|o| o.as_name().ok()),
                _ => None,
            })
            .unwrap_or(b"DeviceRGB");

        let bits = dict
            .get(b"BitsPerComponent")
            .ok()
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(8);

        if bits != 8 {
            trace!("Unsupported bits per component: {}", bits);
            return None;
        }

        raw_to_image(&data, width, height, color_space)
    }

    /// Resources dictionary of a page, following inheritance.
    fn page_resources(&self, doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
        match self.inherited(doc, page_id, b"Resources")? {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }

    /// Page width and height in points.
    fn media_box(&self, doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
        let Object::Array(coords) = self.inherited(doc, page_id, b"MediaBox")? else {
            return None;
        };
        let values: Vec<f32> = coords
            .iter()
            .filter_map(|o| match doc.dereference(o) {
                Ok((_, Object::Integer(i))) => Some(*i as f32),
                Ok((_, Object::Real(r))) => Some(*r as f32),
                _ => None,
            })
            .collect();

        match values.as_slice() {
            [x0, y0, x1, y1] => {
                let (width, height) = ((x1 - x0).abs(), (y1 - y0).abs());
                (width > 0.0 && height > 0.0).then_some((width, height))
            }
            _ => None,
        }
    }

    /// Look up a page attribute on the page or its ancestors.
    fn inherited(&self, doc: &Document, node_id: ObjectId, key: &[u8]) -> Option<Object> {
        let Ok(Object::Dictionary(dict)) = doc.get_object(node_id) else {
            return None;
        };

        if let Ok(value) = dict.get(key) {
            if let Ok((_, resolved)) = doc.dereference(value) {
                return Some(resolved.clone());
            }
        }

        match dict.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => self.inherited(doc, *parent_id, key),
            _ => None,
        }
    }
}

impl PageRasterizer for LopdfRasterizer {
    fn rasterize(&self, pdf: &Path, options: &RasterOptions, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let doc = self.load(pdf)?;
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let pages = doc.get_pages();
        let limit = if options.max_pages == 0 {
            pages.len()
        } else {
            options.max_pages.min(pages.len())
        };

        let mut paths = Vec::with_capacity(limit);
        for (&page, &page_id) in pages.iter().take(limit) {
            let image = self.render_page(&doc, page, page_id, options.dpi)?;
            let path = out_dir.join(page_file_name(&stem, page));

            DynamicImage::ImageRgb8(image.to_rgb8())
                .save_with_format(&path, ImageFormat::Jpeg)
                .map_err(|e| PdfError::Write {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            debug!("Converted page {}/{} to {}", page, limit, path.display());
            paths.push(path);
        }

        Ok(paths)
    }
}

/// Build an image from uncompressed 8-bit samples.
fn raw_to_image(data: &[u8], width: u32, height: u32, color_space: &[u8]) -> Option<DynamicImage> {
    let pixels = (width as usize).checked_mul(height as usize)?;
    let rgb_len = pixels.checked_mul(3)?;

    let rgba: Vec<u8> = match color_space {
        b"DeviceRGB" | b"RGB" if data.len() >= rgb_len => data[..rgb_len]
            .chunks_exact(3)
            .flat_map(|c| [c[0], c[1], c[2], 255])
            .collect(),
        b"DeviceGray" | b"G" if data.len() >= pixels => data[..pixels]
            .iter()
            .flat_map(|&g| [g, g, g, 255])
            .collect(),
        _ => {
            trace!(
                "Could not decode image: colorspace={}, data_len={}",
                String::from_utf8_lossy(color_space),
                data.len()
            );
            return None;
        }
    };

    ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba).map(DynamicImage::ImageRgba8)
}
