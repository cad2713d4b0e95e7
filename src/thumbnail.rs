use eframe::egui::ColorImage;
use tracing::debug;

/// Downloads and decodes the thumbnail reported by the resolver.
pub fn fetch_thumbnail(url: &str) -> Option<ColorImage> {
    // Blocking GET; any network or decode failure just means no thumbnail
    let resp = match reqwest::blocking::get(url).and_then(|r| r.error_for_status()) {
        Ok(r) => r.bytes().ok()?,
        Err(e) => {
            debug!("Thumbnail fetch failed for {}: {}", url, e);
            return None;
        }
    };
    decode_thumbnail(&resp)
}

pub fn decode_thumbnail(bytes: &[u8]) -> Option<ColorImage> {
    // Small list thumbnails keep the texture cheap
    let img = image::load_from_memory(bytes).ok()?.thumbnail(160, 90).to_rgba8();
    let size = [img.width() as usize, img.height() as usize];
    Some(ColorImage::from_rgba_unmultiplied(size, &img))
}
