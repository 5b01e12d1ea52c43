use thiserror::Error;

/// Default basemap template, the same Carto raster layer the web client
/// renders under its markers.
pub const DEFAULT_TILE_URL: &str = "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png";

const SUBDOMAINS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tile request returned {0}")]
    Status(reqwest::StatusCode),

    #[error("tile decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// One decoded basemap tile. The texture is uploaded lazily so tiles can be
/// decoded off the UI thread without an egui context.
pub struct BasemapTile {
    pub x: u32,
    pub y: u32,
    pub zoom: u32,
    size: [usize; 2],
    rgba: Vec<u8>,
    texture: Option<egui::TextureHandle>,
}

impl BasemapTile {
    pub fn texture(&mut self, ctx: &egui::Context) -> &egui::TextureHandle {
        if self.texture.is_none() {
            let color_image = egui::ColorImage::from_rgba_unmultiplied(self.size, &self.rgba);
            let texture = ctx.load_texture(
                format!("basemap_{}_{}_{}", self.zoom, self.x, self.y),
                color_image,
                egui::TextureOptions::LINEAR,
            );
            self.texture = Some(texture);
        }
        self.texture.as_ref().expect("texture uploaded above")
    }
}

/// Fetches and decodes basemap raster tiles.
#[derive(Debug, Clone)]
pub struct TileRetriever {
    client: reqwest::Client,
    url_template: String,
}

impl TileRetriever {
    pub fn new(client: reqwest::Client, url_template: String) -> Self {
        Self {
            client,
            url_template,
        }
    }

    fn tile_url(&self, zoom: u32, x: u32, y: u32) -> String {
        // Rotate subdomains the way Leaflet does, spreading requests.
        let s = SUBDOMAINS[((x + y) % 3) as usize];
        self.url_template
            .replace("{s}", s)
            .replace("{z}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
    }

    pub async fn fetch_tile(&self, zoom: u32, x: u32, y: u32) -> Result<BasemapTile, TileError> {
        let url = self.tile_url(zoom, x, y);
        log::debug!("fetching basemap tile {url}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(TileError::Status(response.status()));
        }
        let bytes = response.bytes().await?;

        let image = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = image.dimensions();

        Ok(BasemapTile {
            x,
            y,
            zoom,
            size: [width as usize, height as usize],
            rgba: image.into_raw(),
            texture: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_url_fills_template_and_rotates_subdomains() {
        let retriever = TileRetriever::new(reqwest::Client::new(), DEFAULT_TILE_URL.to_string());
        assert_eq!(
            retriever.tile_url(14, 8113, 5120),
            "https://a.basemaps.cartocdn.com/light_all/14/8113/5120.png"
        );
        assert_eq!(
            retriever.tile_url(14, 8114, 5120),
            "https://b.basemaps.cartocdn.com/light_all/14/8114/5120.png"
        );
    }
}
