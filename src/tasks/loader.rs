use std::io::Cursor;
use std::sync::Arc;

use image::{ImageReader, RgbaImage};
use tracing::{debug, instrument};

use crate::api::FrameApi;
use crate::error::Error;
use crate::model::Photo;

/// A decoded photo ready to be put on screen.
#[derive(Debug, Clone)]
pub struct LoadedPhoto {
    pub photo: Photo,
    pub image: RgbaImage,
}

impl LoadedPhoto {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Fetch the original upload for `photo` and decode it off the async runtime.
#[instrument(skip(api, photo), fields(filename = %photo.filename))]
pub async fn load<A: FrameApi + ?Sized>(api: Arc<A>, photo: Photo) -> Result<LoadedPhoto, Error> {
    let bytes = api.fetch_image(&photo).await?;
    let filename = photo.filename.clone();
    let image = tokio::task::spawn_blocking(move || decode_rgba8_apply_exif(&bytes, &filename))
        .await
        .map_err(|err| Error::Io(std::io::Error::other(err)))??;
    debug!(width = image.width(), height = image.height(), "decoded");
    Ok(LoadedPhoto { photo, image })
}

// Decodes an image to RGBA8 and applies EXIF orientation if available.
// Orientation is best-effort; without metadata the pixels are left as stored.
fn decode_rgba8_apply_exif(bytes: &[u8], filename: &str) -> Result<RgbaImage, Error> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|source| Error::Decode {
            filename: filename.to_string(),
            source,
        })?;
    let mut img = img.to_rgba8();

    let orientation = read_orientation(bytes).unwrap_or(1);
    match orientation {
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            // transpose
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            // transverse
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }
    Ok(img)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let value = field.value.get_uint(0)?;
    u16::try_from(value).ok()
}
