//! Writing stashed texture uploads out as PNG files.

use gleam::gl::{self, GLenum};
use image::png::PngEncoder;
use image::ColorType;

use std::fs::File;
use std::io;
use std::path::Path;

use crate::gl::LUMINANCE;
use crate::interceptor::{bytes_per_pixel, upload_size};

/// Write the pixels of a `glTexImage2D` upload to `path`.
///
/// `data` is laid out the way the game passed it: each row padded to a
/// multiple of four bytes.
pub fn write_image<P: AsRef<Path>>(path: P, data: &[u8], width: u32, height: u32, format: GLenum) -> io::Result<()> {
    let color_type = match format {
        LUMINANCE => ColorType::L8,
        gl::RGBA => ColorType::Rgba8,
        _ => return Err(unsupported(format!("texture format 0x{:x}", format))),
    };
    let components = bytes_per_pixel(format).unwrap_or(1);
    if data.len() < upload_size(width as i32, height as i32, components) {
        return Err(unsupported(format!(
            "{} bytes is too short for a {}x{} upload",
            data.len(),
            width,
            height
        )));
    }

    let row = width as usize * components;
    let stride = upload_size(width as i32, 1, components);
    let mut packed = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        packed.extend_from_slice(&data[y * stride..y * stride + row]);
    }

    let file = File::create(path)?;
    PngEncoder::new(file)
        .encode(&packed, width, height, color_type)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn unsupported(what: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("write_image: {}", what))
}

#[test]
fn padded_rows_are_packed() {
    let path = std::env::temp_dir().join(format!("stereo-replay-write-image-{}.png", std::process::id()));
    // Three luminance pixels per row, padded to four.
    let data = [10, 20, 30, 0, 40, 50, 60, 0];
    write_image(&path, &data, 3, 2, LUMINANCE).unwrap();

    match image::open(&path).unwrap() {
        image::DynamicImage::ImageLuma8(decoded) => {
            assert_eq!(decoded.dimensions(), (3, 2));
            assert_eq!(decoded.into_raw(), vec![10, 20, 30, 40, 50, 60]);
        }
        other => panic!("decoded as {:?}", other.color()),
    }

    // RGBA rows are always a multiple of four bytes, so nothing is stripped.
    let rgba: Vec<u8> = (0..24).collect();
    write_image(&path, &rgba, 3, 2, gl::RGBA).unwrap();
    match image::open(&path).unwrap() {
        image::DynamicImage::ImageRgba8(decoded) => assert_eq!(decoded.into_raw(), rgba),
        other => panic!("decoded as {:?}", other.color()),
    }
    std::fs::remove_file(&path).unwrap();

    assert!(write_image(&path, &data, 4, 4, LUMINANCE).is_err());
    assert!(write_image(&path, &data, 1, 1, gl::RGB).is_err());
}
