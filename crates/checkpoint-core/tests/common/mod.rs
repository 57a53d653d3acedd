#![allow(dead_code)]

use checkpoint_core::ImagePayload;
use image::{GrayImage, ImageFormat, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;

pub const SIZE: u32 = 150;
const CENTER: f64 = 74.5;

fn inside(x: u32, y: u32, cx: f64, cy: f64, rx: f64, ry: f64) -> bool {
    let dx = (x as f64 - cx) / rx;
    let dy = (y as f64 - cy) / ry;
    dx * dx + dy * dy <= 1.0
}

/// Left-right symmetric cartoon face: lit oval, dark eyes and mouth, dim background.
pub fn face_image(offset: u8) -> GrayImage {
    GrayImage::from_fn(SIZE, SIZE, |x, y| {
        let value = if inside(x, y, CENTER - 22.0, 60.0, 8.0, 5.0)
            || inside(x, y, CENTER + 22.0, 60.0, 8.0, 5.0)
        {
            40
        } else if inside(x, y, CENTER, 100.0, 18.0, 5.0) {
            70
        } else if inside(x, y, CENTER, CENTER, 45.0, 58.0) {
            160 + (y / 10) as u8
        } else {
            40 + (y / 5) as u8
        };
        Luma([value.saturating_add(offset)])
    })
}

/// Passport-style portrait: white backdrop, dark hair and shirt, bright skin.
pub fn id_photo_image() -> GrayImage {
    GrayImage::from_fn(SIZE, SIZE, |x, y| {
        let value = if inside(x, y, CENTER - 18.0, 70.0, 7.0, 4.0)
            || inside(x, y, CENTER + 18.0, 70.0, 7.0, 4.0)
        {
            40
        } else if inside(x, y, CENTER, 105.0, 14.0, 4.0) {
            90
        } else if inside(x, y, CENTER, 78.0, 40.0, 52.0) {
            185
        } else if inside(x, y, CENTER, 62.0, 50.0, 50.0) || y >= 125 {
            30
        } else {
            240
        };
        Luma([value])
    })
}

pub fn noise_image(seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(SIZE, SIZE, |_, _| Luma([rng.gen::<u8>()]))
}

pub fn png(image: &GrayImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

pub fn payload(image: &GrayImage) -> ImagePayload {
    ImagePayload::Encoded(png(image))
}

pub fn face() -> ImagePayload {
    payload(&face_image(0))
}

/// The same face with a +5% uniform brightness offset.
pub fn brighter_face() -> ImagePayload {
    payload(&face_image(13))
}

pub fn id_photo() -> ImagePayload {
    payload(&id_photo_image())
}

pub fn noise() -> ImagePayload {
    payload(&noise_image(7))
}

pub fn blank() -> ImagePayload {
    payload(&GrayImage::from_pixel(SIZE, SIZE, Luma([128])))
}
