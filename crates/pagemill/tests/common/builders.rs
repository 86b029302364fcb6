//! Builders for test inputs.
//!
//! Everything is generated in memory so the suite needs no fixture files.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use image::{ImageFormat, Rgb, RgbImage};
use lopdf::{dictionary, Document, Object};
use zip::write::SimpleFileOptions;

/// A solid-colour PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Png)
}

/// A solid-colour baseline JPEG.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encode(width, height, ImageFormat::Jpeg)
}

/// A JPEG cut off halfway, so the end-of-image marker is missing.
pub fn truncated_jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = jpeg(width, height);
    bytes.truncate(bytes.len() / 2);
    bytes
}

/// A JPEG with a COM segment right after the start-of-image marker.
pub fn jpeg_with_comment(width: u32, height: u32, comment: &[u8]) -> Vec<u8> {
    let encoded = jpeg(width, height);
    let segment_len = u16::try_from(comment.len() + 2).expect("Comment too long");
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xFE];
    bytes.extend_from_slice(&segment_len.to_be_bytes());
    bytes.extend_from_slice(comment);
    bytes.extend_from_slice(&encoded[2..]);
    bytes
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("Failed to encode image");
    out.into_inner()
}

/// A deflate-compressed zip with the given entries, in the given order.
pub fn zip_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        writer.write_all(content).expect("Failed to write zip entry");
    }
    writer.finish().expect("Failed to finish zip").into_inner()
}

/// A zip holding one entry of `size` zero bytes. Compresses roughly a
/// thousandfold.
pub fn zip_bomb(entry: &str, size: usize) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(entry, SimpleFileOptions::default())
        .expect("Failed to start zip entry");
    let chunk = vec![0u8; 1024 * 1024];
    let mut left = size;
    while left > 0 {
        let n = left.min(chunk.len());
        writer.write_all(&chunk[..n]).expect("Failed to write zip entry");
        left -= n;
    }
    writer.finish().expect("Failed to finish zip").into_inner()
}

/// A plain ustar archive.
pub fn tar_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, name, content.as_slice())
            .expect("Failed to append tar entry");
    }
    builder.into_inner().expect("Failed to finish tar")
}

/// A gzip-compressed ustar archive.
pub fn tar_gz_archive(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let tar = tar_archive(entries);
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar).expect("Failed to gzip tar");
    encoder.finish().expect("Failed to finish gzip")
}

/// A US Letter PDF with `pages` blank pages.
pub fn pdf_document(pages: usize) -> Vec<u8> {
    save(&mut letter_document(pages))
}

/// A PDF whose trailer points at a standard-security encryption dictionary
/// that the empty password cannot open.
pub fn encrypted_pdf_document(pages: usize) -> Vec<u8> {
    let mut doc = letter_document(pages);
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "P" => -4,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    save(&mut doc)
}

fn letter_document(pages: usize) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

fn save(doc: &mut Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("Failed to save PDF");
    bytes
}

/// Whether an external binary can be started.
pub fn binary_available(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--help")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
