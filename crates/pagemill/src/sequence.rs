//! Natural ordering of page names and ordinal assignment.

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::config::RasterFormat;
use crate::validate::ValidatedPage;

/// A page with its final position in the chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedPage {
    /// 1-based, contiguous.
    pub ordinal: u32,
    pub original_name: String,
    pub relative_path: PathBuf,
    pub format: RasterFormat,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

/// Orders pages by name, keeping container order for equal names, and
/// numbers them 1..N.
pub fn sequence_pages(mut pages: Vec<ValidatedPage>) -> Vec<SequencedPage> {
    pages.sort_by(|a, b| {
        natural_cmp(&a.original_name, &b.original_name).then(a.sequence.cmp(&b.sequence))
    });

    pages
        .into_iter()
        .zip(1u32..)
        .map(|(page, ordinal)| SequencedPage {
            ordinal,
            original_name: page.original_name,
            relative_path: page.relative_path,
            format: page.format,
            width: page.width,
            height: page.height,
            size: page.size,
        })
        .collect()
}

/// Compares names so that embedded numbers sort by value: "2" < "10".
///
/// Digit runs compare numerically at any length (leading zeros ignored),
/// everything else compares case-insensitively. Backslashes count as `/`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = compare_chunks(&x, &y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    Digits(String),
    Text(String),
}

fn compare_chunks(a: &Chunk, b: &Chunk) -> Ordering {
    match (a, b) {
        (Chunk::Digits(x), Chunk::Digits(y)) => {
            let x = x.trim_start_matches('0');
            let y = y.trim_start_matches('0');
            x.len().cmp(&y.len()).then_with(|| x.cmp(y))
        }
        (Chunk::Text(x), Chunk::Text(y)) => x.cmp(y),
        // Numbers sort before words, as in "1.jpg" < "cover.jpg".
        (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
        (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
    }
}

struct Chunks<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            chars: s.chars().peekable(),
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let first = self.chars.next()?;
        let digits = first.is_ascii_digit();
        let mut run = String::new();
        push_normalized(&mut run, first);

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() != digits {
                break;
            }
            push_normalized(&mut run, c);
            self.chars.next();
        }

        Some(if digits {
            Chunk::Digits(run)
        } else {
            Chunk::Text(run)
        })
    }
}

fn push_normalized(run: &mut String, c: char) {
    if c == '\\' {
        run.push('/');
    } else {
        run.extend(c.to_lowercase());
    }
}
