//! Author field splitting

use lazy_static::lazy_static;
use refbib_domain::RecordAuthor;
use regex::Regex;

lazy_static! {
    static ref AND_SEPARATOR: Regex = Regex::new(r"(?i)\s+and\s+").unwrap();
}

/// Split a BibTeX author field into authors.
///
/// Pieces are separated by the literal ` and ` (case-insensitive). Each
/// piece splits on the first comma into family/given; without a comma the
/// last whitespace-separated token is the family name and the first the
/// given name.
pub fn parse_author_field(field: &str) -> Vec<RecordAuthor> {
    AND_SEPARATOR
        .split(field)
        .filter_map(|piece| {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            Some(parse_single(piece))
        })
        .collect()
}

fn parse_single(piece: &str) -> RecordAuthor {
    if let Some((family, given)) = piece.split_once(',') {
        let mut author = RecordAuthor::new(family.trim());
        let given = given.trim();
        if !given.is_empty() {
            author = author.with_given(given);
        }
        return author;
    }

    let parts: Vec<&str> = piece.split_whitespace().collect();
    match parts.as_slice() {
        [only] => RecordAuthor::new(*only),
        [first, .., last] => RecordAuthor::new(*last).with_given(*first),
        [] => RecordAuthor::default(),
    }
}
