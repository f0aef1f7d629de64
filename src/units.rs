//! Length Conversion to User Units (90 dpi)

use regex::Regex;
use std::sync::OnceLock;

/// Unit suffixes and their size in user units.
const UNIT_TABLE: [(&str, f64); 10] = [
    ("in", 90.0),
    ("pt", 1.25),
    ("px", 1.0),
    ("mm", 3.5433070866),
    ("cm", 35.433070866),
    ("m", 3543.3070866),
    ("km", 3543307.0866),
    ("pc", 15.0),
    ("yd", 3240.0),
    ("ft", 1080.0),
];

fn re_number() -> &'static Regex {
    static ONCE: OnceLock<Regex> = OnceLock::new();
    ONCE.get_or_init(|| {
        Regex::new(r"^(?:[-+]?[0-9]+(?:\.[0-9]*)?|[-+]?\.[0-9]+)(?:[eE][-+]?[0-9]+)?").unwrap()
    })
}

fn re_unit() -> &'static Regex {
    static ONCE: OnceLock<Regex> = OnceLock::new();
    ONCE.get_or_init(|| Regex::new(r"(in|pt|px|mm|cm|km|m|pc|yd|ft)$").unwrap())
}

/// `"210mm"` -> `744.09...`. A missing number reads as 0, an unknown unit
/// leaves the number as is.
pub fn to_user_units(length: &str) -> f64 {
    let length = length.trim();
    let value = re_number()
        .find(length)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    let factor = re_unit()
        .find(length)
        .and_then(|m| UNIT_TABLE.iter().find(|(unit, _)| *unit == m.as_str()))
        .map_or(1.0, |(_, factor)| *factor);

    value * factor
}
