//! Product code → file name mapping.

use sha2::{Digest, Sha256};

const EXTENSION: &str = ".json";

/// File name for a product code.
///
/// Codes made only of ASCII alphanumerics, `-` and `_` map to `<code>.json`.
/// Anything else has the offending characters replaced with `_` and gains a
/// `~<8 hex>` suffix from the SHA-256 of the raw code. `~` never appears in a
/// clean name, so the two shapes cannot collide with each other.
#[must_use]
pub fn file_name_for(product_code: &str) -> String {
    let sanitized: String = product_code
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !product_code.is_empty() && sanitized == product_code {
        return format!("{sanitized}{EXTENSION}");
    }

    let digest = Sha256::digest(product_code.as_bytes());
    let suffix: String = digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{sanitized}~{suffix}{EXTENSION}")
}

/// Whether a directory entry looks like a product file (not a temp file).
pub(crate) fn is_product_file(name: &str) -> bool {
    name.ends_with(EXTENSION) && !name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_code_maps_directly() {
        assert_eq!(file_name_for("PH1FEA"), "PH1FEA.json");
        assert_eq!(file_name_for("gc-day_trip"), "gc-day_trip.json");
    }

    #[test]
    fn unsafe_characters_are_replaced_and_hashed() {
        let name = file_name_for("../etc/passwd");
        assert!(name.starts_with("___etc_passwd~"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains('/'));
    }

    #[test]
    fn codes_that_sanitize_alike_stay_distinct() {
        assert_ne!(file_name_for("A.B"), file_name_for("A/B"));
        assert_ne!(file_name_for("A.B"), file_name_for("A_B"));
    }

    #[test]
    fn empty_code_still_gets_a_name() {
        let name = file_name_for("");
        assert!(name.starts_with('~'));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn temp_files_are_not_product_files() {
        assert!(is_product_file("PH1FEA.json"));
        assert!(!is_product_file("PH1FEA.json.tmp"));
        assert!(!is_product_file(".DS_Store"));
    }
}
