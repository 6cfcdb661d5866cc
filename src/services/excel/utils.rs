/// Zero-based column index of a cell reference such as `"AB7"`.
///
/// Only the letter prefix matters; the row number is ignored. Returns `None`
/// when the reference carries no letter at all.
pub fn column_index(reference: &str) -> Option<usize> {
    let mut index: usize = 0;
    let mut seen = false;
    for ch in reference.chars() {
        if !ch.is_ascii_alphabetic() {
            if seen {
                break;
            }
            continue;
        }
        seen = true;
        let value = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index * 26 + value;
    }
    if seen {
        Some(index - 1)
    } else {
        None
    }
}

/// Inverse of [`column_index`]: `0 -> "A"`, `25 -> "Z"`, `26 -> "AA"`.
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Row number embedded in a cell or row reference (`"C12"` -> 12).
pub fn row_number(reference: &str) -> Option<u32> {
    let digits: String = reference.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_index_known_values() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("Z"), Some(25));
        assert_eq!(column_index("AA"), Some(26));
        assert_eq!(column_index("AB7"), Some(27));
        assert_eq!(column_index("ad30"), Some(29));
        assert_eq!(column_index("XFD1048576"), Some(16383));
        assert_eq!(column_index("42"), None);
    }

    #[test]
    fn test_column_letters_known_values() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn test_row_number() {
        assert_eq!(row_number("C12"), Some(12));
        assert_eq!(row_number("1"), Some(1));
        assert_eq!(row_number("C"), None);
    }
}
