use of_market::services::excel::utils::{column_index, column_letters, row_number};
use proptest::prelude::*;

proptest! {
    #[test]
    fn letters_then_index_is_identity(index in 0usize..20_000) {
        let letters = column_letters(index);
        prop_assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
        prop_assert_eq!(column_index(&letters), Some(index));
    }

    #[test]
    fn row_suffix_is_ignored_by_column_index(index in 0usize..20_000, row in 1u32..1_048_576) {
        let reference = format!("{}{}", column_letters(index), row);
        prop_assert_eq!(column_index(&reference), Some(index));
        prop_assert_eq!(row_number(&reference), Some(row));
    }

    #[test]
    fn lowercase_references_resolve_like_uppercase(index in 0usize..20_000) {
        let letters = column_letters(index);
        prop_assert_eq!(column_index(&letters.to_lowercase()), column_index(&letters));
    }
}

#[test]
fn test_known_columns() {
    assert_eq!(column_letters(0), "A");
    assert_eq!(column_letters(25), "Z");
    assert_eq!(column_letters(26), "AA");
    assert_eq!(column_letters(701), "ZZ");
    assert_eq!(column_letters(702), "AAA");
    assert_eq!(column_index("AB7"), Some(27));
    assert_eq!(column_index("42"), None);
}
