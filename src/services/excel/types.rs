use smallvec::SmallVec;

/// One resolved cell: zero-based column and its text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCell {
    pub column: usize,
    pub value: String,
}

/// A worksheet row as read from the document, before any typing.
///
/// `index` is the 1-based spreadsheet row number; row 1 is the header.
/// Cells whose XML carried no value node are simply not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub index: u32,
    pub cells: SmallVec<[RawCell; 32]>,
}

impl RawRow {
    pub fn new(index: u32) -> Self {
        Self { index, cells: SmallVec::new() }
    }

    pub fn push(&mut self, column: usize, value: String) {
        self.cells.push(RawCell { column, value });
    }

    pub fn is_header(&self) -> bool {
        self.index == 1
    }

    pub fn get(&self, column: usize) -> Option<&str> {
        // Cells arrive in column order from both backends, but a hand-edited
        // sheet may not respect that.
        self.cells
            .iter()
            .find(|cell| cell.column == column)
            .map(|cell| cell.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_none_for_missing_cell() {
        let mut row = RawRow::new(2);
        row.push(0, "A".to_string());
        row.push(3, "D".to_string());
        assert_eq!(row.get(3), Some("D"));
        assert_eq!(row.get(1), None);
        assert!(!row.is_header());
    }
}
