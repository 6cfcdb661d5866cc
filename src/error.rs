use thiserror::Error;

/// Infrastructure failures. Missing or malformed cell values never show up
/// here: the parser turns them into `None`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Workbook error: {0}")]
    WorkbookError(#[from] calamine::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing worksheet part: {0}")]
    MissingPart(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<quick_xml::events::attributes::AttrError> for AppError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        AppError::XmlError(quick_xml::Error::from(err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_part_message() {
        let err = AppError::MissingPart("xl/worksheets/sheet1.xml".to_string());
        assert_eq!(err.to_string(), "Missing worksheet part: xl/worksheets/sheet1.xml");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::IoError(_)));
    }
}
