use anyhow::{Context, Result};

use of_market::config::Config;
use of_market::logging;
use of_market::reports::{run_reports, ReportContext};
use of_market::services::excel::open_row_source;
use of_market::services::parser::load_records;
use of_market::services::tam::TamFilter;
use of_market::services::writer::ReportWriter;

fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = Config::new()?;
    tracing::info!(
        "Workbook {} ({:?} reader), certification rule '{}'",
        config.xlsx_path.display(),
        config.reader,
        config.certification_rule.name()
    );

    let mut source = open_row_source(config.reader, &config.xlsx_path)
        .with_context(|| format!("opening {}", config.xlsx_path.display()))?;
    let sheet = load_records(source.as_mut(), &config.schema)?;

    let ctx = ReportContext::new(&sheet.records, TamFilter::new(config.certification_rule));
    let mut writer = ReportWriter::new(&config.output_dir)?;
    run_reports(&config.reports, &ctx, &mut writer)?;

    tracing::info!(
        "{} files written to {}",
        writer.written().len(),
        writer.dir().display()
    );
    Ok(())
}
