use arrow_json::LineDelimitedWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

// Prints every row of the given interchange files as one JSON object per line.
fn main() -> Result<(), Box<dyn Error>> {
    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        return Err("usage: inspect_interchange <file.parquet>...".into());
    }

    let stdout = io::stdout();
    let mut writer = LineDelimitedWriter::new(stdout.lock());
    let mut total = 0usize;

    for path in &paths {
        let path = Path::new(path);
        if !path.exists() {
            return Err(format!("file not found: {}", path.display()).into());
        }
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        for batch in reader {
            let batch = batch?;
            total += batch.num_rows();
            writer.write(&batch)?;
        }
    }

    writer.finish()?;
    let mut out = writer.into_inner();
    out.flush()?;
    eprintln!("{} rows from {} file(s)", total, paths.len());
    Ok(())
}
