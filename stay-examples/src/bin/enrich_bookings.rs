//! Enrich a JSONL file of bookings with the `stay` bucket and print them.
//! Run:
//!   cargo run -p stay-examples --bin enrich_bookings -- stay-examples/data/bookings.jsonl
//! Input JSONL fields: srch_ci / srch_co as YYYY-MM-DD, anything else is carried through.

use anyhow::Result;
use stay_core::Executor;
use stay_io::{FileSink, FileSource};
use stay_ops::{Map, StayEnricher};

#[tokio::main]
async fn main() -> Result<()> {
    let input = std::env::args().nth(1).unwrap_or_else(|| {
        let p = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("data")
            .join("bookings.jsonl");
        p.to_string_lossy().to_string()
    });

    let mut exec = Executor::new();
    exec.source(FileSource::jsonl(input))
        .operator(Map::new(StayEnricher))
        .sink(FileSink::stdout());

    println!("{}", exec.describe());
    exec.run().await?;
    Ok(())
}
