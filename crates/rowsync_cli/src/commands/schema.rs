//! Schema command implementation.

use std::path::Path;

/// Runs the schema command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = super::open(path)?;
    let schema = adapter.current_schema()?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
