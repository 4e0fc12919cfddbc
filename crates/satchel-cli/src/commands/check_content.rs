use super::{json_pretty, parse_library, print_diagnostics, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_store::FsStorage;
use std::path::Path;

pub fn run(
    engine: &Engine<FsStorage>,
    file: &Path,
    library: &str,
    json: bool,
) -> Result<u8, String> {
    let library = parse_library(library)?;
    let raw = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    let params: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid content: {}: {e}", file.display()))?;

    let report = engine
        .check_content(&library, params)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_diagnostics(&report.diagnostics);
        println!("{}", json_pretty(&report.params)?);
    }
    Ok(EXIT_SUCCESS)
}
