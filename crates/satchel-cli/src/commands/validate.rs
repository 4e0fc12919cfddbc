use super::{json_pretty, print_diagnostics, EXIT_INVALID, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_schema::LibraryRecord;
use satchel_store::FsStorage;
use std::path::Path;

pub fn run(engine: &Engine<FsStorage>, dir: &Path, json: bool) -> Result<u8, String> {
    let report = engine.validate(dir).map_err(|e| e.to_string())?;
    let libraries: Vec<String> = report
        .package
        .iter()
        .flat_map(|p| p.libraries.values().map(LibraryRecord::full_version))
        .collect();

    if json {
        let payload = serde_json::json!({
            "valid": report.is_valid(),
            "diagnostics": report.verdict.diagnostics,
            "missing": report.missing,
            "libraries": libraries,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        print_diagnostics(&report.verdict.diagnostics);
        if report.is_valid() {
            println!("package is valid ({} libraries)", libraries.len());
            for library in &libraries {
                println!("  {library}");
            }
        } else {
            println!(
                "package is invalid: {} problems",
                report.verdict.diagnostics.len()
            );
        }
    }

    Ok(if report.is_valid() {
        EXIT_SUCCESS
    } else {
        EXIT_INVALID
    })
}
