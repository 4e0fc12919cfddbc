use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_store::{verify_store_integrity, FsStorage};

pub fn run(engine: &Engine<FsStorage>, json: bool) -> Result<u8, String> {
    let report =
        verify_store_integrity(engine.provider().layout()).map_err(|e| format!("store error: {e}"))?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "store integrity: libraries {}/{}, content {}/{}, usage {}/{} passed",
            report.libraries_passed,
            report.libraries_checked,
            report.content_passed,
            report.content_checked,
            report.usage_passed,
            report.usage_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.id, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
