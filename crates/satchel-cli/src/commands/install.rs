use super::{
    colorize_outcome, json_pretty, print_diagnostics, spin_fail, spin_ok, spinner, EXIT_INVALID,
    EXIT_SUCCESS,
};
use satchel_core::Engine;
use satchel_store::FsStorage;
use std::path::Path;

pub fn run(engine: &Engine<FsStorage>, dir: &Path, json: bool) -> Result<u8, String> {
    let pb = if json {
        None
    } else {
        Some(spinner("installing package..."))
    };

    let report = match engine.install(dir) {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "install failed");
            }
            return Err(e.to_string());
        }
    };
    if let Some(ref pb) = pb {
        if report.is_installed() {
            spin_ok(pb, "package installed");
        } else {
            spin_fail(pb, "package rejected");
        }
    }

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_diagnostics(&report.verdict.diagnostics);
        for library in &report.libraries {
            println!(
                "  {:<32} {}",
                library.version,
                colorize_outcome(&library.classification.to_string())
            );
        }
        if let Some(id) = &report.content_id {
            print_diagnostics(&report.content_diagnostics);
            println!(
                "content id: {id} ({} libraries used, {} warnings)",
                report.usage.len(),
                report.content_diagnostics.len()
            );
        }
    }

    Ok(if report.is_installed() {
        EXIT_SUCCESS
    } else {
        EXIT_INVALID
    })
}
