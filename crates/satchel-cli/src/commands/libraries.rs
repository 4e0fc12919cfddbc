use super::{json_pretty, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_store::FsStorage;

pub fn run(engine: &Engine<FsStorage>, json: bool) -> Result<u8, String> {
    let libraries = engine.list_libraries().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&libraries)?);
    } else if libraries.is_empty() {
        println!("no libraries installed");
    } else {
        println!("{:<32} {:<10} {:<8} TITLE", "LIBRARY", "VERSION", "RUNNABLE");
        for lib in &libraries {
            let record = &lib.record;
            let version = format!(
                "{}.{}.{}",
                record.identity.major_version, record.identity.minor_version, record.patch_version
            );
            let runnable = if record.runnable() { "yes" } else { "no" };
            println!(
                "{:<32} {:<10} {:<8} {}",
                record.machine_name(),
                version,
                runnable,
                record.title()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
