use super::{json_pretty, parse_library, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_store::FsStorage;

pub fn run(engine: &Engine<FsStorage>, library: &str, json: bool) -> Result<u8, String> {
    let library = parse_library(library)?;
    let closure = engine.deps(&library).map_err(|e| e.to_string())?;

    let mut entries: Vec<_> = closure.values().collect();
    entries.sort_by_key(|e| e.weight);

    if json {
        let payload: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "library": e.library.identity,
                    "version": e.library.full_version(),
                    "preloaded": e.preloaded,
                    "weight": e.weight,
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else if entries.is_empty() {
        println!("{library} has no dependencies");
    } else {
        println!("{:<6} {:<32} LOAD", "WEIGHT", "LIBRARY");
        for e in &entries {
            let load = if e.preloaded { "preloaded" } else { "dynamic" };
            println!("{:<6} {:<32} {load}", e.weight, e.library.full_version());
        }
    }
    Ok(EXIT_SUCCESS)
}
