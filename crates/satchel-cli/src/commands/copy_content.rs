use super::{json_pretty, EXIT_SUCCESS};
use satchel_core::Engine;
use satchel_schema::ContentId;
use satchel_store::FsStorage;

pub fn run(engine: &Engine<FsStorage>, id: &str, json: bool) -> Result<u8, String> {
    let id = ContentId::new(id);
    let copy = engine.copy_content(&id).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({ "source": id, "copy": copy });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("copied content {id} to {copy}");
    }
    Ok(EXIT_SUCCESS)
}
