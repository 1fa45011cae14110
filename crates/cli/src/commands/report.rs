//! `skein report` — Print the build report of the invoker assembly.

use crate::decoding;
use skein_config::EngineConfig;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let (_, report) = decoding::build(&config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}
