//! `skein demo` — Run the invoker decoding pipeline.

use crate::decoding;
use skein_config::EngineConfig;
use skein_core::Fill;

pub fn run(fill: Option<&str>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(fill) = fill {
        config.execution.fill = fill.parse::<Fill>()?;
    }

    let (processing, _) = decoding::build(&config)?;
    let outcome = decoding::run(&processing, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("Decoding {} invoker(s) (fill: {})", outcome.invokers.len(), outcome.fill);
    println!();
    for invoker in &outcome.invokers {
        let mark = if invoker.aborted { "❌" } else { "✅" };
        let inputs: Vec<String> = invoker
            .inputs
            .iter()
            .map(|input| format!("{}: {}", input.name, input.type_name))
            .collect();
        println!("  {mark} {:<14} ({})  at {}", invoker.name, inputs.join(", "), invoker.location);
        if !invoker.solved.is_empty() {
            println!("       solved: {}", invoker.solved.join(", "));
        }
    }

    let aborted = outcome.aborted().count();
    println!();
    if aborted == 0 {
        println!("  🎉 Every invoker decoded");
    } else {
        println!("  ⚠️  {aborted} invoker(s) have inputs no decoder accepts");
    }
    Ok(())
}
