//! `skein config` — Configuration management commands.

use skein_config::{EngineConfig, ReportLevel};
use skein_core::Fill;

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match EngineConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if config.execution.fill == Fill::None {
                warnings.push("execution.fill is \"none\": callers must pass every slot explicitly");
            }

            if config.execution.trace_calls && config.assembly.report == ReportLevel::Off {
                warnings.push("execution.trace_calls is on while assembly.report is off");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Assembly:  {}", config.assembly.name);
            println!("   Report:    {}", config.assembly.report);
            println!("   Fill:      {}", config.execution.fill);
            println!("   Tracing:   {}", config.execution.trace_calls);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = EngineConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
