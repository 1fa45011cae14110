//! `skein doctor` — Diagnose configuration and assembly health.

use crate::decoding;
use skein_config::{EngineConfig, ReportLevel};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Skein Doctor — System Diagnostics");
    println!("====================================\n");

    let mut issues = 0;

    println!("  ✅ Rust binary running");

    let config_path = EngineConfig::config_dir().join("config.toml");
    let config = if config_path.exists() {
        match EngineConfig::load() {
            Ok(config) => {
                println!("  ✅ Config file valid");
                config
            }
            Err(e) => {
                println!("  ❌ Config file invalid: {e}");
                issues += 1;
                EngineConfig::default()
            }
        }
    } else {
        println!("  ⚠️  No config file at {}, using defaults", config_path.display());
        EngineConfig::default()
    };

    let mut quiet = config.clone();
    quiet.assembly.report = ReportLevel::Off;
    match decoding::build(&quiet) {
        Ok((processing, _)) => {
            println!(
                "  ✅ Invoker assembly resolves ({} call(s), {} context(s))",
                processing.calls().len(),
                processing.contexts().count()
            );
            match decoding::run(&processing, &quiet) {
                Ok(outcome) => println!(
                    "  ✅ Invoker pipeline runs ({} of {} invoker(s) decoded)",
                    outcome.invokers.len() - outcome.aborted().count(),
                    outcome.invokers.len()
                ),
                Err(e) => {
                    println!("  ❌ Invoker pipeline failed: {e}");
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ❌ Invoker assembly does not resolve: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
