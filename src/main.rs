use std::process::ExitCode;
use std::sync::Arc;

use oxyprobe::config::{init_logging, load_config};
use oxyprobe::probe::run_checks;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.debug);

    if config.checks.is_empty() {
        log::warn!("No checks configured, nothing to do");
        return ExitCode::SUCCESS;
    }

    let config = Arc::new(config);
    let reports = run_checks(&config.checks, config.clone()).await;

    let mut failed = 0;
    for (check, report) in config.checks.iter().zip(&reports) {
        let target = format!("{:?} {}", check.probe, check.params.host).to_lowercase();
        match report.last_error() {
            None => println!(
                "✅ {target}: {}",
                report.status_code.as_deref().unwrap_or("OK")
            ),
            Some(error) => {
                failed += 1;
                println!("❌ {target}: [{}] {}", error.component, error.message);
            }
        }
        println!("{}", report.render());
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Failed to serialize report {}: {e}", report.id),
        }
    }

    if failed > 0 {
        log::warn!("{failed} of {} check(s) failed", reports.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
