use serde::Serialize;
use serde_json::json;

use vendi_core::config::{AppConfig, LlmProvider, LoadOptions};
use vendi_db::{connect_with_settings, migrations};

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    passed: bool,
    detail: String,
}

pub fn run(json_output: bool) -> String {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(Check {
                name: "config",
                passed: true,
                detail: "configuration loaded and validated".to_string(),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(Check { name: "config", passed: false, detail: error.to_string() });
            None
        }
    };

    if let Some(config) = &config {
        match config.llm.provider {
            LlmProvider::Ollama => checks.push(Check {
                name: "llm",
                passed: true,
                detail: format!(
                    "ollama provider configured (model {}, vision {})",
                    config.llm.model, config.llm.vision_model
                ),
            }),
            other => checks.push(Check {
                name: "llm",
                passed: false,
                detail: format!(
                    "provider {other:?} is not implemented yet; use the ollama provider or a \
                     custom model client"
                ),
            }),
        }

        checks.push(database_check(config));
    }

    let all_passed = checks.iter().all(|check| check.passed);

    if json_output {
        return json!({
            "command": "doctor",
            "status": if all_passed { "ok" } else { "error" },
            "checks": checks,
        })
        .to_string();
    }

    let mut lines = Vec::with_capacity(checks.len() + 1);
    for check in &checks {
        let mark = if check.passed { "ok" } else { "FAIL" };
        lines.push(format!("[{mark:>4}] {}: {}", check.name, check.detail));
    }
    lines.push(if all_passed {
        "doctor: all checks passed".to_string()
    } else {
        "doctor: one or more checks failed".to_string()
    });
    lines.join("\n")
}

fn database_check(config: &AppConfig) -> Check {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return Check {
                name: "database",
                passed: false,
                detail: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return Check {
                    name: "database",
                    passed: false,
                    detail: format!("connection failed: {error}"),
                };
            }
        };

        let check = match migrations::run_pending(&pool).await {
            Ok(()) => Check {
                name: "database",
                passed: true,
                detail: "connected and migrations applied".to_string(),
            },
            Err(error) => Check {
                name: "database",
                passed: false,
                detail: format!("migrations failed: {error}"),
            },
        };

        pool.close().await;
        check
    })
}
