//! `ragchat config`: Configuration management commands.

use std::path::Path;

use ragchat_config::{AppConfig, RetrievalFailurePolicy};

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {} ...", super::config_file(config_path).display());

    match super::load_config(config_path) {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.default_provider);
            println!("   Model:     {}", config.model);
            println!("   Encoding:  {}", config.encoding);
            println!(
                "   Budget:    {} tokens ({} per message)",
                config.budget.max_total_tokens, config.budget.tokens_per_message
            );
            println!("   Retrieval: {}", config.retrieval.backend);
            println!(
                "   Gateway:   {}:{}",
                config.gateway.host, config.gateway.port
            );
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e);
        }
    }

    Ok(())
}

/// Problems that don't stop the server from starting but will bite later.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if !config.has_api_key() {
        warnings.push("No API key set (set RAGCHAT_API_KEY or OPENAI_API_KEY)");
    }

    let retrieval = &config.retrieval;
    if retrieval.backend == "pinecone" {
        if retrieval.api_key.is_none() {
            warnings.push("Pinecone backend without an API key (set PINECONE_API_KEY)");
        }
        if retrieval.index.is_none() && retrieval.index_host.is_none() {
            warnings.push("Pinecone backend needs retrieval.index or retrieval.index_host");
        }
    }
    if retrieval.backend == "memory" && retrieval.seed_file.is_none() {
        warnings.push("Memory backend without a seed_file starts empty");
    }
    if retrieval.on_failure == RetrievalFailurePolicy::Abort {
        warnings.push("Retrieval failures abort requests (retrieval.on_failure = \"abort\")");
    }

    if config.budget.max_human_tokens > config.budget.max_total_tokens {
        warnings.push("budget.max_human_tokens exceeds budget.max_total_tokens");
    }

    warnings
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config.redacted())?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    println!("{}", super::config_file(config_path).display());
}

pub fn print_default() {
    println!("{}", AppConfig::default_toml());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = crate::commands::config_file(None);
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn explicit_config_path_wins() {
        let path = crate::commands::config_file(Some(Path::new("/etc/ragchat.toml")));
        assert_eq!(path, Path::new("/etc/ragchat.toml"));
    }

    #[test]
    fn missing_pinecone_settings_are_flagged() {
        let config = AppConfig::default();
        let warnings = warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("PINECONE_API_KEY")));
        assert!(warnings.iter().any(|w| w.contains("retrieval.index")));
    }

    #[test]
    fn quiet_when_fully_configured() {
        let mut config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        config.retrieval.backend = "none".into();
        assert!(warnings(&config).is_empty());
    }
}
