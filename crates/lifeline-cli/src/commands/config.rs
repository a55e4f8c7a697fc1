//! config command - print the effective configuration

use std::io::Write;

use anyhow::{Context, Result};
use lifeline_config::Config;

/// Print `config` as TOML, after file, environment and flag overrides
pub fn execute(config: &Config, out: &mut impl Write) -> Result<()> {
    let text = config.to_toml_string().context("Failed to render configuration")?;
    out.write_all(text.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printed_config_parses_back() {
        let mut config = Config::default();
        config.engine.power = 3;

        let mut out = Vec::new();
        execute(&config, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[engine]"));
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
