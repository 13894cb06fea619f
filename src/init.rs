use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};

use crate::cli::Init;
use crate::config::Config;

pub(crate) fn gen_config() -> Result<String> {
    let yaml =
        serde_yaml::to_string(&Config::default()).context("Failed to serialize default config")?;
    let mut s = String::from(
        "# gzquality project configuration\n\
         #\n\
         # Recognised keys: default_workers, timeout, tools, languages,\n\
         # exclude, include, cache\n\n",
    );
    s.push_str(&yaml);
    Ok(s)
}

pub(crate) fn go(config_path: &Path, init: &Init) -> Result<()> {
    if config_path.exists() && !init.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    let contents = gen_config()?;
    fs::write(config_path, contents)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;
    eprintln!("Wrote {}", config_path.display());
    Ok(())
}
