//! `bi-agent config`: print (and optionally save) the effective configuration

use anyhow::Result;
use std::path::Path;

use crate::config::AppConfig;

pub fn run(config: &AppConfig, write: Option<&Path>) -> Result<()> {
    println!("# data_dir = {:?}", config.data_dir().display().to_string());
    print!("{}", config.to_toml()?);

    if let Some(path) = write {
        config.save(path)?;
        println!("\n# written to {}", path.display());
    }
    Ok(())
}
