use crate::maketest::Environment;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
    pub output_directory: Option<PathBuf>,
}

fn default_template_path() -> PathBuf {
    PathBuf::from("templates/autotest.tmpl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub generator: GeneratorConfig,
    pub environment: Environment,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg)
    }
}
