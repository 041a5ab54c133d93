//! LLM 配置加载
//!
//! 从环境变量读取模型配置，格式：
//! ```text
//! AGENT_MODEL_<ID>_MODEL=gpt-4o
//! AGENT_MODEL_<ID>_BASEURL=https://api.openai.com/v1/chat/completions
//! AGENT_MODEL_<ID>_APIKEY=sk-...
//! ```
//! `<ID>` 为自定义标识（如 `GPT4O`、`QWEN`），不区分大小写。
//!
//! 配置由调用方显式加载并传入 [`MemoryContext`](crate::context::MemoryContext)，不做全局缓存。

use crate::error::{ConfigError, MemoryError, Result};
use dotenv::dotenv;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

const PREFIX: &str = "AGENT_MODEL_";

/// 单个模型的连接配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// LLM 接口中使用的模型名（如 `gpt-4o`）
    pub model: String,
    /// Chat Completions 接口完整 URL
    pub baseurl: String,
    pub apikey: String,
}

/// 所有已加载的模型配置表（key = model 字段值）
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub models: HashMap<String, ModelConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// 从任意键值对解析模型配置，便于测试
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut model_configs: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (key, value) in vars {
            if let Some(suffix) = key.strip_prefix(PREFIX) {
                let parts: Vec<&str> = suffix.split('_').collect();
                if parts.len() != 2 {
                    return Err(MemoryError::Config(ConfigError::EnvFormatError(key)));
                }
                let model_id = parts[0].to_lowercase();
                let config_key = parts[1].to_lowercase();

                match config_key.as_str() {
                    "model" | "baseurl" | "apikey" => {}
                    _ => {
                        return Err(MemoryError::Config(ConfigError::UnMatchConfigError(
                            config_key, key,
                        )));
                    }
                }
                model_configs
                    .entry(model_id)
                    .or_default()
                    .insert(config_key, value);
            }
        }
        let mut models = HashMap::new();
        for (model_id, config_map) in model_configs {
            let field = |name: &str| {
                config_map
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingConfig(model_id.clone(), name.to_string()))
            };
            let model = field("model")?;
            let baseurl = field("baseurl")?;
            let apikey = field("apikey")?;

            models.insert(
                model.clone(),
                ModelConfig {
                    model,
                    baseurl,
                    apikey,
                },
            );
        }

        Ok(Self { models })
    }

    pub fn get_model(&self, model: &str) -> Result<ModelConfig> {
        self.models
            .get(model)
            .cloned()
            .ok_or_else(|| MemoryError::Config(ConfigError::NotFindModelError(model.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_models_from_vars() {
        let config = Config::from_vars(vars(&[
            ("AGENT_MODEL_QWEN_MODEL", "qwen3-max"),
            ("AGENT_MODEL_QWEN_BASEURL", "https://example.com/v1/chat/completions"),
            ("AGENT_MODEL_QWEN_APIKEY", "sk-test"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        let model = config.get_model("qwen3-max").unwrap();
        assert_eq!(model.apikey, "sk-test");
        assert!(config.get_model("gpt-4o").is_err());
    }

    #[test]
    fn test_missing_field_is_reported() {
        let err = Config::from_vars(vars(&[("AGENT_MODEL_QWEN_MODEL", "qwen3-max")])).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Config(ConfigError::MissingConfig(_, _))
        ));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = Config::from_vars(vars(&[("AGENT_MODEL_QWEN_TEMPERATURE", "0.2")])).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Config(ConfigError::UnMatchConfigError(_, _))
        ));
    }
}
