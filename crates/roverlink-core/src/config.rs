//! 应用配置和持久化
//!
//! 提供操作超时、默认扫描过滤等设置的存储和读取。

use crate::ble::ScanFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// read/write/rssi 挂起请求的超时（毫秒）
    pub op_timeout_ms: u64,
    /// 默认扫描过滤的服务 UUID（空 = 匹配所有广播）
    pub scan_services: Vec<Uuid>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            op_timeout_ms: 10_000,
            scan_services: Vec::new(),
        }
    }
}

impl Settings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roverlink");
        config_dir.join("settings.toml")
    }

    /// 加载设置（文件不存在或损坏时退回默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// 由配置构造默认扫描过滤器
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter::services(self.scan_services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.op_timeout(), Duration::from_secs(10));
        assert!(settings.scan_filter().is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings {
            op_timeout_ms: 2_500,
            scan_services: vec![Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb)],
        };
        let content = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&content).unwrap();
        assert_eq!(parsed.op_timeout_ms, 2_500);
        assert_eq!(parsed.scan_services, settings.scan_services);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        // 缺字段的旧配置不应让解析失败到 panic，而是整体退回默认
        let parsed: Result<Settings, _> = toml::from_str("op_timeout_ms = 500");
        assert!(parsed.is_err());
    }
}
