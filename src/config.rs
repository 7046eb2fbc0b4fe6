use crate::error::RateioError;
use bigdecimal::BigDecimal;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rateio: RateioSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 电子表格列名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnNames {
    pub document_number: String,
    pub amount: String,
    pub operation: String,
}

/// 叠加层位置 (PDF 坐标, 左下角为原点)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlaySettings {
    pub x: f32,
    pub y: f32,
    pub line_height: f32,
    pub font_size: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateioSettings {
    pub columns: ColumnNames,
    /// 批量 PDF 目录下的临时拆分目录名
    pub split_dir_name: String,
    /// 拆分文件名: "<chave><split_suffix>.pdf"
    pub split_suffix: String,
    /// 输出文件名: 原文件名 + output_suffix
    pub output_suffix: String,
    pub unified_file_name: String,
    pub report_file_name: String,
    pub rounding_tolerance: String,
    pub split_workers: usize,
    pub overlay: OverlaySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            rateio: RateioSettings::default(),
        }
    }
}

impl Default for RateioSettings {
    fn default() -> Self {
        Self {
            columns: ColumnNames {
                document_number: "N° CT-e".to_string(),
                amount: "Vlr Contabil".to_string(),
                operation: "Operação".to_string(),
            },
            split_dir_name: "_split_temp".to_string(),
            split_suffix: "-procCTe".to_string(),
            output_suffix: "_rateado".to_string(),
            unified_file_name: "CTE_RATEIO_UNIFICADO.pdf".to_string(),
            report_file_name: "relatorio_rateio.csv".to_string(),
            rounding_tolerance: "0.01".to_string(),
            split_workers: 1,
            overlay: OverlaySettings {
                x: 410.0,
                y: 120.0,
                line_height: 12.0,
                font_size: 10.0,
            },
        }
    }
}

impl RateioSettings {
    pub fn tolerance(&self) -> BigDecimal {
        BigDecimal::from_str(self.rounding_tolerance.trim())
            .unwrap_or_else(|_| BigDecimal::new(1.into(), 2))
    }
}

impl AppConfig {
    /// 默认值 -> config/rateio.* (可选) -> RATEIO__* 环境变量
    pub fn load() -> Result<Self, RateioError> {
        Self::build().map_err(|e| RateioError::Config(e.to_string()))
    }

    fn build() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/rateio").required(false))
            .add_source(
                Environment::with_prefix("RATEIO")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
