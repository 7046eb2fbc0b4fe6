use cte_rateio::api::{self, AppState};
use cte_rateio::service::{BarcodeReader, Pipeline, TextLayerReader};
use cte_rateio::AppConfig;
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[cfg(feature = "pdfium")]
fn barcode_reader() -> Arc<dyn BarcodeReader> {
    match cte_rateio::service::scanner::PdfiumBarcodeReader::new() {
        Ok(reader) => {
            info!("Using pdfium barcode reader");
            Arc::new(reader)
        }
        Err(e) => {
            tracing::warn!("pdfium unavailable ({}), falling back to text layer", e);
            Arc::new(TextLayerReader)
        }
    }
}

#[cfg(not(feature = "pdfium"))]
fn barcode_reader() -> Arc<dyn BarcodeReader> {
    Arc::new(TextLayerReader)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::load()?;
    info!("Starting server with config: {:?}", config);

    let pipeline = Pipeline::new(config.rateio.clone(), barcode_reader());
    let app = api::router(AppState::new(pipeline)).layer(ServiceBuilder::new());

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/rateio/run       - run allocation");
    info!("  POST /api/rateio/cancel    - cancel current run");
    info!("  GET  /api/rateio/progress  - progress of current run");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
