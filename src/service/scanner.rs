//! 批量扫描件的逐页识别
//!
//! 默认实现读取页面文字层; 开启 `pdfium` feature 后可改用光栅化 + 条码解码。

use crate::error::ScanError;
use lopdf::Document;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// 页面识别器: 每个批次文件打开一次, 返回的会话在该文件的全部页面间复用
pub trait BarcodeReader: Send + Sync {
    fn open<'a>(
        &'a self,
        path: &'a Path,
        document: &'a Document,
    ) -> Result<Box<dyn PageSession + 'a>, ScanError>;
}

/// 单个文件的识别会话
pub trait PageSession {
    /// 返回该页 (1 起始) 解码出的所有原始载荷, 由调用方做 chave 校验
    fn read_page(&mut self, number: u32) -> Result<Vec<String>, ScanError>;
}

/// 文字层识别: 44 位数字, 允许 11 组 4 位以空格或点分隔
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLayerReader;

struct TextLayerSession<'a> {
    document: &'a Document,
}

impl BarcodeReader for TextLayerReader {
    fn open<'a>(
        &'a self,
        _path: &'a Path,
        document: &'a Document,
    ) -> Result<Box<dyn PageSession + 'a>, ScanError> {
        Ok(Box::new(TextLayerSession { document }))
    }
}

impl PageSession for TextLayerSession<'_> {
    fn read_page(&mut self, number: u32) -> Result<Vec<String>, ScanError> {
        let text = self
            .document
            .extract_text(&[number])
            .map_err(|e| ScanError::Decode {
                page: number,
                reason: e.to_string(),
            })?;
        Ok(find_keys_in_text(&text))
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{4}(?:[ .]?\d{4}){10}").expect("static key pattern")
    })
}

pub fn find_keys_in_text(text: &str) -> Vec<String> {
    key_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(feature = "pdfium")]
pub use self::raster::{decode_luma, PdfiumBarcodeReader};

#[cfg(feature = "pdfium")]
mod raster {
    use super::{BarcodeReader, PageSession};
    use crate::error::ScanError;
    use lopdf::Document;
    use pdfium_render::prelude::*;
    use std::path::Path;

    /// 渲染倍率
    const RENDER_SCALE: f32 = 3.0;

    /// 灰度图中的全部条码; 未找到时为空
    pub fn decode_luma(luma: Vec<u8>, width: u32, height: u32) -> Vec<String> {
        match rxing::helpers::detect_multiple_in_luma(luma, width, height) {
            Ok(results) => results.iter().map(|r| r.getText().to_string()).collect(),
            Err(e) => {
                tracing::trace!("No barcode in {}x{} image: {}", width, height, e);
                Vec::new()
            }
        }
    }

    /// pdfium 调用由 pdfium-render 内部串行化, 条码解码在各 worker 上并行
    pub struct PdfiumBarcodeReader {
        pdfium: Pdfium,
    }

    impl PdfiumBarcodeReader {
        pub fn new() -> Result<Self, ScanError> {
            let bindings = Pdfium::bind_to_system_library()
                .map_err(|e| ScanError::Unavailable(e.to_string()))?;
            Ok(Self {
                pdfium: Pdfium::new(bindings),
            })
        }
    }

    /// 每个批次文件只加载一次; 每页渲染结果用完即释放
    struct PdfiumSession<'a> {
        document: PdfDocument<'a>,
    }

    impl BarcodeReader for PdfiumBarcodeReader {
        fn open<'a>(
            &'a self,
            path: &'a Path,
            _document: &'a Document,
        ) -> Result<Box<dyn PageSession + 'a>, ScanError> {
            let document = self
                .pdfium
                .load_pdf_from_file(path, None)
                .map_err(|e| ScanError::Unavailable(format!("{}: {}", path.display(), e)))?;
            Ok(Box::new(PdfiumSession { document }))
        }
    }

    impl PageSession for PdfiumSession<'_> {
        fn read_page(&mut self, number: u32) -> Result<Vec<String>, ScanError> {
            let render_err = |reason: String| ScanError::Render {
                page: number,
                reason,
            };
            let index = number
                .saturating_sub(1)
                .try_into()
                .map_err(|_| render_err("page index out of range".into()))?;
            let page = self
                .document
                .pages()
                .get(index)
                .map_err(|e| render_err(e.to_string()))?;
            let image = page
                .render_with_config(&PdfRenderConfig::new().scale_page_by_factor(RENDER_SCALE))
                .map_err(|e| render_err(e.to_string()))?
                .as_image()
                .to_luma8();

            let (width, height) = image.dimensions();
            Ok(decode_luma(image.into_raw(), width, height))
        }
    }

}
