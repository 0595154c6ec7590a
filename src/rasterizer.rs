//! Chart rasterization: the external collaborator contract and a dependency-free
//! production stand-in, plus a scriptable mock for tests.
//!
//! Rendering correctness is out of scope; no chart-drawing crate is grounded
//! anywhere in the retrieval pack this service is patterned on, so the
//! placeholder implementation below produces deterministic, minimal-but-valid
//! bytes per format rather than reaching for an ungrounded dependency.

use async_trait::async_trait;

use crate::error::{Result, ServiceError};
use crate::task::{ChartConfig, OutputFormat};

/// Output of a successful rasterization.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub buffer: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Renders a chart configuration into image bytes.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn render(&self, config: &ChartConfig) -> Result<RenderedImage>;
}

fn validate_option(config: &ChartConfig) -> Result<()> {
    let has_series = config
        .option
        .get("series")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    let has_dataset = config
        .option
        .get("dataset")
        .map(|v| !v.is_null())
        .unwrap_or(false);

    if !has_series && !has_dataset {
        return Err(ServiceError::Processing("invalid chart option".to_string()));
    }
    Ok(())
}

/// Production stand-in. Validates the contract's two named failure conditions
/// and emits a minimal, deterministic buffer per output format.
pub struct PlaceholderRasterizer;

#[async_trait]
impl Rasterizer for PlaceholderRasterizer {
    async fn render(&self, config: &ChartConfig) -> Result<RenderedImage> {
        validate_option(config)?;

        let format = config.output_type();
        let buffer = match format {
            OutputFormat::Svg => {
                let width = config.width.unwrap_or(600);
                let height = config.height.unwrap_or(400);
                format!(
                    "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\"></svg>"
                )
                .into_bytes()
            }
            OutputFormat::Png => PNG_1X1_TRANSPARENT.to_vec(),
            OutputFormat::Jpeg => JPEG_MINIMAL.to_vec(),
            OutputFormat::Pdf => {
                return Err(ServiceError::Processing("unsupported image type".to_string()));
            }
        };

        Ok(RenderedImage {
            buffer,
            content_type: format.content_type(),
            extension: format.extension(),
        })
    }
}

/// Smallest valid 1x1 transparent PNG.
const PNG_1X1_TRANSPARENT: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Minimal standalone JPEG byte sequence (SOI/APP0/EOI only).
const JPEG_MINIMAL: &[u8] = &[
    0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x01, 0x00, 0x00, 0xff, 0xd9,
];

/// Scriptable double for tests. Queues responses per call in FIFO order,
/// records every invocation, and can simulate latency.
pub struct MockRasterizer {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<RenderedImage>>>,
    calls: parking_lot::Mutex<Vec<ChartConfig>>,
    delay: Option<std::time::Duration>,
}

impl MockRasterizer {
    pub fn new() -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            calls: parking_lot::Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            calls: parking_lot::Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn push_response(&self, response: Result<RenderedImage>) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

fn clone_result(result: &Result<RenderedImage>) -> Result<RenderedImage> {
    match result {
        Ok(image) => Ok(image.clone()),
        Err(e) => Err(ServiceError::Processing(e.to_string())),
    }
}

#[async_trait]
impl Rasterizer for MockRasterizer {
    async fn render(&self, config: &ChartConfig) -> Result<RenderedImage> {
        self.calls.lock().push(config.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock();
        if let Some(response) = responses.pop_front() {
            return clone_result(&response);
        }
        drop(responses);

        // No scripted response: fall back to the default validation path so
        // unconfigured mocks still behave sensibly in simple tests.
        validate_option(config)?;
        Ok(RenderedImage {
            buffer: vec![0u8; 16],
            content_type: config.output_type().content_type(),
            extension: config.output_type().extension(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_series() -> ChartConfig {
        ChartConfig {
            option: json!({"series": [{"type": "bar", "data": [1, 2, 3]}]}),
            output_type: Some("png".to_string()),
            width: Some(600),
            height: Some(400),
            download: false,
            oss_path: None,
        }
    }

    #[tokio::test]
    async fn placeholder_rejects_option_without_series_or_dataset() {
        let rasterizer = PlaceholderRasterizer;
        let mut config = config_with_series();
        config.option = json!({});
        let err = rasterizer.render(&config).await.unwrap_err();
        assert!(err.to_string().contains("invalid chart option"));
    }

    #[tokio::test]
    async fn placeholder_rejects_pdf() {
        let rasterizer = PlaceholderRasterizer;
        let mut config = config_with_series();
        config.output_type = Some("pdf".to_string());
        let err = rasterizer.render(&config).await.unwrap_err();
        assert!(err.to_string().contains("unsupported image type"));
    }

    #[tokio::test]
    async fn placeholder_renders_png() {
        let rasterizer = PlaceholderRasterizer;
        let image = rasterizer.render(&config_with_series()).await.unwrap();
        assert_eq!(image.content_type, "image/png");
        assert!(!image.buffer.is_empty());
    }

    #[tokio::test]
    async fn mock_returns_queued_responses_in_order() {
        let mock = MockRasterizer::new();
        mock.push_response(Ok(RenderedImage {
            buffer: vec![1],
            content_type: "image/png",
            extension: "png",
        }));
        mock.push_response(Err(ServiceError::Processing("boom".to_string())));

        let first = mock.render(&config_with_series()).await.unwrap();
        assert_eq!(first.buffer, vec![1]);

        let second = mock.render(&config_with_series()).await;
        assert!(second.is_err());

        assert_eq!(mock.call_count(), 2);
    }
}
