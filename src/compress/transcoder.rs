//! Image transcoding.
//!
//! # Responsibilities
//! - Decode any raster format the `image` crate understands
//! - Apply grayscale and re-encode as lossy WebP or progressive JPEG
//! - Keep animation frames for animated GIF/WebP → WebP when enabled
//! - Read the encoded result back to prove it is a complete image
//!
//! # Design Decisions
//! - The whole operation is one blocking call returning a `Result`; async
//!   callers go through [`Transcoder::transcode_blocking`] on the blocking pool
//! - Animation handling is fixed at construction, never read from the environment
//! - A result without readable output metadata is an error, never a partial body
//! - Decoding is bounded by [`TranscoderConfig::max_dimension`]; a transcode
//!   abandoned by the request deadline still runs to completion on the pool

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, Frame, ImageDecoder, ImageFormat, ImageReader, Limits};
use thiserror::Error;

use crate::compress::OutputFormat;

/// Transcoder failures. Every variant sends the client to the origin.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unsupported dimensions {width}x{height} for {format}")]
    Dimensions {
        width: u32,
        height: u32,
        format: &'static str,
    },

    #[error("encoder produced no readable image")]
    MissingMetadata,

    #[error("transcode task failed: {0}")]
    Task(String),
}

/// Construction-time options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscoderConfig {
    /// Preserve every frame of animated inputs when the output is WebP.
    pub animate: bool,
    /// Largest width or height accepted from a decoder.
    pub max_dimension: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            animate: true,
            max_dimension: 16383,
        }
    }
}

impl TranscoderConfig {
    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits
    }
}

/// Per-request transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub format: OutputFormat,
    pub grayscale: bool,
    pub quality: u32,
}

/// Facts read back from the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMetadata {
    pub format: OutputFormat,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub frames: usize,
}

#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub buffer: Bytes,
    pub metadata: OutputMetadata,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transcoder {
    config: TranscoderConfig,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> TranscoderConfig {
        self.config
    }

    /// Run [`Transcoder::transcode`] on tokio's blocking pool.
    pub async fn transcode_blocking(
        &self,
        input: Bytes,
        request: TranscodeRequest,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let transcoder = *self;
        tokio::task::spawn_blocking(move || transcoder.transcode(&input, &request))
            .await
            .map_err(|e| TranscodeError::Task(e.to_string()))?
    }

    /// Decode `input`, apply the request and encode it.
    pub fn transcode(
        &self,
        input: &[u8],
        request: &TranscodeRequest,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let source_format = image::guess_format(input)?;
        let quality = request.quality.clamp(1, 100);

        let animation = if self.config.animate && request.format == OutputFormat::WebP {
            decode_animation(input, source_format, self.config.limits())?
        } else {
            None
        };

        let (encoded, frames) = match animation {
            Some(frames) if frames.len() > 1 => {
                let count = frames.len();
                (encode_animated_webp(frames, request.grayscale, quality)?, count)
            }
            _ => {
                let mut reader = ImageReader::with_format(Cursor::new(input), source_format);
                reader.limits(self.config.limits());
                let mut img = reader.decode()?;
                if request.grayscale {
                    img = img.grayscale();
                }
                let encoded = match request.format {
                    OutputFormat::WebP => encode_webp(&img, quality)?,
                    OutputFormat::Jpeg => encode_jpeg(&img, request.grayscale, quality)?,
                };
                (encoded, 1)
            }
        };

        let metadata = read_metadata(&encoded, request.format, frames)?;
        Ok(TranscodeOutput {
            buffer: Bytes::from(encoded),
            metadata,
        })
    }
}

/// All frames of an animated GIF or WebP; `None` for still formats.
fn decode_animation(
    input: &[u8],
    format: ImageFormat,
    limits: Limits,
) -> Result<Option<Vec<Frame>>, TranscodeError> {
    let frames = match format {
        ImageFormat::Gif => {
            let mut decoder = GifDecoder::new(Cursor::new(input))?;
            decoder.set_limits(limits)?;
            decoder.into_frames().collect_frames()?
        }
        ImageFormat::WebP => {
            let mut decoder = WebPDecoder::new(Cursor::new(input))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            decoder.set_limits(limits)?;
            decoder.into_frames().collect_frames()?
        }
        _ => return Ok(None),
    };
    Ok(Some(frames))
}

fn encode_animated_webp(
    frames: Vec<Frame>,
    grayscale: bool,
    quality: u32,
) -> Result<Vec<u8>, TranscodeError> {
    let (width, height) = frames
        .first()
        .map(|f| f.buffer().dimensions())
        .ok_or(TranscodeError::MissingMetadata)?;

    let mut timestamp: i32 = 0;
    let mut canvases = Vec::with_capacity(frames.len());
    for frame in frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_ms = if denom == 0 { 0 } else { numer / denom };
        let buffer = frame.into_buffer();
        if buffer.dimensions() != (width, height) {
            return Err(TranscodeError::Dimensions {
                width: buffer.width(),
                height: buffer.height(),
                format: "animated webp",
            });
        }
        let buffer = if grayscale {
            DynamicImage::ImageRgba8(buffer).grayscale().to_rgba8()
        } else {
            buffer
        };
        canvases.push((buffer, timestamp));
        timestamp = timestamp.saturating_add(i32::try_from(delay_ms).unwrap_or(i32::MAX));
    }

    let mut config = webp::WebPConfig::new()
        .map_err(|_| TranscodeError::Encode("webp config init failed".into()))?;
    config.lossless = 0;
    config.quality = quality as f32;

    let mut encoder = webp::AnimEncoder::new(width, height, &config);
    for (canvas, timestamp) in &canvases {
        encoder.add_frame(webp::AnimFrame::from_rgba(canvas.as_raw(), width, height, *timestamp));
    }
    let memory = encoder
        .try_encode()
        .map_err(|e| TranscodeError::Encode(format!("animated webp: {:?}", e)))?;
    Ok(memory.to_vec())
}

fn encode_webp(img: &DynamicImage, quality: u32) -> Result<Vec<u8>, TranscodeError> {
    let (width, height) = (img.width(), img.height());
    let result = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height)
            .encode_simple(false, quality as f32)
            .map(|memory| memory.to_vec())
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height)
            .encode_simple(false, quality as f32)
            .map(|memory| memory.to_vec())
    };
    result.map_err(|e| TranscodeError::Encode(format!("webp: {:?}", e)))
}

/// Progressive JPEG with optimized Huffman tables.
fn encode_jpeg(img: &DynamicImage, grayscale: bool, quality: u32) -> Result<Vec<u8>, TranscodeError> {
    let dimensions_error = || TranscodeError::Dimensions {
        width: img.width(),
        height: img.height(),
        format: "jpeg",
    };
    let width = u16::try_from(img.width()).map_err(|_| dimensions_error())?;
    let height = u16::try_from(img.height()).map_err(|_| dimensions_error())?;

    let mut buffer = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut buffer, quality as u8);
    encoder.set_progressive(true);
    encoder.set_optimized_huffman_tables(true);

    let result = if grayscale {
        let luma = img.to_luma8();
        encoder.encode(luma.as_raw(), width, height, jpeg_encoder::ColorType::Luma)
    } else {
        let rgb = img.to_rgb8();
        encoder.encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)
    };
    result.map_err(|e| TranscodeError::Encode(format!("jpeg: {}", e)))?;
    Ok(buffer)
}

fn read_metadata(
    encoded: &[u8],
    format: OutputFormat,
    frames: usize,
) -> Result<OutputMetadata, TranscodeError> {
    if encoded.is_empty() {
        return Err(TranscodeError::MissingMetadata);
    }
    let (width, height) = ImageReader::with_format(Cursor::new(encoded), format.image_format())
        .into_dimensions()
        .map_err(|_| TranscodeError::MissingMetadata)?;

    Ok(OutputMetadata {
        format,
        size: encoded.len() as u64,
        width,
        height,
        frames,
    })
}
