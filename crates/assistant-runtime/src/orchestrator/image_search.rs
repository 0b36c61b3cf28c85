use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use shared::guardrails::OutputCandidate;
use shared::listing_store::{NumericRange, VectorFilters};
use shared::llm::{
    AgentCapability, ChatMessage, ChatRequest, ImageCaption, complete_with_telemetry,
    embed_with_telemetry, template_for_capability, validate_image_caption,
};
use shared::models::{ImageSearchHints, Listing};

use super::Pipeline;
use super::media::ListingMedia;
use crate::error::PipelineError;
use crate::observer::PipelineStage;

const ALLOWED_MIME_TYPES: &[(&str, ImageFormat)] = &[
    ("image/jpeg", ImageFormat::Jpeg),
    ("image/jpg", ImageFormat::Jpeg),
    ("image/png", ImageFormat::Png),
    ("image/webp", ImageFormat::WebP),
];
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
const JPEG_QUALITY: u8 = 90;
const BEDS_WIDENING: f64 = 1.0;
const PRICE_WIDENING_RATIO: f64 = 0.15;
const CAPTION_INSTRUCTION: &str = "Describe this property photo.";

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSearchReply {
    pub caption: ImageCaption,
    #[serde(skip_serializing)]
    pub vector: Vec<f32>,
    pub listings: Vec<Listing>,
    pub media: Vec<ListingMedia>,
}

/// Image bytes ready for a vision model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedImage {
    pub(crate) mime: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) downscaled: bool,
}

impl PreparedImage {
    pub(crate) fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Checks the mime allow-list, decodes, and re-encodes as JPEG when either side exceeds
/// `max_dimension`. Images within bounds are passed through untouched.
pub(crate) fn prepare_image(
    upload: &ImageUpload,
    max_dimension: u32,
) -> Result<PreparedImage, PipelineError> {
    let mime = upload.mime.trim().to_ascii_lowercase();
    let Some((_, format)) = ALLOWED_MIME_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == mime)
    else {
        return Err(PipelineError::InvalidImage(format!(
            "unsupported mime type {mime}"
        )));
    };
    if upload.bytes.is_empty() {
        return Err(PipelineError::InvalidImage("image is empty".to_string()));
    }
    if upload.bytes.len() > MAX_IMAGE_BYTES {
        return Err(PipelineError::InvalidImage(format!(
            "image is {} bytes, maximum is {MAX_IMAGE_BYTES}",
            upload.bytes.len()
        )));
    }

    let decoded = image::load_from_memory_with_format(&upload.bytes, *format)
        .map_err(|err| PipelineError::InvalidImage(err.to_string()))?;
    if decoded.width() <= max_dimension && decoded.height() <= max_dimension {
        return Ok(PreparedImage {
            mime: if *format == ImageFormat::Jpeg {
                "image/jpeg".to_string()
            } else {
                mime
            },
            bytes: upload.bytes.clone(),
            downscaled: false,
        });
    }

    let resized = flatten_alpha(&decoded)
        .resize(max_dimension, max_dimension, FilterType::Triangle)
        .to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .map_err(|err| PipelineError::InvalidImage(err.to_string()))?;

    Ok(PreparedImage {
        mime: "image/jpeg".to_string(),
        bytes,
        downscaled: true,
    })
}

/// Composites transparent pixels over white so JPEG output has no black halos.
fn flatten_alpha(image: &DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8 };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    DynamicImage::ImageRgba8(flattened)
}

pub(crate) fn embedding_input(caption: &ImageCaption, hints: &ImageSearchHints) -> String {
    let mut text = caption.embedding_text();
    if let Some(city) = non_blank(hints.city.as_deref()) {
        text.push_str(&format!("; city: {city}"));
    }
    if let Some(property_type) = non_blank(hints.property_type.as_deref()) {
        text.push_str(&format!("; type: {property_type}"));
    }
    if let Some(beds) = hints.beds.filter(|beds| beds.is_finite() && *beds > 0.0) {
        text.push_str(&format!("; beds: {beds}"));
    }
    if let Some(price) = hints.price.filter(|price| price.is_finite() && *price > 0.0) {
        text.push_str(&format!("; price: {price:.0}"));
    }
    text
}

/// Exact city and type filters, beds widened by one either way and price by 15%.
pub(crate) fn vector_filters(hints: &ImageSearchHints) -> VectorFilters {
    VectorFilters {
        city: non_blank(hints.city.as_deref()).map(str::to_string),
        property_type: non_blank(hints.property_type.as_deref()).map(str::to_string),
        beds: hints
            .beds
            .filter(|beds| beds.is_finite() && *beds > 0.0)
            .map(|beds| NumericRange::around(beds, BEDS_WIDENING, BEDS_WIDENING)),
        price: hints
            .price
            .filter(|price| price.is_finite() && *price > 0.0)
            .map(|price| {
                let delta = price * PRICE_WIDENING_RATIO;
                NumericRange::around(price, delta, delta)
            }),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub(super) async fn caption_image(
    pipeline: &Pipeline,
    requester_id: &str,
    image: &PreparedImage,
) -> Result<ImageCaption, PipelineError> {
    let request = ChatRequest::from_template(template_for_capability(AgentCapability::ImageCaption))
        .with_requester_id(requester_id)
        .with_message(ChatMessage::user(CAPTION_INSTRUCTION).with_image(image.data_url()));
    let (result, _) = complete_with_telemetry(
        pipeline.chat_model.as_ref(),
        request,
        pipeline.config.model_timeout(),
        requester_id,
    )
    .await;
    let completion =
        result.map_err(|err| PipelineError::upstream(PipelineStage::ImageCaption, err))?;

    let checked = pipeline
        .guardrails
        .check_output(OutputCandidate {
            text: &completion.text,
            expects_json: true,
            expected_listing_ids: None,
        })
        .map_err(|err| PipelineError::from_output_guardrail(PipelineStage::ImageCaption, err))?;
    validate_image_caption(&checked)
        .map_err(|err| PipelineError::malformed(PipelineStage::ImageCaption, err))
}

pub(super) async fn embed_caption(
    pipeline: &Pipeline,
    requester_id: &str,
    text: &str,
) -> Result<Vec<f32>, PipelineError> {
    let vector = embed_with_telemetry(
        pipeline.embedding_model.as_ref(),
        text,
        pipeline.config.embedding_timeout(),
        requester_id,
    )
    .await
    .map_err(|err| PipelineError::upstream(PipelineStage::Embedding, err))?;
    if vector.is_empty() {
        return Err(PipelineError::MalformedAgentOutput {
            stage: PipelineStage::Embedding,
            reason: "embedding is empty".to_string(),
        });
    }
    Ok(vector)
}

pub(super) async fn nearest_listings(
    pipeline: &Pipeline,
    vector: &[f32],
    k: usize,
    filters: &VectorFilters,
) -> Result<Vec<Listing>, PipelineError> {
    let query = pipeline.listing_store.nearest_by_vector(vector, k, filters);
    match tokio::time::timeout(pipeline.config.store_timeout(), query).await {
        Ok(result) => result.map_err(|err| PipelineError::store(PipelineStage::VectorSearch, err)),
        Err(_) => Err(PipelineError::UpstreamTimeout {
            stage: PipelineStage::VectorSearch,
        }),
    }
}
