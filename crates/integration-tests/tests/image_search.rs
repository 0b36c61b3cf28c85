mod support;

use std::sync::atomic::Ordering;

use assistant_runtime::{ImageUpload, PipelineError, PipelineStage};
use shared::llm::AgentCapability;
use shared::models::ImageSearchHints;

use support::{StubChatModel, default_reply, harness, png_bytes};

fn png_upload(width: u32, height: u32) -> ImageUpload {
    ImageUpload {
        bytes: png_bytes(width, height),
        mime: "image/png".to_string(),
    }
}

#[tokio::test]
async fn photo_search_captions_embeds_and_filters_by_hints() {
    let harness = harness(StubChatModel::new());
    let hints = ImageSearchHints {
        city: Some("Austin".to_string()),
        ..ImageSearchHints::default()
    };

    let reply = harness
        .runtime
        .handle_image(png_upload(64, 48), Some(2), hints)
        .await
        .expect("image search should succeed");

    assert_eq!(reply.caption.exterior_material, "brick");
    assert_eq!(reply.listings.len(), 2);
    let ids = reply
        .listings
        .iter()
        .map(|listing| listing.id.as_str())
        .collect::<Vec<_>>();
    assert!(ids.contains(&"atx-1") && ids.contains(&"atx-3"), "{ids:?}");
    assert_eq!(reply.media.len(), 2);

    let inputs = harness.embeddings.inputs.lock().expect("inputs").clone();
    assert_eq!(inputs.len(), 1);
    assert!(inputs[0].contains("brick"));
    assert!(inputs[0].contains("city: Austin"));

    let caption_requests = harness.model.requests_for(AgentCapability::ImageCaption);
    let image_url = caption_requests[0].messages[0]
        .image_data_url
        .as_deref()
        .expect("caption request carries the photo");
    assert!(image_url.starts_with("data:image/png;base64,"));
    assert_eq!(harness.model.calls(AgentCapability::Router), 0);
}

#[tokio::test]
async fn oversized_photos_are_downscaled_to_jpeg() {
    let harness = harness(StubChatModel::new());

    harness
        .runtime
        .handle_image(png_upload(2_400, 300), None, ImageSearchHints::default())
        .await
        .expect("image search should succeed");

    let caption_requests = harness.model.requests_for(AgentCapability::ImageCaption);
    let image_url = caption_requests[0].messages[0]
        .image_data_url
        .as_deref()
        .expect("caption request carries the photo");
    assert!(image_url.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn unsupported_or_corrupt_uploads_are_invalid_images() {
    let harness = harness(StubChatModel::new());

    let gif = harness
        .runtime
        .handle_image(
            ImageUpload {
                bytes: b"GIF89a".to_vec(),
                mime: "image/gif".to_string(),
            },
            None,
            ImageSearchHints::default(),
        )
        .await
        .expect_err("gif is not accepted");
    assert!(matches!(gif, PipelineError::InvalidImage(_)));

    let corrupt = harness
        .runtime
        .handle_image(
            ImageUpload {
                bytes: vec![0x89, b'P', b'N', b'G', 0, 1, 2],
                mime: "image/png".to_string(),
            },
            None,
            ImageSearchHints::default(),
        )
        .await
        .expect_err("truncated png cannot decode");
    assert!(matches!(corrupt, PipelineError::InvalidImage(_)));

    assert_eq!(harness.model.total_calls(), 0);
    assert_eq!(harness.embeddings.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn caption_that_is_not_json_fails_before_embedding() {
    let model = StubChatModel::with_responder(|request, _| match request.capability {
        AgentCapability::ImageCaption => Ok("A lovely brick home.".to_string()),
        _ => default_reply(request),
    });
    let harness = harness(model);

    let err = harness
        .runtime
        .handle_image(png_upload(32, 32), None, ImageSearchHints::default())
        .await
        .expect_err("prose caption must be rejected");
    assert!(matches!(
        err,
        PipelineError::MalformedAgentOutput {
            stage: PipelineStage::ImageCaption,
            ..
        }
    ));
    assert_eq!(harness.embeddings.calls.load(Ordering::SeqCst), 0);
}
