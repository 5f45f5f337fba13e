use anyhow::Context;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};

use imagegen_core::config::Config;
use imagegen_core::conversation::ConversationState;
use imagegen_core::proxy::mappers::{
    classify_record, extract_completed_image, CompletedImage, ImageGenerationRequest,
    ImageGenerationTool, StreamEvent,
};

use super::server_url;
use crate::cli::GenerateArgs;

pub async fn run(config: &Config, args: GenerateArgs) -> anyhow::Result<()> {
    let base = args.server.clone().unwrap_or_else(|| server_url(config));
    let format = args.format.clone().unwrap_or_else(|| "png".to_string());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("image.{}", format)));
    let stream = args.partial_images > 0;

    let tool = ImageGenerationTool {
        size: args.size.clone(),
        quality: args.quality.clone(),
        background: args.background.clone(),
        output_format: args.format.clone(),
        output_compression: args.compression,
        partial_images: stream.then_some(args.partial_images),
        ..Default::default()
    };
    let mut request = ImageGenerationRequest::new(&args.model, &args.prompt, tool);
    if stream {
        request = request.streaming();
    }

    let mut conversation = args
        .previous_response_id
        .clone()
        .map(ConversationState::resume)
        .unwrap_or_default();

    let mut body = serde_json::to_value(&request)?;
    conversation.apply(&mut body);

    let url = format!("{}/api/generate", base.trim_end_matches('/'));
    tracing::debug!("POST {} (stream: {})", url, stream);

    let mut http = reqwest::Client::new().post(&url).json(&body);
    if let Some(key) = &args.api_key {
        http = http.bearer_auth(key);
    }
    let response = http
        .send()
        .await
        .with_context(|| format!("Could not reach proxy at {}", base))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Proxy returned {}: {}", status, describe_error(&text));
    }

    let completed = if stream {
        let partial_dir = args.save_partials.then_some(output.as_path());
        read_stream(response, partial_dir, &format).await?
    } else {
        let json: Value = response.json().await?;
        extract_completed_image(&json).context("Response contained no image")?
    };

    write_image(&output, &completed.image_b64)?;
    println!("Saved {}", output.display());
    if let Some(prompt) = &completed.revised_prompt {
        println!("Revised prompt: {}", prompt);
    }

    conversation.record(&completed);
    if let Some(id) = conversation.previous_response_id() {
        println!("Response id: {}", id);
        println!("Edit this image with: --previous-response-id {}", id);
    }

    Ok(())
}

async fn read_stream(
    response: reqwest::Response,
    save_partials_next_to: Option<&Path>,
    format: &str,
) -> anyhow::Result<CompletedImage> {
    let mut events = response.bytes_stream().eventsource();

    while let Some(event) = events.next().await {
        let event = event.context("Event stream broke")?;
        let Ok(value) = serde_json::from_str::<Value>(&event.data) else {
            continue;
        };

        if value.get("error").is_some() {
            anyhow::bail!("Generation failed: {}", describe_error(&event.data));
        }

        match classify_record(&value) {
            StreamEvent::PartialImage(partial) => {
                println!("Partial image {} received", partial.index);
                if let Some(output) = save_partials_next_to {
                    let path = partial_path(output, partial.index, format);
                    write_image(&path, &partial.image_b64)?;
                }
            }
            StreamEvent::Completed(Some(image)) => return Ok(image),
            StreamEvent::Completed(None) => anyhow::bail!("Generation finished without an image"),
            StreamEvent::Other => {}
        }
    }

    anyhow::bail!("Stream ended without an image")
}

fn write_image(path: &Path, image_b64: &str) -> anyhow::Result<()> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(image_b64)
        .context("Image payload is not valid base64")?;
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn partial_path(output: &Path, index: u32, format: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    output.with_file_name(format!("{}-partial-{}.{}", stem, index, format))
}

/// Pull `error.message` out of an error body, or fall back to the raw text
fn describe_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            let message = error.get("message")?.as_str()?.to_string();
            Some(match error.get("code").and_then(|c| c.as_str()) {
                Some(code) => format!("{} ({})", message, code),
                None => message,
            })
        })
        .unwrap_or_else(|| body.to_string())
}
