use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::operations::{invalid_input, Operation, OperationContext, Output};
use crate::sandbox::ValidatedParams;

use super::{blocking, move_into_place};

/// Resizes an image to exact dimensions, keeping the output's format as
/// given by its extension.
pub struct ResizeImageOperation;

/// Largest accepted side, in pixels.
const MAX_SIDE: u32 = 10_000;
/// Largest accepted output area. An RGBA buffer this size is 160 MB.
const MAX_PIXELS: u64 = 40_000_000;

fn dimension(params: &ValidatedParams, name: &str) -> anyhow::Result<u32> {
    let raw = params.value(name).unwrap_or("300");
    match raw.parse::<u32>() {
        Ok(n) if n > 0 && n <= MAX_SIDE => Ok(n),
        Ok(n) if n > MAX_SIDE => Err(invalid_input(format!(
            "Image {name} {n} exceeds the limit of {MAX_SIDE} pixels"
        ))),
        _ => Err(invalid_input(format!("Image {name} must be a positive integer, got '{raw}'"))),
    }
}

fn dimensions(params: &ValidatedParams) -> anyhow::Result<(u32, u32)> {
    let width = dimension(params, "width")?;
    let height = dimension(params, "height")?;
    if u64::from(width) * u64::from(height) > MAX_PIXELS {
        return Err(invalid_input(format!(
            "Image size {width}x{height} exceeds the limit of {MAX_PIXELS} pixels"
        )));
    }
    Ok((width, height))
}

fn resize(input: &Path, staged: &Path, width: u32, height: u32) -> anyhow::Result<()> {
    let img = image::open(input).with_context(|| format!("Cannot decode {}", input.display()))?;
    let resized = img.resize_exact(width, height, FilterType::Lanczos3);

    // JPEG has no alpha channel
    let is_jpeg = matches!(
        staged.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("jpg" | "jpeg")
    );
    let resized = if is_jpeg {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    } else {
        resized
    };

    resized
        .save(staged)
        .with_context(|| format!("Cannot encode {}", staged.display()))
}

#[async_trait]
impl Operation for ResizeImageOperation {
    fn description(&self) -> &str {
        "Resize an image to the requested width and height"
    }

    async fn execute(
        &self,
        params: &ValidatedParams,
        context: &OperationContext,
    ) -> anyhow::Result<Output> {
        let input = params.path("input")?.to_path_buf();
        let output = params.path("output")?;
        let (width, height) = dimensions(params)?;

        let extension = output
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png");
        let staged = context
            .scratch
            .join(format!("{}.{extension}", uuid::Uuid::new_v4()));

        let target = staged.clone();
        blocking(move || resize(&input, &target, width, height)).await?;
        move_into_place(&staged, output).await?;

        Ok(Output::from(format!(
            "Resized image to {width}x{height} and saved to {}",
            output.display()
        )))
    }
}
