//! Show the transform the export engine would apply to a source.

use anyhow::Context;
use kurbo::Size;
use vexport_export_engine::RenderGeometry;
use vexport_media_core::TrackInfo;
use vexport_synthetic_engine::Rotation;

pub fn run(
    source_width: u32,
    source_height: u32,
    rotate: i32,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let rotation = Rotation::from_degrees(rotate)
        .with_context(|| format!("Unsupported rotation: {rotate}. Use: 0, 90, 180, 270"))?;

    let natural = Size::new(source_width as f64, source_height as f64);
    let mut track = TrackInfo::video(1, natural);
    track.preferred_transform = rotation.preferred_transform(natural);

    let geometry = RenderGeometry::compute(&track, Size::new(width as f64, height as f64))?;
    let plan = serde_json::json!({
        "source": { "width": source_width, "height": source_height, "rotation": rotation },
        "preferred_transform": track.preferred_transform.as_coeffs(),
        "geometry": geometry,
        "output_transform": geometry.output_transform().as_coeffs(),
        "content_rect": geometry.content_rect(natural),
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
