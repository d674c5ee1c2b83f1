//! Hand-off of the final best design for qualitative inspection.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::reinforce::PolicyError;

/// Receives the single highest-scoring design of the final iteration.
pub trait Renderer {
    fn render(&mut self, design: &[f32], input_shape: &[usize], score: f32) -> Result<(), PolicyError>;
}

/// Discards every design.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _design: &[f32], _input_shape: &[usize], _score: f32) -> Result<(), PolicyError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RenderedDesign<'a> {
    score: f32,
    input_shape: &'a [usize],
    design: &'a [f32],
}

/// Writes the design as pretty-printed JSON to a fixed path.
#[derive(Debug)]
pub struct JsonRenderer {
    path: PathBuf,
}

impl JsonRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Renderer for JsonRenderer {
    fn render(&mut self, design: &[f32], input_shape: &[usize], score: f32) -> Result<(), PolicyError> {
        let json = serde_json::to_string_pretty(&RenderedDesign {
            score,
            input_shape,
            design,
        })
        .map_err(|e| PolicyError::Render(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| PolicyError::Render(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), score, "Rendered best design");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_renderer_writes_design() {
        let tmp = tempfile::tempdir().unwrap();
        let mut renderer = JsonRenderer::new(tmp.path().join("best.json"));
        renderer.render(&[1.0, 0.0, 0.0, 1.0], &[2, 2], 3.5).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(renderer.path()).unwrap()).unwrap();
        assert_eq!(value["score"], 3.5);
        assert_eq!(value["input_shape"], serde_json::json!([2, 2]));
        assert_eq!(value["design"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_json_renderer_reports_bad_path() {
        let tmp = tempfile::tempdir().unwrap();
        let mut renderer = JsonRenderer::new(tmp.path().join("missing").join("best.json"));
        let err = renderer.render(&[0.0], &[1], 0.0).unwrap_err();
        assert!(matches!(err, PolicyError::Render(_)));
    }
}
