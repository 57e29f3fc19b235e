use crate::error::{JpipError, JpipResult};
use crate::image::quality_layers::QualityLayers;
use crate::image::structure::CodestreamStructure;

/// A region of the image at a given resolution level, with an optional cap on quality layers
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CodestreamPartParams {
    pub min_x: u64,
    pub min_y: u64,
    pub max_x_exclusive: u64,
    pub max_y_exclusive: u64,
    pub level: Option<u32>,
    pub max_num_quality_layers: QualityLayers,
}

impl CodestreamPartParams {
    pub fn new(min_x: u64, min_y: u64, max_x_exclusive: u64, max_y_exclusive: u64, level: Option<u32>) -> CodestreamPartParams {
        CodestreamPartParams {
            min_x,
            min_y,
            max_x_exclusive,
            max_y_exclusive,
            level,
            max_num_quality_layers: QualityLayers::Unbounded,
        }
    }

    pub fn with_max_num_quality_layers(&self, max_num_quality_layers: QualityLayers) -> CodestreamPartParams {
        CodestreamPartParams {
            max_num_quality_layers,
            ..*self
        }
    }

    pub fn width(&self) -> u64 {
        self.max_x_exclusive.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u64 {
        self.max_y_exclusive.saturating_sub(self.min_y)
    }

    /// The region must be non-empty and inside the level's bounds
    pub fn validate(&self, structure: &dyn CodestreamStructure) -> JpipResult<()> {
        let level_width = structure.level_width(self.level);
        let level_height = structure.level_height(self.level);

        if self.min_x >= self.max_x_exclusive || self.min_y >= self.max_y_exclusive {
            return Err(JpipError::invalid_argument("codestream_part_params", format!("empty region {:?}", self)));
        }
        if self.max_x_exclusive > level_width || self.max_y_exclusive > level_height {
            return Err(JpipError::invalid_argument("codestream_part_params",
                format!("region {:?} exceeds the level size {}x{}", self, level_width, level_height)));
        }
        if self.max_num_quality_layers == QualityLayers::Bounded(0) {
            return Err(JpipError::invalid_argument("max_num_quality_layers", "must be positive"));
        }
        Ok(())
    }
}
