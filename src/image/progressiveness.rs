use std::str::FromStr;
use crate::error::{JpipError, JpipResult};
use crate::image::quality_layers::QualityLayers;
use crate::image::structure::CodestreamStructure;

/// Whether a stage is decoded with all quality layers that happen to be available, or with
///  exactly the stage's number of layers
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ForceMaxQuality {
    #[default]
    No,
    Force,
}

impl FromStr for ForceMaxQuality {
    type Err = JpipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(ForceMaxQuality::No),
            "force" => Ok(ForceMaxQuality::Force),
            "forceAll" => Err(JpipError::UnsupportedFeature("'forceAll' value for force_max_quality".to_string())),
            other => Err(JpipError::invalid_argument("force_max_quality", format!("'{}' should be 'no', 'force' or 'forceAll'", other))),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ProgressivenessStage {
    pub min_num_quality_layers: QualityLayers,
    pub force_max_quality: ForceMaxQuality,
}
impl ProgressivenessStage {
    pub fn new(min_num_quality_layers: QualityLayers, force_max_quality: ForceMaxQuality) -> ProgressivenessStage {
        ProgressivenessStage { min_num_quality_layers, force_max_quality }
    }

    /// `force_max_quality` defaults to 'no'
    pub fn parse(min_num_quality_layers: &str, force_max_quality: Option<&str>) -> JpipResult<ProgressivenessStage> {
        Ok(ProgressivenessStage {
            min_num_quality_layers: min_num_quality_layers.parse()?,
            force_max_quality: match force_max_quality {
                Some(s) => s.parse()?,
                None => ForceMaxQuality::No,
            },
        })
    }
}

/// An ordered, non-empty list of stages
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Progressiveness {
    stages: Vec<ProgressivenessStage>,
}

impl Progressiveness {
    pub fn custom(stages: Vec<ProgressivenessStage>) -> JpipResult<Progressiveness> {
        if stages.is_empty() {
            return Err(JpipError::invalid_argument("progressiveness", "custom progressiveness should be non-empty"));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stage.min_num_quality_layers == QualityLayers::Bounded(0) {
                return Err(JpipError::invalid_argument(format!("progressiveness[{}].min_num_quality_layers", i), "must be positive or 'max'"));
            }
        }
        Ok(Progressiveness { stages })
    }

    /// Stages for 1, 2, 3, half and all of `total` quality layers. The first stage forces max
    ///  quality for a quick first rendering.
    pub fn automatic(total: u32) -> Progressiveness {
        let total = total.max(1);

        let mut layers = vec![1, 2, 3, total.div_ceil(2), total];
        layers.retain(|&n| n <= total);
        layers.sort_unstable();
        layers.dedup();

        let mut stages = layers.into_iter()
            .map(|n| ProgressivenessStage::new(QualityLayers::Bounded(n), ForceMaxQuality::No))
            .collect::<Vec<_>>();
        stages[0].force_max_quality = ForceMaxQuality::Force;

        Progressiveness { stages }
    }

    /// Automatic stages up to the image's number of quality layers, capped by `max_quality`.
    ///  Without a cap the last stage waits for all layers the server has.
    pub fn automatic_for_structure(structure: &dyn CodestreamStructure, max_quality: QualityLayers) -> JpipResult<Progressiveness> {
        let image_layers = structure.num_quality_layers();

        match max_quality {
            QualityLayers::Bounded(0) => {
                Err(JpipError::invalid_argument("max_quality", "must be positive or 'max'"))
            }
            QualityLayers::Bounded(max) => {
                Ok(Self::automatic(image_layers.min(max)))
            }
            QualityLayers::Unbounded => {
                let mut result = Self::automatic(image_layers);
                if let Some(last) = result.stages.last_mut() {
                    last.min_num_quality_layers = QualityLayers::Unbounded;
                }
                Ok(result)
            }
        }
    }

    pub fn stages(&self) -> &[ProgressivenessStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, index: usize) -> Option<&ProgressivenessStage> {
        self.stages.get(index)
    }
}
