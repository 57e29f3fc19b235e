use tracing::{debug, trace};
use crate::error::{JpipError, JpipResult};
use crate::image::codestream_part_params::CodestreamPartParams;
use crate::image::progressiveness::Progressiveness;
use crate::image::quality_layers::QualityLayers;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StageReached {
    pub stage_index: usize,
    pub stages_finished: usize,
    pub quality_layers_reached: QualityLayers,
}

/// What is available for reconstruction once at least one stage was reached
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FetchedDataParams {
    pub params: CodestreamPartParams,
    pub min_num_quality_layers: QualityLayers,
}

pub type DataListener = Box<dyn FnMut(&StageReached) + Send>;

/// Tracks the progressiveness stages of a single region request. The databin layer reports the
///  number of quality layers that are fully available for the region, and the context turns that
///  into 'stage reached' events.
pub struct ImageDataContext {
    params: CodestreamPartParams,
    progressiveness: Progressiveness,
    quality_layers_reached: QualityLayers,
    stages_finished: usize,
    is_progressive: bool,
    listeners: Vec<DataListener>,
}

impl ImageDataContext {
    pub fn new(params: CodestreamPartParams, progressiveness: Progressiveness) -> ImageDataContext {
        ImageDataContext {
            params,
            progressiveness,
            quality_layers_reached: QualityLayers::Bounded(0),
            stages_finished: 0,
            is_progressive: false,
            listeners: Vec::new(),
        }
    }

    pub fn params(&self) -> &CodestreamPartParams {
        &self.params
    }

    pub fn progressiveness(&self) -> &Progressiveness {
        &self.progressiveness
    }

    pub fn on(&mut self, listener: DataListener) {
        self.listeners.push(listener);
    }

    pub fn has_data(&self) -> bool {
        self.stages_finished > 0
    }

    pub fn is_done(&self) -> bool {
        self.stages_finished == self.progressiveness.len()
    }

    pub fn stages_finished(&self) -> usize {
        self.stages_finished
    }

    pub fn quality_layers_reached(&self) -> QualityLayers {
        self.quality_layers_reached
    }

    pub fn on_quality_layers_reached(&mut self, quality_layers: QualityLayers) -> JpipResult<()> {
        if self.is_done() {
            return Err(JpipError::internal("quality layers reported for an image data context that is already done"));
        }

        self.quality_layers_reached = self.quality_layers_reached.max(quality_layers);
        trace!("quality layers reached: {}", self.quality_layers_reached);

        while let Some(stage) = self.progressiveness.stage(self.stages_finished) {
            if !stage.min_num_quality_layers.is_met_by(self.quality_layers_reached) {
                break;
            }

            let stage_index = self.stages_finished;
            self.stages_finished += 1;
            debug!("progressiveness stage {} of {} reached", self.stages_finished, self.progressiveness.len());
            self.notify(stage_index);
        }
        Ok(())
    }

    /// Turning progressiveness on after data arrived notifies the listeners once more, for the
    ///  last stage reached
    pub fn set_is_progressive(&mut self, is_progressive: bool) {
        let was_progressive = self.is_progressive;
        self.is_progressive = is_progressive;

        if !was_progressive && is_progressive && self.has_data() {
            self.notify(self.stages_finished - 1);
        }
    }

    /// The region params and the number of quality layers that is guaranteed to be available,
    ///  optionally capped
    pub fn fetched_data_params(&self, max_num_quality_layers: Option<QualityLayers>) -> JpipResult<FetchedDataParams> {
        let last_finished = self.stages_finished.checked_sub(1)
            .and_then(|i| self.progressiveness.stage(i))
            .ok_or_else(|| JpipError::internal("no data before the first progressiveness stage was reached"))?;

        let mut result = FetchedDataParams {
            params: self.params,
            min_num_quality_layers: last_finished.min_num_quality_layers,
        };
        if let Some(max) = max_num_quality_layers {
            result.params = self.params.with_max_num_quality_layers(max);
            result.min_num_quality_layers = result.min_num_quality_layers.min(max);
        }
        Ok(result)
    }

    fn notify(&mut self, stage_index: usize) {
        let event = StageReached {
            stage_index,
            stages_finished: self.stages_finished,
            quality_layers_reached: self.quality_layers_reached,
        };
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use rstest::rstest;
    use crate::image::progressiveness::{ForceMaxQuality, ProgressivenessStage};
    use crate::image::quality_layers::QualityLayers::*;

    fn params() -> CodestreamPartParams {
        CodestreamPartParams::new(0, 0, 64, 64, Some(0))
    }

    fn progressiveness(layers: &[QualityLayers]) -> Progressiveness {
        Progressiveness::custom(layers.iter()
            .map(|&l| ProgressivenessStage::new(l, ForceMaxQuality::No))
            .collect()
        ).unwrap()
    }

    fn recording_context(layers: &[QualityLayers]) -> (ImageDataContext, Arc<Mutex<Vec<StageReached>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut context = ImageDataContext::new(params(), progressiveness(layers));
        let recorded = events.clone();
        context.on(Box::new(move |e: &StageReached| recorded.lock().unwrap().push(*e)));
        (context, events)
    }

    #[rstest]
    #[case::one_by_one(vec![Bounded(1), Bounded(2), Bounded(3)], vec![Bounded(1), Bounded(2), Bounded(3)], vec![1, 2, 3])]
    #[case::jump(vec![Bounded(1), Bounded(2), Bounded(5)], vec![Bounded(4), Bounded(5)], vec![2, 3])]
    #[case::repeated(vec![Bounded(1), Bounded(3)], vec![Bounded(1), Bounded(1), Bounded(2), Bounded(2), Bounded(3)], vec![1, 1, 1, 1, 2])]
    #[case::below_first(vec![Bounded(2), Bounded(3)], vec![Bounded(1), Bounded(2), Bounded(3)], vec![0, 1, 2])]
    #[case::unbounded_finishes_all(vec![Bounded(1), Bounded(5), Unbounded], vec![Unbounded], vec![3])]
    #[case::max_stage_waits(vec![Bounded(1), Unbounded], vec![Bounded(1), Bounded(100), Unbounded], vec![1, 1, 2])]
    fn test_stages_are_monotonic(#[case] stages: Vec<QualityLayers>, #[case] reached: Vec<QualityLayers>, #[case] expected_finished: Vec<usize>) {
        let (mut context, events) = recording_context(&stages);

        let mut previous = 0;
        for (quality_layers, expected) in reached.into_iter().zip(expected_finished) {
            context.on_quality_layers_reached(quality_layers).unwrap();
            assert_eq!(context.stages_finished(), expected);
            assert!(context.stages_finished() >= previous);
            previous = context.stages_finished();
        }

        let events = events.lock().unwrap();
        let stage_indices = events.iter().map(|e| e.stage_index).collect::<Vec<_>>();
        assert_eq!(stage_indices, (0..previous).collect::<Vec<_>>());
        assert_eq!(context.has_data(), previous > 0);
        assert_eq!(context.is_done(), previous == stages.len());
    }

    #[test]
    fn test_quality_layers_reached_never_decreases() {
        let (mut context, events) = recording_context(&[Bounded(2), Bounded(4)]);

        context.on_quality_layers_reached(Bounded(3)).unwrap();
        context.on_quality_layers_reached(Bounded(1)).unwrap();
        assert_eq!(context.quality_layers_reached(), Bounded(3));
        assert_eq!(context.stages_finished(), 1);

        assert_eq!(events.lock().unwrap().as_slice(), &[
            StageReached { stage_index: 0, stages_finished: 1, quality_layers_reached: Bounded(3) },
        ]);
    }

    #[test]
    fn test_update_after_done() {
        let (mut context, _) = recording_context(&[Bounded(1)]);
        context.on_quality_layers_reached(Bounded(1)).unwrap();
        assert!(context.is_done());

        assert!(matches!(context.on_quality_layers_reached(Bounded(2)), Err(JpipError::InternalError(_))));
    }

    #[rstest]
    #[case::no_cap(None, Bounded(3), Unbounded)]
    #[case::cap_above(Some(Bounded(5)), Bounded(3), Bounded(5))]
    #[case::cap_below(Some(Bounded(2)), Bounded(2), Bounded(2))]
    #[case::unbounded_cap(Some(Unbounded), Bounded(3), Unbounded)]
    fn test_fetched_data_params(#[case] max: Option<QualityLayers>, #[case] expected_min: QualityLayers, #[case] expected_params_max: QualityLayers) {
        let (mut context, _) = recording_context(&[Bounded(1), Bounded(3), Bounded(6)]);
        context.on_quality_layers_reached(Bounded(4)).unwrap();

        let fetched = context.fetched_data_params(max).unwrap();
        assert_eq!(fetched.min_num_quality_layers, expected_min);
        assert_eq!(fetched.params.max_num_quality_layers, expected_params_max);
        assert_eq!(fetched.params.max_x_exclusive, 64);
    }

    #[test]
    fn test_fetched_data_params_unbounded_stage() {
        let (mut context, _) = recording_context(&[Unbounded]);
        context.on_quality_layers_reached(Unbounded).unwrap();

        assert_eq!(context.fetched_data_params(None).unwrap().min_num_quality_layers, Unbounded);
        assert_eq!(context.fetched_data_params(Some(Bounded(2))).unwrap().min_num_quality_layers, Bounded(2));
    }

    #[test]
    fn test_fetched_data_params_before_first_stage() {
        let (context, _) = recording_context(&[Bounded(1)]);
        assert!(matches!(context.fetched_data_params(None), Err(JpipError::InternalError(_))));
    }

    #[test]
    fn test_set_is_progressive() {
        let (mut context, events) = recording_context(&[Bounded(1), Bounded(2)]);

        // no data yet: nothing to re-notify
        context.set_is_progressive(true);
        context.set_is_progressive(false);
        assert!(events.lock().unwrap().is_empty());

        context.on_quality_layers_reached(Bounded(1)).unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);

        context.set_is_progressive(true);
        assert_eq!(events.lock().unwrap().len(), 2);
        assert_eq!(events.lock().unwrap()[1].stage_index, 0);

        context.set_is_progressive(true);
        assert_eq!(events.lock().unwrap().len(), 2);
    }
}
