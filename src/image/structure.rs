#[cfg(test)] use mockall::automock;

/// Codestream geometry as far as request sizing needs it. Parsing the geometry from the main
///  header is done elsewhere.
#[cfg_attr(test, automock)]
pub trait CodestreamStructure: Send + Sync {
    /// `None` is the full resolution
    fn level_width(&self, level: Option<u32>) -> u64;
    fn level_height(&self, level: Option<u32>) -> u64;

    /// the number of quality layers in the default tile
    fn num_quality_layers(&self) -> u32;
}
