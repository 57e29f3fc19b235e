pub mod codestream_part_params;
pub mod image_data_context;
pub mod progressiveness;
pub mod quality_layers;
pub mod structure;
