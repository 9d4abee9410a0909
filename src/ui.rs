//! Display side of the pipeline: column history, viewport, panes and the
//! renderer contract.

pub mod column_buffer;
pub mod pane;
pub mod render;
pub mod viewport;
