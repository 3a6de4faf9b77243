#![forbid(unsafe_code)]

pub mod categories;
pub mod cli;
pub mod collect;
pub mod dates;
pub mod logging;
pub mod model;
pub mod presets;
pub mod refresh;
pub mod registry;
pub mod store;
