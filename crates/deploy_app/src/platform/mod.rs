pub(crate) mod config;
pub(crate) mod driver;
pub(crate) mod effects;
pub(crate) mod logging;
pub(crate) mod plan;
pub(crate) mod render;
