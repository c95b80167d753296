//! Flowsim Data -- plant layouts, item catalogues and configuration from
//! RON, TOML or JSON files.

pub mod assembly;
pub mod loader;
pub mod schema;

pub use assembly::{LayoutError, build_factory};
pub use loader::{DataLoadError, Format, load_catalogue, load_config, load_layout, load_scenario};
