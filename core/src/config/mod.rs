mod load;
mod types;

pub use load::{get_xtal_data_dir, load_default, load_from_path};
pub use types::{AppConfig, ExternalConfig, LoggingConfig, ManagerConfig};
