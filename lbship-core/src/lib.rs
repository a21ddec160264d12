pub mod config;
pub mod error;
pub mod parser;
pub mod record;

pub use config::ShipperConfig;
pub use error::{ConfigError, RecordError};
pub use parser::parse_line;
pub use record::AccessRecord;
