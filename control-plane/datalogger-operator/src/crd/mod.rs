pub mod data_logger;

pub use data_logger::{DataLogger, DataLoggerSpec, DataLoggerStatus, SpecError};

/// API group shared by the CRD and every annotation, label and finalizer
/// the operator writes.
pub const API_GROUP: &str = "app.datalogger.io";
