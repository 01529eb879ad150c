pub mod attendance;
pub mod backup;
pub mod employee;
pub mod insurance;
pub mod position_change;
pub mod salary_record;

/// Free-form JSON object stored in a TEXT column.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
