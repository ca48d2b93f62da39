//! Request ID generation for log correlation.

use uuid::Uuid;

/// Generate a new request ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
