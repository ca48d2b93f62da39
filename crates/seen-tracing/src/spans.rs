//! Span builder helpers for seen-sync instrumentation.

/// Create the span wrapping a single seen-list request.
///
/// Usage: `let span = seen_request_span!(request_id, method, path);`
///
/// Recorded later by the handler:
/// - `user`: the normalized user key, once the path guard has passed
/// - `status`: the HTTP status of the final response
#[macro_export]
macro_rules! seen_request_span {
    ($request_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "seen_request",
            request_id = %$request_id,
            method = %$method,
            path = %$path,
            user = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}

/// Create the span wrapping one call into the seen-list store.
#[macro_export]
macro_rules! store_op_span {
    ($op:expr, $key:expr) => {
        tracing::debug_span!(
            "store_op",
            op = $op,
            key = %$key,
        )
    };
}
