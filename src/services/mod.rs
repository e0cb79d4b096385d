/// Answer collection, scoring and question reveal.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Game start, pause, resume and end.
pub mod lifecycle_service;
/// Room creation, membership and closing.
pub mod room_service;
/// Background purge of idle rooms.
pub mod room_expiry;
/// Live connection join, reconnect and disconnect handling.
pub mod session_service;
/// Storage connection supervisor with degraded-mode tracking.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;

#[cfg(test)]
pub(crate) mod testing;
