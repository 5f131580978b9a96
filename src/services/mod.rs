/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Lobby listing and join flows.
pub mod lobby_service;
/// Per-player match controller actor.
pub mod match_controller;
/// Typed match record operations over the match store.
pub mod match_repository;
/// Match lifecycle operations exposed to players.
pub mod match_service;
/// Server-Sent Events streaming of match views.
pub mod sse_service;
/// Match store connection supervisor.
pub mod storage_supervisor;
