//! # Gavel Core
//!
//! Core library for the Gavel vehicle price prediction service.
//!
//! This crate provides the foundational components for:
//!
//! - **[`features`]**: The `FeatureRecord` input type, its domain validation,
//!   and the canonical cache key encoder.
//!
//! - **[`auth`]**: Credential validation for static API keys (constant-time
//!   set membership) and signed bearer tokens (HMAC-SHA256, strict expiry).
//!
//! - **[`cache`]**: TTL'd, LRU-bounded price cache with per-key single-flight
//!   fill coordination and an injected clock.
//!
//! - **[`inference`]**: The opaque `PricePredictor` collaborator, the
//!   timeout/error-translation invoker, and the built-in baseline model.
//!
//! - **[`metrics`]**: Prometheus metrics collection plus an internal summary
//!   for the health endpoint.
//!
//! - **[`engine`]**: The per-request orchestrator tying the above together.
//!
//! - **[`config`]**: Layered configuration (defaults → TOML → environment).
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Authenticate │ ─── invalid credential ──► 401
//! └──────┬───────┘
//!        │ Identity
//!        ▼
//! ┌──────────────┐
//! │  Validate    │ ─── out-of-domain field ──► 400
//! └──────┬───────┘
//!        │ FeatureRecord
//!        ▼
//! ┌──────────────┐
//! │  Encode key  │  canonical form → SHA-256
//! └──────┬───────┘
//!        │ CacheKey
//!        ▼
//! ┌──────────────┐     hit      ┌───────────────┐
//! │ Cache lookup │ ───────────► │   Response    │
//! └──────┬───────┘              └───────────────┘
//!        │ miss (single-flight)        ▲
//!        ▼                             │
//! ┌──────────────┐   timeout → 504     │
//! │ Invoke model │   failure → 502     │
//! └──────┬───────┘                     │
//!        │ price                       │
//!        ▼                             │
//! ┌──────────────┐                     │
//! │ Cache insert │ ────────────────────┘
//! └──────────────┘
//! ```
//!
//! Concurrent requests for the same key share one computation: the first
//! caller computes, everyone else waits on its broadcast outcome.

pub mod auth;
pub mod cache;
pub mod config;
pub mod engine;
pub mod features;
pub mod inference;
pub mod metrics;
