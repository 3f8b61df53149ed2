//! Beacon - geospatial safety monitoring and alert lifecycle engine.
//!
//! # Overview
//!
//! Beacon tracks mobile agents (tourists, field staff) in geographic space,
//! evaluates their exposure to declared risk zones, and computes a 0-100
//! safety score per location fix. Explicit emergency actions and filed
//! incident reports feed an alert lifecycle that runs forward-only from
//! `active` through `closed`, with every mutating transition gated on the
//! authority role.
//!
//! # Modules
//!
//! - [`model`]: Data types for agents, zones, alerts, and incidents
//! - [`error`]: The error taxonomy every operation reports from
//! - [`geo`]: Great-circle distance
//! - [`zones`]: In-memory zone index for containment and proximity queries
//! - [`scoring`]: Safety score computation
//! - [`lifecycle`]: Alert creation and role-gated transitions
//! - [`incidents`]: Incident filing and responder assignment
//! - [`notify`]: Post-commit notification outbox
//! - [`storage`]: SQLite record store
//! - [`api`]: HTTP API handlers

pub mod api;
pub mod error;
pub mod geo;
pub mod incidents;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod scoring;
pub mod storage;
pub mod zones;
