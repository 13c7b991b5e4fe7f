//! # Prometheus Request Queue
//!
//! Priority-and-fairness request scheduling for a content-addressed
//! transfer node.
//!
//! Client requests (fetches, single-file inserts and directory inserts) are
//! registered with a [`core::RequestQueue`]. Each request owns a transfer that
//! sits in a [`core::GrabArray`], a randomized pool that a scheduler draws
//! from while skipping busy items. Arrays are grouped by priority class and
//! client in a [`core::PriorityIndex`] so urgent classes drain first and
//! clients inside a class take turns.
//!
//! ## Key Features
//!
//! - **Randomized selection**: uniform draws with an exclusion budget and
//!   self-healing of dead entries
//! - **Persistence classes**: connection, reboot, and forever requests; the
//!   last are written to a durable store and rebuilt on restart
//! - **Request starter**: a selector thread plus worker OS threads, each
//!   with its own single-threaded tokio runtime
//! - **Completion tracking**: per-direction lists of finished, unacknowledged
//!   requests, grouped into alerts and mirrored to disk with a backup file
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_request_queue::builders::build_queue;
//! use prometheus_request_queue::config::QueueConfig;
//! use prometheus_request_queue::core::RequestStarter;
//! use prometheus_request_queue::infra::InMemoryAlertSink;
//! use prometheus_request_queue::runtime::TokioSpawner;
//!
//! let cfg = QueueConfig::from_env()?;
//! let spawner = TokioSpawner::try_current().expect("inside a tokio runtime");
//! let handles = build_queue(&cfg, Arc::new(InMemoryAlertSink::new()), spawner)?;
//! // Stored requests come back first, then the completed lists reconcile
//! // against them.
//! let startup = handles.start(&resume_transfer)?;
//! startup.downloads.await??;
//! startup.uploads.await??;
//!
//! let starter = RequestStarter::new(cfg.starter.clone(), Arc::clone(&handles.queue), my_executor)?;
//! // submit requests with runtime::submit_request ...
//! starter.shutdown();
//! handles.flush()?;
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: grab arrays, priority index, requests, queue, starter.
pub mod core;
/// Configuration models for the queue, store, and starter.
pub mod config;
/// Builders to construct the queue from configuration.
pub mod builders;
/// Infrastructure adapters for storage, completed lists, alerts and transfers.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
