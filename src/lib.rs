//! Hochwasser - water-level threshold alerting.
//!
//! # Overview
//!
//! Hochwasser watches gauging stations and mails subscribers when the
//! measured or forecast water level reaches a per-job limit. Each alert is
//! sent at most once per crossing within a dedupe window, even across
//! restarts. Jobs are reloaded periodically; new, changed and deleted jobs
//! are picked up without a restart.
//!
//! A job that fails repeatedly is marked degraded and the operators get a
//! single down mail, followed by a recovered mail once it succeeds again.
//! A companion watchdog binary listens to Docker container events and mails
//! (and optionally restarts) on crashes and failed health checks.
//!
//! # Modules
//!
//! - [`threshold`]: Crossing detection on current, forecast and trend data
//! - [`dedup`] and [`state_store`]: Dedup keys and the persisted alert state
//! - [`health`]: Per-job health state machine and the `/health` report
//! - [`runner`], [`scheduler`] and [`reconciler`]: Job execution and reloads
//! - [`data_sources`]: Station data providers
//! - [`notifier`], [`messages`] and [`chart`]: Mail transport, mail content and
//!   the hydrograph embedded in HTML alerts
//! - [`watchdog`] and [`docker`]: Container watchdog
//! - [`api`]: HTTP health endpoint

pub mod api;
pub mod chart;
pub mod config;
pub mod data_sources;
pub mod dedup;
pub mod docker;
pub mod error;
pub mod health;
pub mod messages;
pub mod model;
pub mod notifier;
pub mod reconciler;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod state_store;
pub mod station_cache;
pub mod threshold;
pub mod watchdog;
