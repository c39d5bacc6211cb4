//! spotd Kubernetes Integration
//!
//! Provides the Kubernetes-backed [`spotd_core::ClusterClient`] for the spot
//! termination handler.

pub mod client;
pub mod convert;
pub mod error;

pub use client::K8sClient;
pub use error::classify;
