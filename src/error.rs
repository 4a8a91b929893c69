//! Error types for graph construction and frame execution.
//!
//! Build-time failures ([`Error::DuplicateNode`], [`Error::InvalidConfiguration`],
//! [`Error::GraphCycle`], ...) abort pipeline creation. Per-frame failures
//! ([`Error::TargetNotReady`], [`Error::RenderNode`], [`Error::Device`]) abort only
//! the frame they occur in; the caller decides whether to try again next frame.

use thiserror::Error;

use crate::device::DeviceError;
use crate::render_graph::OutputSlot;

/// Error returned by node lifecycle hooks.
pub type NodeError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the render graph and pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A node with this name is already registered.
    #[error("render node `{0}` is already registered")]
    DuplicateNode(String),

    /// A node's capabilities or a connection are not legal.
    #[error("invalid configuration for `{node}`: {reason}")]
    InvalidConfiguration { node: String, reason: String },

    /// A connection or lookup named a node that was never registered.
    #[error("unknown render node `{0}`")]
    UnknownNode(String),

    /// The destination input slot already has an incoming connection.
    #[error("input slot {slot} of `{node}` already has an incoming connection")]
    DuplicateConnection { node: String, slot: u32 },

    /// Topological ordering could not complete.
    #[error("render graph contains a cycle (unresolved: {})", .unresolved.join(", "))]
    GraphCycle { unresolved: Vec<String> },

    /// An output was requested before its stage allocated a render target.
    #[error("output `{slot}` of `{node}` requested before its render target exists")]
    TargetNotReady { node: String, slot: OutputSlot },

    /// A node's `create` hook failed.
    #[error("render node `{node}` failed to create its resources")]
    CreateNode {
        node: String,
        #[source]
        source: NodeError,
    },

    /// A node's `render` hook failed.
    #[error("render node `{node}` failed")]
    RenderNode {
        node: String,
        #[source]
        source: NodeError,
    },

    /// An asset name is cached with a different concrete type.
    #[error("asset `{0}` is cached with a different type")]
    AssetTypeMismatch(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_nodes() {
        let err = Error::GraphCycle {
            unresolved: vec!["Blur".to_string(), "Mix".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "render graph contains a cycle (unresolved: Blur, Mix)"
        );
    }

    #[test]
    fn render_error_keeps_source() {
        let err = Error::RenderNode {
            node: "Terrain".to_string(),
            source: "shader missing".into(),
        };
        assert_eq!(err.to_string(), "render node `Terrain` failed");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("shader missing"));
    }

    #[test]
    fn target_not_ready_names_slot() {
        let err = Error::TargetNotReady {
            node: "Tex".to_string(),
            slot: OutputSlot::Depth,
        };
        assert_eq!(
            err.to_string(),
            "output `depth` of `Tex` requested before its render target exists"
        );
    }
}
