//! Dropzone Test - shared test utilities for the deployment engine.
//!
//! Use as a dev-dependency from integration tests:
//!
//! ```rust,ignore
//! use dropzone_test::{ArtifactTree, MockRuntime};
//!
//! #[tokio::test]
//! async fn test_install() {
//!     let tree = ArtifactTree::new();
//!     tree.add("20/web.pkg");
//!     let runtime = MockRuntime::new();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
