//! veriface-core — Biometric face-matching engine.
//!
//! Turns a detected face crop into a fixed-length descriptor built from
//! complementary feature families, expands single enrollment captures into
//! augmented sample sets, averages them into templates, and decides matches
//! under a conjunctive triple-gate threshold rule. Face *detection* is an
//! external capability supplied through the [`FaceDetector`] trait (a
//! SeetaFace-backed implementation ships behind the `seeta` feature).

pub mod augment;
pub mod config;
pub mod detect;
pub mod encoder;
pub mod engine;
pub mod matcher;
pub mod quality;
#[cfg(feature = "seeta")]
pub mod seeta;
pub mod selector;
pub mod types;

pub use config::EngineConfig;
pub use detect::FaceDetector;
pub use engine::{Enrollment, EngineError, FaceEngine};
pub use selector::SelectionMode;
pub use types::{BoundingBox, Descriptor, MatchResult, Template};

#[cfg(feature = "seeta")]
pub use seeta::SeetaDetector;
