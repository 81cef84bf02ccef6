//! Contraction base detection
//!
//! `zigzag` extracts confirmed swings, `detector` turns them into a
//! `VcpCandidate` or a `Rejection`, `scoring` ranks what qualifies.

pub mod detector;
pub mod scoring;
pub mod zigzag;

pub use detector::{Contraction, PatternDetector, Rejection, VcpCandidate};
pub use scoring::ScoreBreakdown;
pub use zigzag::{zigzag_from_peak, SwingKind, SwingPoint, ZigZag};
