//! Shared data model for the video analytics core (§3).
//!
//! This crate is pure data plus validation: no I/O, no accelerator calls,
//! no threading. Every other crate in the workspace depends on it.

pub mod behavior;
pub mod detection;
pub mod error;
pub mod frame;
pub mod frame_result;
pub mod global_track;
pub mod roi;
pub mod source;
pub mod track;

pub use behavior::{BehaviorEvent, ObjectState, Trajectory};
pub use detection::{BBox, Detection, LetterboxInfo};
pub use error::{SourceError, VisionError, VisionResult};
pub use frame::{Frame, PixelFormat};
pub use frame_result::FrameResult;
pub use global_track::{cosine_similarity, GlobalTrack};
pub use roi::{IntrusionRule, Polygon, Roi, TimeOfDay};
pub use source::{SourceConfig, Transport};
pub use track::{KalmanStateVector, Track, TrackState};
