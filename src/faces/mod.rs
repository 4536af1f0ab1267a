pub mod detector;
pub mod port;

pub use detector::{Detection, FaceDetector, OnnxFaceDetector};
pub use port::DetectionPort;
