//! The vision service contract.

use latchkey_types::LatchError;

/// Face presence detection and face comparison.
///
/// Both calls are blocking and are made from the authorization stage's own
/// thread.  Callers treat any `Err` as "no detection" / "no match".
pub trait VisionService: Send {
    /// Confidence in `[0, 1]` that a real face is present in `image`.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::Vision`] on transport, credential or decoding
    /// failures.
    fn detect_face_presence(&self, image: &[u8]) -> Result<f32, LatchError>;

    /// `true` if the face in `source` matches the face in `reference` with
    /// at least `similarity_threshold` percent similarity.
    ///
    /// # Errors
    ///
    /// Same as [`VisionService::detect_face_presence`].
    fn compare_faces(
        &self,
        source: &[u8],
        reference: &[u8],
        similarity_threshold: f32,
    ) -> Result<bool, LatchError>;
}
