use crate::detect::wire::DetectorResponse;
use crate::error::DetectorFailure;

/// A head-direction detector reachable from this process.
///
/// Implementations only perform the round-trip and wire parsing; shape
/// normalisation and coordinate scaling belong to `DetectionClient`.
///
/// `detect` takes `&self`: the controller calls it from several request
/// threads at once, so any per-call state needs its own synchronisation.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Submit one JPEG-encoded frame.
    fn detect(&self, jpeg: &[u8]) -> Result<DetectorResponse, DetectorFailure>;

    /// Optional warm-up hook, called once before the first session.
    fn warm_up(&self) -> Result<(), DetectorFailure> {
        Ok(())
    }
}
