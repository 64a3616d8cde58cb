//! Exclusive capture-resource management for camera and NFC hardware

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, VerificationError};
use crate::progress::NfcReadPhase;
use crate::types::CedulaIdentity;

/// The two hardware capture surfaces a stage may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureKind {
    Camera,
    Nfc,
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Camera => write!(f, "camera"),
            CaptureKind::Nfc => write!(f, "nfc"),
        }
    }
}

/// Hardware support detected once at session startup and cached for the
/// session's lifetime. Never re-probed mid-pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub camera: bool,
    pub nfc: bool,
}

impl DeviceCapabilities {
    pub fn supports(&self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Camera => self.camera,
            CaptureKind::Nfc => self.nfc,
        }
    }
}

/// Requested camera geometry for the facial capture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraConstraints {
    pub front_facing: bool,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            front_facing: true,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Phase observer for a chip read in flight.
pub type PhaseCallback = Arc<dyn Fn(NfcReadPhase) + Send + Sync>;

/// A live camera stream opened for one stage.
#[async_trait]
pub trait CameraStream: Send + Sync {
    /// Resolves once the stream delivers frames.
    async fn wait_ready(&self) -> Result<()>;

    /// Grabs a single still frame as an encoded image blob.
    async fn capture_frame(&self) -> Result<Vec<u8>>;

    /// Stops the underlying media tracks. Must be safe to call repeatedly.
    fn stop(&self);
}

/// An NFC reader session waiting for a tag.
#[async_trait]
pub trait NfcTagReader: Send + Sync {
    /// Waits for a tag and reads the identity off its chip, reporting each
    /// [`NfcReadPhase`] as it is entered.
    async fn read_tag(&self, on_phase: PhaseCallback) -> Result<CedulaIdentity>;

    /// Aborts any scan in progress. Must be safe to call repeatedly.
    fn stop(&self);
}

/// Device access for one deployment: probing and opening capture surfaces.
#[async_trait]
pub trait CapturePlatform: Send + Sync {
    async fn probe(&self) -> DeviceCapabilities;

    /// Opens the camera, or `None` when the device has no camera. Errors map
    /// to `PermissionDenied`.
    async fn open_camera(&self, constraints: CameraConstraints)
        -> Result<Option<Arc<dyn CameraStream>>>;

    /// Opens an NFC reader session, or `None` when unsupported.
    async fn open_nfc(&self) -> Result<Option<Arc<dyn NfcTagReader>>>;
}

/// Platform with no capture hardware at all. Sessions on it run every
/// hardware stage in simulated mode.
#[derive(Debug, Default)]
pub struct HeadlessPlatform;

#[async_trait]
impl CapturePlatform for HeadlessPlatform {
    async fn probe(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    async fn open_camera(
        &self,
        _constraints: CameraConstraints,
    ) -> Result<Option<Arc<dyn CameraStream>>> {
        Ok(None)
    }

    async fn open_nfc(&self) -> Result<Option<Arc<dyn NfcTagReader>>> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
struct HeldFlags {
    camera: AtomicBool,
    nfc: AtomicBool,
}

impl HeldFlags {
    fn flag(&self, kind: CaptureKind) -> &AtomicBool {
        match kind {
            CaptureKind::Camera => &self.camera,
            CaptureKind::Nfc => &self.nfc,
        }
    }
}

/// Owns exclusive access to the capture surfaces.
///
/// At most one [`CaptureHandle`] per kind is live at a time; a second
/// acquire fails fast with `CaptureBusy` instead of queuing. Release is
/// guaranteed on every exit path because the handle releases on drop.
pub struct CaptureResourceManager {
    platform: Arc<dyn CapturePlatform>,
    capabilities: DeviceCapabilities,
    constraints: CameraConstraints,
    held: Arc<HeldFlags>,
}

impl CaptureResourceManager {
    pub fn new(
        platform: Arc<dyn CapturePlatform>,
        capabilities: DeviceCapabilities,
        constraints: CameraConstraints,
    ) -> Self {
        Self {
            platform,
            capabilities,
            constraints,
            held: Arc::new(HeldFlags::default()),
        }
    }

    /// Capabilities cached at construction.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    pub fn is_held(&self, kind: CaptureKind) -> bool {
        self.held.flag(kind).load(Ordering::Acquire)
    }

    /// Claims exclusive access to `kind` and opens the device when the
    /// platform provides one. The handle carries no device on hardware-less
    /// platforms; real-mode strategies treat that as `DeviceUnavailable`.
    pub async fn acquire(&self, kind: CaptureKind) -> Result<CaptureHandle> {
        if self
            .held
            .flag(kind)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VerificationError::CaptureBusy { kind });
        }
        debug!(%kind, "capture handle acquired");

        let mut handle = CaptureHandle {
            kind,
            held: Arc::clone(&self.held),
            released: AtomicBool::new(false),
            camera: None,
            nfc: None,
        };

        if self.capabilities.supports(kind) {
            let opened = match kind {
                CaptureKind::Camera => match self.platform.open_camera(self.constraints).await {
                    Ok(stream) => {
                        handle.camera = stream;
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
                CaptureKind::Nfc => match self.platform.open_nfc().await {
                    Ok(reader) => {
                        handle.nfc = reader;
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
            };
            if let Err(err) = opened {
                // Handle drop clears the held flag.
                warn!(%kind, %err, "device open failed");
                return Err(err);
            }
        }

        Ok(handle)
    }
}

impl fmt::Debug for CaptureResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureResourceManager")
            .field("capabilities", &self.capabilities)
            .field("camera_held", &self.is_held(CaptureKind::Camera))
            .field("nfc_held", &self.is_held(CaptureKind::Nfc))
            .finish()
    }
}

/// Exclusively-held reference to one live capture surface.
///
/// Scoped acquisition: dropping the handle stops the device and frees the
/// slot, so release happens on success, error and cancellation alike.
pub struct CaptureHandle {
    kind: CaptureKind,
    held: Arc<HeldFlags>,
    released: AtomicBool,
    camera: Option<Arc<dyn CameraStream>>,
    nfc: Option<Arc<dyn NfcTagReader>>,
}

impl CaptureHandle {
    pub fn kind(&self) -> CaptureKind {
        self.kind
    }

    pub fn camera(&self) -> Option<&Arc<dyn CameraStream>> {
        self.camera.as_ref()
    }

    pub fn nfc(&self) -> Option<&Arc<dyn NfcTagReader>> {
        self.nfc.as_ref()
    }

    /// Stops the device and frees the exclusivity slot. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(camera) = &self.camera {
            camera.stop();
        }
        if let Some(nfc) = &self.nfc {
            nfc.stop();
        }
        self.held.flag(self.kind).store(false, Ordering::Release);
        debug!(kind = %self.kind, "capture handle released");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("kind", &self.kind)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}
