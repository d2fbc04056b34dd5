//! Depth estimation service.
//!
//! The estimator is an opaque, possibly slow model that turns an RGB
//! photo into a raw depth field. [`EstimatorService`] owns it: the model
//! is loaded on first use under a mutex, shared afterwards, and calls are
//! serialized unless the estimator declares itself reentrant. An
//! optional timeout bounds each call.
//!
//! A timed-out call cannot be cancelled: its worker thread keeps running
//! and, for a non-reentrant model, keeps the call gate. While such a call
//! is outstanding the service refuses new calls to a non-reentrant model
//! with stage `"gate"` instead of queueing another thread behind it.
//!
//! The service is constructed once by the process owner and passed to
//! whoever needs depth. There is no global instance.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::time::Duration;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::types::{BoxError, Dimensions, PipelineError, RawDepthField, RgbImage};

/// Error type returned by estimator implementations.
pub type EstimatorError = BoxError;

/// A photo-to-depth model.
pub trait DepthEstimator: Send + Sync {
    /// Estimate a raw depth field for `photo`.
    ///
    /// The returned field must have the photo's dimensions.
    ///
    /// # Errors
    ///
    /// Any failure inside the model.
    fn estimate(&self, photo: &RgbImage) -> Result<RawDepthField, EstimatorError>;

    /// Whether concurrent calls to [`estimate`](Self::estimate) are safe.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Estimator call settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Upper bound on a single call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

type Loader = Box<dyn Fn() -> Result<Arc<dyn DepthEstimator>, EstimatorError> + Send + Sync>;

/// Lazily loaded, shared depth estimator.
pub struct EstimatorService {
    loader: Loader,
    model: Mutex<Option<Arc<dyn DepthEstimator>>>,
    call_gate: Arc<Mutex<()>>,
    /// Timed-out calls whose worker has not returned yet.
    stalled: Arc<AtomicUsize>,
    config: EstimatorConfig,
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EstimatorService {
    /// Create a service that loads its model with `loader` on first use.
    pub fn new<F>(config: EstimatorConfig, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn DepthEstimator>, EstimatorError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            model: Mutex::new(None),
            call_gate: Arc::new(Mutex::new(())),
            stalled: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Create a service around an already loaded model.
    pub fn with_estimator(config: EstimatorConfig, estimator: Arc<dyn DepthEstimator>) -> Self {
        let preloaded = Arc::clone(&estimator);
        let service = Self::new(config, move || Ok(Arc::clone(&preloaded)));
        *lock(&service.model) = Some(estimator);
        service
    }

    #[must_use]
    pub const fn config(&self) -> EstimatorConfig {
        self.config
    }

    /// Whether the model has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        lock(&self.model).is_some()
    }

    /// Whether a timed-out call is still running in the background.
    #[must_use]
    pub fn has_stalled_call(&self) -> bool {
        self.stalled.load(Ordering::Acquire) > 0
    }

    /// Load the model if it is not loaded yet, and return it.
    ///
    /// Concurrent first calls load once; the others wait.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EstimationFailure`] with stage `"load"` if
    /// the loader fails. A failed load is retried on the next call.
    pub fn model(&self) -> Result<Arc<dyn DepthEstimator>, PipelineError> {
        let mut model = lock(&self.model);
        if let Some(m) = model.as_ref() {
            return Ok(Arc::clone(m));
        }
        tracing::info!("loading depth estimator");
        let loaded = (self.loader)().map_err(|source| PipelineError::EstimationFailure {
            stage: "load",
            source,
        })?;
        *model = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Estimate depth for `photo`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::EstimationFailure`] if loading or the model
    ///   fails, or the output has the wrong dimensions.
    /// - [`PipelineError::EstimationTimedOut`] if the configured timeout
    ///   elapses first. The model call itself is not cancelled and its
    ///   result is discarded.
    /// - [`PipelineError::EstimationFailure`] with stage `"gate"` if the
    ///   model is not reentrant and an earlier timed-out call is still
    ///   running.
    pub fn estimate(&self, photo: &RgbImage) -> Result<RawDepthField, PipelineError> {
        let model = self.model()?;
        if !model.is_reentrant() && self.has_stalled_call() {
            return Err(PipelineError::EstimationFailure {
                stage: "gate",
                source: "an earlier call timed out and still holds the estimator".into(),
            });
        }
        let raw = match self.config.timeout {
            None => {
                let _gate = (!model.is_reentrant()).then(|| lock(&self.call_gate));
                model.estimate(photo).map_err(|source| PipelineError::EstimationFailure {
                    stage: "estimate",
                    source,
                })?
            }
            Some(timeout) => self.estimate_with_timeout(model, photo, timeout)?,
        };
        let expected = Dimensions::of(photo);
        if raw.dimensions() != expected {
            return Err(PipelineError::EstimationFailure {
                stage: "estimate",
                source: format!(
                    "estimator returned {}x{} for a {}x{} photo",
                    raw.dimensions().width,
                    raw.dimensions().height,
                    expected.width,
                    expected.height
                )
                .into(),
            });
        }
        Ok(raw)
    }

    fn estimate_with_timeout(
        &self,
        model: Arc<dyn DepthEstimator>,
        photo: &RgbImage,
        timeout: Duration,
    ) -> Result<RawDepthField, PipelineError> {
        let (tx, rx) = mpsc::channel();
        let photo = photo.clone();
        let gate = Arc::clone(&self.call_gate);
        let state = Arc::new(AtomicU8::new(RUNNING));
        let worker_state = Arc::clone(&state);
        let stalled = Arc::clone(&self.stalled);
        std::thread::Builder::new()
            .name("depth-estimator".to_owned())
            .spawn(move || {
                let result = {
                    let _gate = (!model.is_reentrant()).then(|| lock(&gate));
                    model.estimate(&photo)
                };
                if worker_state.swap(FINISHED, Ordering::AcqRel) == ABANDONED {
                    stalled.fetch_sub(1, Ordering::AcqRel);
                    tracing::info!("timed-out depth estimation finished");
                }
                // The receiver may have timed out and gone away.
                let _ = tx.send(result);
            })
            .map_err(|e| PipelineError::EstimationFailure {
                stage: "spawn",
                source: Box::new(e),
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|source| PipelineError::EstimationFailure {
                stage: "estimate",
                source,
            }),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.stalled.fetch_add(1, Ordering::AcqRel);
                if state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Finished between the timeout and the mark.
                    self.stalled.fetch_sub(1, Ordering::AcqRel);
                }
                tracing::warn!(?timeout, "depth estimation timed out");
                Err(PipelineError::EstimationTimedOut { timeout })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PipelineError::EstimationFailure {
                stage: "estimate",
                source: "estimator thread exited without a result".into(),
            }),
        }
    }
}

impl std::fmt::Debug for EstimatorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstimatorService")
            .field("loaded", &self.is_loaded())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Treats a pre-computed depth raster as the model output.
///
/// The raster is resized to the photo with a triangle filter when the
/// sizes differ. Brighter means nearer.
#[derive(Debug, Clone)]
pub struct RasterDepthEstimator {
    depth: image::ImageBuffer<image::Luma<u16>, Vec<u16>>,
}

impl RasterDepthEstimator {
    /// Wrap a decoded depth image (8- or 16-bit grayscale, or color,
    /// which is reduced to luma).
    #[must_use]
    pub fn new(depth: &image::DynamicImage) -> Self {
        Self {
            depth: depth.to_luma16(),
        }
    }

    /// Decode a depth image from bytes.
    ///
    /// # Errors
    ///
    /// See [`crate::grayscale::decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        Ok(Self::new(&crate::grayscale::decode(bytes)?))
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.depth)
    }

    /// The raster at its own resolution, for runs without a photo.
    ///
    /// # Errors
    ///
    /// See [`RawDepthField::new`].
    pub fn depth_field(&self) -> Result<RawDepthField, PipelineError> {
        RawDepthField::from_luma16(&self.depth)
    }
}

impl DepthEstimator for RasterDepthEstimator {
    fn estimate(&self, photo: &RgbImage) -> Result<RawDepthField, EstimatorError> {
        let target = Dimensions::of(photo);
        if self.dimensions() == target {
            return Ok(self.depth_field()?);
        }
        let resized =
            image::imageops::resize(&self.depth, target.width, target.height, FilterType::Triangle);
        Ok(RawDepthField::from_luma16(&resized)?)
    }

    fn is_reentrant(&self) -> bool {
        true
    }
}
