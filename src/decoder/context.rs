// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Ownership of the device and execution context of a session.

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;

use anyhow::anyhow;

use crate::backend::BackendError;
use crate::backend::ContextScheduling;
use crate::backend::DecoderBackend;
use crate::backend::DeviceInfo;
use crate::decoder::run_init_step;
use crate::decoder::Error;
use crate::decoder::Result;

/// The execution context all decoder operations of a session run in.
///
/// The context is created by [`acquire`](Self::acquire) and destroyed by
/// [`release`](Self::release), or when dropped. In between, [`activate`](Self::activate) makes
/// it current on the calling thread for as long as the returned guard lives.
pub struct HardwareContext<B: DecoderBackend> {
    backend: Arc<B>,
    device: DeviceInfo,
    api_version: u32,
    /// `None` once released. Guards hold a read lock so release waits for them.
    context: RwLock<Option<B::Context>>,
}

impl<B: DecoderBackend> HardwareContext<B> {
    /// Initializes the driver and creates a context on the device of `device_ordinal`.
    pub fn acquire(
        backend: Arc<B>,
        device_ordinal: u32,
        scheduling: ContextScheduling,
    ) -> Result<Self> {
        let context_failure = |stage| move |source| Error::ContextFailure { stage, source };

        run_init_step("initialize driver", || {
            backend.init().map_err(context_failure("initialize driver"))
        })?;

        let devices = run_init_step("enumerate devices", || {
            backend
                .devices()
                .map_err(context_failure("enumerate devices"))
        })?;
        for device in &devices {
            log::info!("device {}: {}", device.ordinal, device.name);
        }

        let device = run_init_step("select device", || {
            devices
                .into_iter()
                .find(|d| d.ordinal == device_ordinal)
                .ok_or_else(|| Error::ContextFailure {
                    stage: "select device",
                    source: BackendError::Other(anyhow!("no device with ordinal {}", device_ordinal)),
                })
        })?;

        let context = run_init_step("create context", || {
            backend
                .create_context(&device, scheduling)
                .map_err(context_failure("create context"))
        })?;

        let api_version = match run_init_step("query API version", || {
            backend
                .api_version(&context)
                .map_err(context_failure("query API version"))
        }) {
            Ok(version) => version,
            Err(e) => {
                if let Err(e) = backend.destroy_context(context) {
                    log::error!("failed to destroy context: {}", e);
                }
                return Err(e);
            }
        };
        log::info!("API version: {}", api_version);

        Ok(Self {
            backend,
            device,
            api_version,
            context: RwLock::new(Some(context)),
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn is_released(&self) -> bool {
        self.context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Makes the context current on the calling thread until the returned guard is dropped.
    ///
    /// Guards must not be nested on the same thread.
    pub fn activate(&self) -> Result<ContextGuard<'_, B>> {
        let lock = self.context.read().unwrap_or_else(PoisonError::into_inner);
        let context = lock.as_ref().ok_or_else(|| Error::ContextFailure {
            stage: "activate context",
            source: BackendError::Other(anyhow!("context already released")),
        })?;

        self.backend
            .push_context(context)
            .map_err(|source| Error::ContextFailure {
                stage: "activate context",
                source,
            })?;

        Ok(ContextGuard {
            backend: &self.backend,
            _lock: lock,
        })
    }

    /// Destroys the context once no guard is active anymore. Releasing an already released
    /// context does nothing.
    pub fn release(&self) -> Result<()> {
        let context = self
            .context
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match context {
            Some(context) => {
                self.backend
                    .destroy_context(context)
                    .map_err(|source| Error::ContextFailure {
                        stage: "destroy context",
                        source,
                    })?;
                log::debug!("released context on device {}", self.device.ordinal);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<B: DecoderBackend> Drop for HardwareContext<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("{}", e);
        }
    }
}

/// Keeps a [`HardwareContext`] current on the calling thread. The context is popped when the
/// guard is dropped, including on error paths.
pub struct ContextGuard<'a, B: DecoderBackend> {
    backend: &'a B,
    _lock: RwLockReadGuard<'a, Option<B::Context>>,
}

impl<'a, B: DecoderBackend> Drop for ContextGuard<'a, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.pop_context() {
            log::error!("failed to deactivate context: {}", e);
        }
    }
}
