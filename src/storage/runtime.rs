//! Blocking bridge to async object-store clients
//!
//! The storage traits are synchronous. The S3 backends drive their async
//! clients on a private runtime owned by [`BlockingRuntime`].

use crate::error::{Error, Result};
use anyhow::anyhow;
use std::future::Future;
use tokio::runtime::{Builder, Handle, Runtime};

const IO_THREADS: usize = 2;

/// Runtime used to run async storage calls to completion
#[derive(Debug)]
pub struct BlockingRuntime {
    handle: Handle,
    /// Taken on drop and shut down without blocking
    runtime: Option<Runtime>,
}

impl BlockingRuntime {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(IO_THREADS)
            .thread_name("deltacat-io")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Run `future` to completion and return its output.
    ///
    /// Safe to call from inside another Tokio runtime: the future is then
    /// driven from a scoped thread so the caller's worker is not blocked on
    /// itself.
    pub fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        if Handle::try_current().is_ok() {
            std::thread::scope(|s| {
                s.spawn(|| self.handle.block_on(future))
                    .join()
                    .map_err(|_| {
                        Error::storage("run storage call", anyhow!("I/O thread panicked"))
                    })?
            })
        } else {
            self.handle.block_on(future)
        }
    }
}

impl Drop for BlockingRuntime {
    fn drop(&mut self) {
        // Dropping a runtime from async code panics unless it is shut down
        // in the background
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
