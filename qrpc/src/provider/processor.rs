//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Business processing callback.

use super::context::ProcessContext;
use crate::error::BoxError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Handles one request and produces the reply body.
///
/// For fire-and-forget the returned body is discarded. An error becomes an
/// error reply to a request-reply caller; the loop itself keeps running.
///
/// # Example
///
/// ```rust
/// use qrpc::error::BoxError;
/// use qrpc::provider::{ProcessContext, Processor};
/// use async_trait::async_trait;
///
/// struct Upper;
///
/// #[async_trait]
/// impl Processor for Upper {
///     async fn process(
///         &self,
///         body: Vec<u8>,
///         _context: &ProcessContext,
///     ) -> Result<Vec<u8>, BoxError> {
///         Ok(body.to_ascii_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Processes `body` and returns the reply body.
    ///
    /// # Errors
    ///
    /// Any error the business logic reports.
    async fn process(&self, body: Vec<u8>, context: &ProcessContext) -> Result<Vec<u8>, BoxError>;
}

/// Adapts an async closure into a [`Processor`].
///
/// ```rust
/// use qrpc::provider::{ProcessContext, from_fn};
///
/// let echo = from_fn(|body: Vec<u8>, _context: ProcessContext| async move {
///     Ok::<_, qrpc::error::BoxError>(body)
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnProcessor<F, Fut>
where
    F: Fn(Vec<u8>, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
{
    FnProcessor {
        f,
        _future: PhantomData,
    }
}

/// [`Processor`] returned by [`from_fn`].
pub struct FnProcessor<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F, Fut>
where
    F: Fn(Vec<u8>, ProcessContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, BoxError>> + Send + 'static,
{
    async fn process(&self, body: Vec<u8>, context: &ProcessContext) -> Result<Vec<u8>, BoxError> {
        (self.f)(body, context.clone()).await
    }
}

impl<F, Fut> std::fmt::Debug for FnProcessor<F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProcessor").finish_non_exhaustive()
    }
}
