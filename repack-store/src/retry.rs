// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{ops::Range, time::Duration};

use backoff::{backoff::Backoff, Error as BackoffError};
use repack_common::{RepackError, Result};
use tracing::warn;

use crate::{
    location::StorageLocation,
    store::{ObjectMetadata, ObjectStore, UploadSession, UploadedPart}
};

pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const MAX_RETRIES: u32 = 8;

/// How often and how patiently transient store errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Every further retry waits twice as long.
    pub initial_delay: Duration,
    /// Retries after the initial attempt, so a call runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: INITIAL_RETRY_DELAY,
            max_retries: MAX_RETRIES
        }
    }
}

/// Exponential backoff without jitter: `initial, 2*initial, 4*initial, ...`,
/// ending after `max_retries` delays.
#[derive(Debug, Clone)]
pub struct DoublingBackoff {
    policy: RetryPolicy,
    next_delay: Duration,
    retries: u32
}

impl DoublingBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        DoublingBackoff {
            policy,
            next_delay: policy.initial_delay,
            retries: 0
        }
    }
}

impl Backoff for DoublingBackoff {
    fn reset(&mut self) {
        self.next_delay = self.policy.initial_delay;
        self.retries = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }
        self.retries += 1;
        let delay = self.next_delay;
        self.next_delay = delay.saturating_mul(2);
        Some(delay)
    }
}

/// Wraps every primitive of an [ObjectStore] in a retry loop.
///
/// Only errors for which [RepackError::is_transient] holds are retried. Once
/// the policy is exhausted, or for any other error, the store's own error is
/// returned unchanged.
pub struct RetryingObjectStore<S> {
    inner: S,
    policy: RetryPolicy
}

impl<S: ObjectStore> RetryingObjectStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        RetryingObjectStore { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn retry<T>(&self, operation: &'static str, mut call: impl FnMut(&S) -> Result<T>) -> Result<T> {
        let op = || {
            call(&self.inner).map_err(|err| {
                if err.is_transient() {
                    BackoffError::transient(err)
                } else {
                    BackoffError::permanent(err)
                }
            })
        };
        let notify = |err: RepackError, delay: Duration| {
            warn!(
                operation,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Transient object store error, retrying"
            );
        };

        backoff::retry_notify(DoublingBackoff::new(self.policy), op, notify).map_err(|err| match err {
            BackoffError::Permanent(err) => err,
            BackoffError::Transient { err, .. } => err
        })
    }
}

impl<S: ObjectStore> ObjectStore for RetryingObjectStore<S> {
    fn get_object(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        self.retry("get_object", |store| store.get_object(location, range.clone()))
    }

    fn head_object(&self, location: &StorageLocation) -> Result<ObjectMetadata> {
        self.retry("head_object", |store| store.head_object(location))
    }

    fn put_object(&self, location: &StorageLocation, body: &[u8]) -> Result<()> {
        self.retry("put_object", |store| store.put_object(location, body))
    }

    fn create_multipart_upload(&self, location: &StorageLocation) -> Result<UploadSession> {
        self.retry("create_multipart_upload", |store| store.create_multipart_upload(location))
    }

    fn upload_part_copy(
        &self,
        session: &UploadSession,
        source: &StorageLocation,
        range: Range<u64>,
        part_number: u32
    ) -> Result<UploadedPart> {
        self.retry("upload_part_copy", |store| {
            store.upload_part_copy(session, source, range.clone(), part_number)
        })
    }

    fn upload_part(&self, session: &UploadSession, body: &[u8], part_number: u32) -> Result<UploadedPart> {
        self.retry("upload_part", |store| store.upload_part(session, body, part_number))
    }

    fn complete_multipart_upload(&self, session: &UploadSession, parts: &[UploadedPart]) -> Result<()> {
        self.retry("complete_multipart_upload", |store| {
            store.complete_multipart_upload(session, parts)
        })
    }
}
